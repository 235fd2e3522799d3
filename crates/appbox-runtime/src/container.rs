//! Handle to one application container.

use std::io::{Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use appbox_common::constants::{
    LABEL_APP_NAME, LABEL_APP_NAMESPACE, LABEL_CATEGORY, LABEL_PLUGIN_TAG, LABEL_REPLICA, LABEL_SERVICE_NAME,
};
use appbox_common::error::{AppboxError, Result};
use appbox_common::types::{Category, ContainerId, ContainerIdentity, ContainerState};
use crossbeam_channel::{Receiver, TryRecvError};

use crate::backend::{ContainerBackend, ContainerInfo};
use crate::exec::{ExecConfig, ExecInspect, ExecIo, Pumped, SharedBuffer, pump_streams};
use crate::metrics::MetricsSnapshot;

const EXEC_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A container as seen through its backend.
#[derive(Clone)]
pub struct Container {
    backend: Arc<dyn ContainerBackend>,
    info: ContainerInfo,
    stop_timeout: Duration,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("backend", &self.backend.name())
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl Container {
    /// Wraps backend information about a container.
    #[must_use]
    pub fn new(backend: Arc<dyn ContainerBackend>, info: ContainerInfo, stop_timeout: Duration) -> Self {
        Self {
            backend,
            info,
            stop_timeout,
        }
    }

    /// Engine id.
    #[must_use]
    pub const fn id(&self) -> &ContainerId {
        &self.info.id
    }

    /// Backend information as of the last refresh.
    #[must_use]
    pub const fn info(&self) -> &ContainerInfo {
        &self.info
    }

    /// Application name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.info.label(LABEL_APP_NAME).unwrap_or_default()
    }

    /// Owner namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.info.label(LABEL_APP_NAMESPACE).unwrap_or_default()
    }

    /// Service name, `None` for the framework container.
    #[must_use]
    pub fn service_name(&self) -> Option<&str> {
        self.info.label(LABEL_SERVICE_NAME)
    }

    /// Tag of the plugin the container runs.
    #[must_use]
    pub fn plugin_tag(&self) -> &str {
        self.info.label(LABEL_PLUGIN_TAG).unwrap_or_default()
    }

    /// Plugin category; containers without the label count as framework.
    #[must_use]
    pub fn category(&self) -> Category {
        self.info
            .label(LABEL_CATEGORY)
            .and_then(Category::from_label)
            .unwrap_or(Category::Framework)
    }

    /// Index inside the scaling group.
    #[must_use]
    pub fn replica(&self) -> u32 {
        self.info
            .label(LABEL_REPLICA)
            .and_then(|r| r.parse().ok())
            .unwrap_or(0)
    }

    /// Full identity of the container.
    #[must_use]
    pub fn identity(&self) -> ContainerIdentity {
        ContainerIdentity {
            name: self.name().to_string(),
            namespace: self.namespace().to_string(),
            service_name: self.service_name().map(String::from),
            plugin_tag: self.plugin_tag().to_string(),
        }
    }

    /// Lifecycle state as of the last refresh.
    #[must_use]
    pub const fn state(&self) -> ContainerState {
        self.info.state
    }

    /// Loopback address of the container.
    #[must_use]
    pub const fn ip(&self) -> Option<std::net::Ipv4Addr> {
        self.info.ip
    }

    /// Time the container has been running, `None` unless running.
    #[must_use]
    pub fn uptime(&self) -> Option<Duration> {
        let started = self.info.started_at?;
        (chrono::Utc::now() - started).to_std().ok()
    }

    /// Re-reads the container from its backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the container no longer exists.
    pub fn refresh(&mut self) -> Result<()> {
        self.info = self.backend.inspect(&self.info.id)?;
        Ok(())
    }

    /// Starts the container.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub fn start(&self) -> Result<()> {
        self.backend.start(self.id())
    }

    /// Stops the container with the configured grace period.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub fn stop(&self) -> Result<()> {
        self.backend.stop(self.id(), self.stop_timeout)
    }

    /// Stops and starts the container.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error.
    pub fn restart(&self) -> Result<()> {
        self.stop()?;
        self.start()
    }

    /// Removes the container and everything it owns.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub fn destroy(&self) -> Result<()> {
        self.backend.remove(self.id())
    }

    /// Resource usage.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub fn stats(&self) -> Result<MetricsSnapshot> {
        self.backend.stats(self.id())
    }

    /// Sets an environment variable for later processes.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid name or a backend failure.
    pub fn set_env(&self, key: &str, value: &str) -> Result<()> {
        self.backend.update_env(self.id(), key, Some(value))
    }

    /// Removes an environment variable.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid name or a backend failure.
    pub fn unset_env(&self, key: &str) -> Result<()> {
        self.backend.update_env(self.id(), key, None)
    }

    /// Runs `cmd` in the container and waits for it to exit.
    ///
    /// When `io.cancel` fires the call returns without waiting further and
    /// the process keeps running.
    ///
    /// # Errors
    ///
    /// Returns [`AppboxError::Status`] with an empty message when the
    /// command exits non-zero, or the backend's error.
    pub fn exec(&self, user: Option<&str>, io: ExecIo, cmd: &[&str]) -> Result<()> {
        let config = ExecConfig {
            user: user.map(String::from),
            cmd: cmd.iter().map(ToString::to_string).collect(),
            attach_stdin: io.stdin.is_some(),
            attach_stdout: true,
            attach_stderr: true,
            env: Vec::new(),
        };
        let cancel = io.cancel.clone();
        let exec_id = self.backend.exec_create(self.id(), &config)?;
        let attached = self.backend.exec_attach(&exec_id)?;
        tracing::debug!(id = %self.id(), exec = %exec_id, cmd = ?config.cmd, "exec attached");

        let inspect = match pump_streams(io, attached)? {
            Pumped::Drained => self.wait_exec(&exec_id, cancel.as_ref())?,
            Pumped::Cancelled => self.backend.exec_inspect(&exec_id)?,
        };
        match inspect.exit_code {
            Some(code) if code != 0 => Err(AppboxError::Status {
                code,
                message: String::new(),
            }),
            _ => Ok(()),
        }
    }

    fn wait_exec(&self, exec_id: &str, cancel: Option<&Receiver<()>>) -> Result<ExecInspect> {
        loop {
            let inspect = self.backend.exec_inspect(exec_id)?;
            if !inspect.running {
                return Ok(inspect);
            }
            if let Some(cancel) = cancel {
                if !matches!(cancel.try_recv(), Err(TryRecvError::Empty)) {
                    return Ok(inspect);
                }
            }
            thread::sleep(EXEC_POLL_INTERVAL);
        }
    }

    /// Like [`Container::exec`], filling the message of a status error
    /// with the command's standard error.
    ///
    /// # Errors
    ///
    /// Same as [`Container::exec`].
    pub fn exec_e(
        &self,
        user: Option<&str>,
        stdin: Option<Box<dyn Read + Send>>,
        stdout: Option<Box<dyn Write + Send>>,
        cmd: &[&str],
    ) -> Result<()> {
        let errbuf = SharedBuffer::new();
        let io = ExecIo {
            stdin,
            stdout,
            stderr: Some(Box::new(errbuf.clone())),
            cancel: None,
        };
        self.exec(user, io, cmd).map_err(|e| with_stderr(e, &errbuf))
    }

    /// Runs `cmd` discarding its output; standard error ends up in the
    /// status error message.
    ///
    /// # Errors
    ///
    /// Same as [`Container::exec_e`].
    pub fn exec_q(&self, user: Option<&str>, cmd: &[&str]) -> Result<()> {
        self.exec_e(user, None, None, cmd)
    }

    /// Runs `cmd` and returns its standard output without trailing
    /// newlines.
    ///
    /// # Errors
    ///
    /// Same as [`Container::exec_e`].
    pub fn subst(&self, user: Option<&str>, stdin: Option<Box<dyn Read + Send>>, cmd: &[&str]) -> Result<String> {
        let (outbuf, errbuf) = (SharedBuffer::new(), SharedBuffer::new());
        let io = ExecIo {
            stdin,
            stdout: Some(Box::new(outbuf.clone())),
            stderr: Some(Box::new(errbuf.clone())),
            cancel: None,
        };
        self.exec(user, io, cmd).map_err(|e| with_stderr(e, &errbuf))?;
        Ok(outbuf.chomp())
    }
}

fn with_stderr(err: AppboxError, errbuf: &SharedBuffer) -> AppboxError {
    match err {
        AppboxError::Status { code, message } if message.is_empty() => AppboxError::Status {
            code,
            message: errbuf.chomp(),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::backend::ContainerSpec;
    use crate::backend::memory::MemoryBackend;

    fn container(dir: &std::path::Path) -> Container {
        let backend: Arc<dyn ContainerBackend> = Arc::new(MemoryBackend::new(dir));
        let spec = ContainerSpec {
            name: "blog-acme".into(),
            labels: BTreeMap::from([
                (LABEL_APP_NAME.to_string(), "blog".to_string()),
                (LABEL_APP_NAMESPACE.to_string(), "acme".to_string()),
                (LABEL_PLUGIN_TAG.to_string(), "php:7".to_string()),
                (LABEL_REPLICA.to_string(), "2".to_string()),
            ]),
            ..ContainerSpec::default()
        };
        let info = backend.create(&spec).unwrap();
        Container::new(backend, info, Duration::from_secs(1))
    }

    #[test]
    fn identity_comes_from_labels() {
        let dir = tempfile::tempdir().unwrap();
        let c = container(dir.path());
        assert_eq!(c.name(), "blog");
        assert_eq!(c.namespace(), "acme");
        assert_eq!(c.service_name(), None);
        assert_eq!(c.category(), Category::Framework);
        assert_eq!(c.replica(), 2);
        assert_eq!(c.identity().to_string(), "blog-acme");
    }

    #[test]
    fn non_zero_exit_is_a_status_error() {
        let dir = tempfile::tempdir().unwrap();
        let c = container(dir.path());
        let err = c.exec(None, ExecIo::default(), &["sh", "-c", "exit 4"]).unwrap_err();
        assert!(matches!(err, AppboxError::Status { code: 4, ref message } if message.is_empty()));
        c.exec(None, ExecIo::default(), &["true"]).unwrap();
    }

    #[test]
    fn exec_e_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let c = container(dir.path());
        let err = c
            .exec_q(None, &["sh", "-c", "echo 'no such file' >&2; exit 2"])
            .unwrap_err();
        assert_eq!(err.to_string(), "no such file, Code: 2");
    }

    #[test]
    fn subst_trims_trailing_newlines() {
        let dir = tempfile::tempdir().unwrap();
        let c = container(dir.path());
        assert_eq!(c.subst(None, None, &["printf", "value\\r\\n\\n"]).unwrap(), "value");

        let input: Box<dyn Read + Send> = Box::new(std::io::Cursor::new(b"piped".to_vec()));
        assert_eq!(c.subst(None, Some(input), &["cat"]).unwrap(), "piped");
    }

    #[test]
    fn cancelled_exec_returns_early() {
        let dir = tempfile::tempdir().unwrap();
        let c = container(dir.path());
        let (tx, rx) = crossbeam_channel::bounded(1);
        tx.send(()).unwrap();
        let io = ExecIo {
            stdout: Some(Box::new(SharedBuffer::new())),
            cancel: Some(rx),
            ..ExecIo::default()
        };
        let started = std::time::Instant::now();
        c.exec(None, io, &["sleep", "5"]).unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn lifecycle_goes_through_the_backend() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = container(dir.path());
        c.start().unwrap();
        c.refresh().unwrap();
        assert_eq!(c.state(), ContainerState::Running);
        assert!(c.uptime().is_some());
        c.restart().unwrap();
        c.stop().unwrap();
        c.refresh().unwrap();
        assert_eq!(c.state(), ContainerState::Stopped);
        c.destroy().unwrap();
        assert!(c.refresh().unwrap_err().is_not_found());
    }
}
