//! Linux container plugin: `useradd`/`userdel` users confined by cgroups.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use appbox_common::error::{AppboxError, Errors, Result};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use super::command;
use super::{ContainerPlugin, Sandbox};
use crate::cgroup::{CgroupHost, tasks};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Plugin for Linux hosts.
#[derive(Debug)]
pub struct LinuxPlugin {
    sandbox: Sandbox,
    cgroups: Arc<CgroupHost>,
}

impl LinuxPlugin {
    /// Creates the plugin for one container.
    #[must_use]
    pub const fn new(sandbox: Sandbox, cgroups: Arc<CgroupHost>) -> Self {
        Self { sandbox, cgroups }
    }

    fn user_pids(&self, uid: u32) -> Result<Vec<Pid>> {
        Ok(tasks::processes(self.cgroups.proc_root())?
            .into_iter()
            .filter(|t| t.uid == uid)
            .filter_map(|t| i32::try_from(t.pid).ok())
            .map(Pid::from_raw)
            .collect())
    }
}

fn signal_all(pids: &[Pid], signal: Signal) {
    for pid in pids {
        match kill(*pid, signal) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => tracing::warn!(pid = pid.as_raw(), signal = ?signal, error = %e, "failed to signal process"),
        }
    }
}

impl ContainerPlugin for LinuxPlugin {
    fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    fn create_user(&self) -> Result<()> {
        let sandbox = &self.sandbox;
        let home = sandbox.home.to_string_lossy().into_owned();
        let mut args = vec![
            "-M".to_string(),
            "-d".into(),
            home,
            "-s".into(),
            sandbox.shell.clone(),
            "-c".into(),
            "appbox container".into(),
        ];
        if let Some(uid) = sandbox.uid {
            args.extend(["-u".to_string(), uid.to_string()]);
        }
        args.push(sandbox.id.clone());
        let _ = command::run("useradd", &args)?;

        if self.cgroups.is_enabled() {
            let (uid, gid) = self.account()?;
            self.cgroups
                .cgroup(&sandbox.id, uid)
                .with_gid(gid)
                .create(&sandbox.limits)?;
        }
        tracing::info!(id = %sandbox.id, "container user created");
        Ok(())
    }

    fn delete_user(&self) -> Result<()> {
        let sandbox = &self.sandbox;
        let mut errors = Errors::new();
        if self.cgroups.is_enabled() {
            let uid = self.account().map_or(0, |(uid, _)| uid);
            errors.add(self.cgroups.cgroup(&sandbox.id, uid).delete());
        }
        if command::user_exists(&sandbox.id) {
            errors.add(command::run("userdel", [sandbox.id.as_str()]));
        }
        errors.add(command::remove_home(&sandbox.home));
        tracing::info!(id = %sandbox.id, failures = errors.len(), "container user deleted");
        errors.into_result()
    }

    fn kill_procs(&self, term_delay: Option<Duration>) -> Result<()> {
        let (uid, _) = self.account()?;
        if uid == 0 {
            return Err(AppboxError::PermissionDenied {
                message: format!("container {} maps to root", self.sandbox.id),
            });
        }

        if let Some(delay) = term_delay {
            signal_all(&self.user_pids(uid)?, Signal::SIGTERM);
            let deadline = Instant::now() + delay;
            while Instant::now() < deadline {
                if self.user_pids(uid)?.is_empty() {
                    return Ok(());
                }
                thread::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
            }
        }
        let survivors = self.user_pids(uid)?;
        signal_all(&survivors, Signal::SIGKILL);
        tracing::debug!(id = %self.sandbox.id, killed = survivors.len(), "container processes killed");
        Ok(())
    }

    fn after_spawn(&self, pid: u32) -> Result<()> {
        if !self.cgroups.is_enabled() {
            return Ok(());
        }
        let (uid, gid) = self.account()?;
        self.cgroups.cgroup(&self.sandbox.id, uid).with_gid(gid).classify()?;
        tracing::debug!(id = %self.sandbox.id, pid, "spawned process classified");
        Ok(())
    }
}
