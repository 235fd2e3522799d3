//! In-process backend without OS isolation.
//!
//! Containers are plain working directories; commands run as host
//! processes of the current user. Used for development and tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use appbox_common::config::NetworkConfig;
use appbox_common::error::{AppboxError, Result};
use appbox_common::types::{ContainerId, ContainerState};
use appbox_core::plugin::network;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use super::{ContainerBackend, ContainerInfo, ContainerSpec, LabelFilter};
use crate::exec::{Attached, ExecInspect, ExecTable};
use crate::metrics::MetricsSnapshot;
use crate::process;

const FIRST_UID: u32 = 1000;
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug)]
struct Entry {
    info: ContainerInfo,
    env: BTreeMap<String, String>,
    command: Vec<String>,
    workdir: PathBuf,
    main: Option<Child>,
}

#[derive(Debug, Default)]
struct Inner {
    containers: Vec<Entry>,
    next_uid: u32,
    creates_before_failure: Option<usize>,
}

/// Backend keeping every container in memory.
#[derive(Debug)]
pub struct MemoryBackend {
    root: PathBuf,
    inner: Mutex<Inner>,
    execs: ExecTable,
}

impl MemoryBackend {
    /// Creates an empty backend placing container directories below `root`.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            inner: Mutex::new(Inner {
                next_uid: FIRST_UID,
                ..Inner::default()
            }),
            execs: ExecTable::default(),
        }
    }

    /// Makes the create call after the next `successes` ones fail.
    pub fn fail_create_after(&self, successes: usize) {
        self.lock().creates_before_failure = Some(successes);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    fn entry(&mut self, id: &ContainerId) -> Result<&mut Entry> {
        self.containers
            .iter_mut()
            .find(|e| e.info.id == *id)
            .ok_or_else(|| AppboxError::NotFound {
                kind: "container",
                id: id.to_string(),
            })
    }
}

fn stop_child(child: &mut Child, timeout: Duration) {
    if let Ok(pid) = i32::try_from(child.id()) {
        let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
    }
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }
        thread::sleep(POLL_INTERVAL);
    }
    let _ = child.kill();
    let _ = child.wait();
}

impl ContainerBackend for MemoryBackend {
    fn create(&self, spec: &ContainerSpec) -> Result<ContainerInfo> {
        let mut inner = self.lock();
        if let Some(remaining) = inner.creates_before_failure.as_mut() {
            if *remaining == 0 {
                inner.creates_before_failure = None;
                return Err(AppboxError::Engine {
                    message: format!("injected failure creating {}", spec.name),
                });
            }
            *remaining -= 1;
        }
        if inner.containers.iter().any(|e| e.info.name == spec.name) {
            return Err(AppboxError::AlreadyExists {
                kind: "container",
                id: spec.name.clone(),
            });
        }

        let id = ContainerId::generate();
        let uid = inner.next_uid;
        inner.next_uid += 1;
        let workdir = self.root.join(id.as_str());
        std::fs::create_dir_all(&workdir).map_err(|e| AppboxError::io(&workdir, e))?;

        let info = ContainerInfo {
            id: id.clone(),
            name: spec.name.clone(),
            labels: spec.labels.clone(),
            state: ContainerState::Created,
            ip: network::ip_address(uid, 1, &NetworkConfig::default()).ok(),
            created_at: chrono::Utc::now(),
            started_at: None,
        };
        inner.containers.push(Entry {
            info: info.clone(),
            env: spec.env.iter().cloned().collect(),
            command: spec.command.clone(),
            workdir,
            main: None,
        });
        tracing::info!(id = %id, name = %spec.name, "container created (memory)");
        Ok(info)
    }

    fn start(&self, id: &ContainerId) -> Result<()> {
        let mut inner = self.lock();
        let entry = inner.entry(id)?;
        if entry.info.state == ContainerState::Running {
            return Ok(());
        }
        if let Some((program, args)) = entry.command.split_first() {
            let child = Command::new(program)
                .args(args)
                .current_dir(&entry.workdir)
                .envs(&entry.env)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|e| AppboxError::Command {
                    command: program.clone(),
                    message: e.to_string(),
                })?;
            entry.main = Some(child);
        }
        entry.info.state = ContainerState::Running;
        entry.info.started_at = Some(chrono::Utc::now());
        tracing::info!(id = %id, "container started (memory)");
        Ok(())
    }

    fn stop(&self, id: &ContainerId, timeout: Duration) -> Result<()> {
        let main = {
            let mut inner = self.lock();
            let entry = inner.entry(id)?;
            entry.info.state = ContainerState::Stopped;
            entry.info.started_at = None;
            entry.main.take()
        };
        if let Some(mut child) = main {
            stop_child(&mut child, timeout);
        }
        tracing::info!(id = %id, "container stopped (memory)");
        Ok(())
    }

    fn remove(&self, id: &ContainerId) -> Result<()> {
        let entry = {
            let mut inner = self.lock();
            let index = inner
                .containers
                .iter()
                .position(|e| e.info.id == *id)
                .ok_or_else(|| AppboxError::NotFound {
                    kind: "container",
                    id: id.to_string(),
                })?;
            inner.containers.remove(index)
        };
        if let Some(mut child) = entry.main {
            stop_child(&mut child, Duration::ZERO);
        }
        self.execs.forget(id);
        if let Err(e) = std::fs::remove_dir_all(&entry.workdir) {
            tracing::warn!(id = %id, error = %e, "failed to remove container directory");
        }
        tracing::info!(id = %id, "container removed (memory)");
        Ok(())
    }

    fn inspect(&self, id: &ContainerId) -> Result<ContainerInfo> {
        Ok(self.lock().entry(id)?.info.clone())
    }

    fn list(&self, filter: &LabelFilter) -> Result<Vec<ContainerInfo>> {
        Ok(self
            .lock()
            .containers
            .iter()
            .filter(|e| filter.matches(&e.info.labels))
            .map(|e| e.info.clone())
            .collect())
    }

    fn exec_create(&self, id: &ContainerId, config: &crate::exec::ExecConfig) -> Result<String> {
        let _ = self.lock().entry(id)?;
        self.execs.insert(id, config)
    }

    fn exec_attach(&self, exec_id: &str) -> Result<Attached> {
        let exec = self.execs.get(exec_id)?;
        let (workdir, env) = {
            let mut inner = self.lock();
            let entry = inner.entry(&exec.container)?;
            (entry.workdir.clone(), entry.env.clone())
        };
        let Some((program, args)) = exec.config.cmd.split_first() else {
            return Err(AppboxError::invalid("exec command is empty"));
        };
        let mut cmd = Command::new(program);
        let _ = cmd.args(args).current_dir(workdir).envs(env);
        process::spawn_attached(cmd, &exec.config, Arc::clone(&exec.status), |_| Ok(()))
    }

    fn exec_inspect(&self, exec_id: &str) -> Result<ExecInspect> {
        Ok(self.execs.get(exec_id)?.status.snapshot())
    }

    fn stats(&self, id: &ContainerId) -> Result<MetricsSnapshot> {
        let _ = self.lock().entry(id)?;
        Ok(MetricsSnapshot::empty(id.clone()))
    }

    fn update_env(&self, id: &ContainerId, key: &str, value: Option<&str>) -> Result<()> {
        if key.is_empty() || key.contains(['=', '\0']) {
            return Err(AppboxError::invalid(format!("invalid environment variable name: {key:?}")));
        }
        let mut inner = self.lock();
        let entry = inner.entry(id)?;
        match value {
            Some(value) => {
                let _ = entry.env.insert(key.to_string(), value.to_string());
            }
            None => {
                let _ = entry.env.remove(key);
            }
        }
        Ok(())
    }

    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
