//! Native backend: every container is an OS user sandbox.
//!
//! The sandbox is managed through the host's [`ContainerPlugin`]; the
//! container index lives in a JSON state file rewritten atomically.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use appbox_common::config::{AppboxConfig, NetworkConfig, SandboxConfig};
use appbox_common::error::{AppboxError, Result};
use appbox_common::types::{ContainerId, ContainerState};
use appbox_core::cgroup::CgroupHost;
use appbox_core::plugin::{ContainerPlugin, Platform, Sandbox};
use nix::unistd::geteuid;

use super::{ContainerBackend, ContainerInfo, ContainerSpec, LabelFilter};
use crate::exec::{Attached, ExecConfig, ExecInspect, ExecTable};
use crate::metrics::MetricsSnapshot;
use crate::process;
use crate::state::{self, StateEntry, StateIndex};

/// Backend creating OS users confined by cgroups.
#[derive(Debug)]
pub struct NativeBackend {
    state_file: PathBuf,
    platform: Platform,
    cgroups: Arc<CgroupHost>,
    sandbox: SandboxConfig,
    network: NetworkConfig,
    defaults: BTreeMap<String, String>,
    state_lock: Mutex<()>,
    execs: ExecTable,
}

impl NativeBackend {
    /// Creates the backend for this host. Cgroups are discovered on Linux
    /// and disabled elsewhere.
    ///
    /// # Errors
    ///
    /// Returns [`AppboxError::Unsupported`] on non-Unix platforms.
    pub fn new(config: &AppboxConfig) -> Result<Self> {
        let platform = Platform::detect()?;
        let cgroups = if platform == Platform::Linux {
            CgroupHost::discover(&config.cgroup)
        } else {
            CgroupHost::disabled(&config.cgroup)
        };
        Ok(Self::with_host(config, platform, cgroups))
    }

    /// Creates the backend with an explicit platform and cgroup layout.
    #[must_use]
    pub fn with_host(config: &AppboxConfig, platform: Platform, cgroups: CgroupHost) -> Self {
        Self {
            state_file: config.state_file.clone(),
            platform,
            cgroups: Arc::new(cgroups),
            sandbox: config.container.clone(),
            network: config.network,
            defaults: config.cgroup.defaults.clone(),
            state_lock: Mutex::new(()),
            execs: ExecTable::default(),
        }
    }

    fn plugin(&self, id: &ContainerId, limits: BTreeMap<String, String>) -> Box<dyn ContainerPlugin> {
        let mut sandbox = Sandbox::new(id.as_str(), &self.sandbox, self.network);
        sandbox.limits = limits;
        self.platform.plugin(sandbox, Arc::clone(&self.cgroups))
    }

    fn lock_state(&self) -> Result<(MutexGuard<'_, ()>, StateIndex)> {
        let guard = self.state_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let index = state::load_state(&self.state_file)?;
        Ok((guard, index))
    }

    fn entry(&self, id: &ContainerId) -> Result<StateEntry> {
        let (_guard, index) = self.lock_state()?;
        index.get(id).cloned().ok_or_else(|| AppboxError::NotFound {
            kind: "container",
            id: id.to_string(),
        })
    }

    fn spawn_main(&self, plugin: &dyn ContainerPlugin) -> Result<()> {
        let Some((program, args)) = self.sandbox.command.split_first() else {
            return Ok(());
        };
        let mut cmd = Command::new(program);
        let _ = cmd.args(args).stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
        plugin.join(&mut cmd)?;
        let mut child = cmd.spawn().map_err(|e| AppboxError::Command {
            command: program.clone(),
            message: e.to_string(),
        })?;
        if let Err(e) = plugin.after_spawn(child.id()) {
            tracing::warn!(id = %plugin.sandbox().id, error = %e, "failed to confine container command");
        }
        let _ = thread::spawn(move || child.wait());
        Ok(())
    }
}

fn to_info(entry: &StateEntry) -> ContainerInfo {
    ContainerInfo {
        id: entry.id.clone(),
        name: entry.name.clone(),
        labels: entry.labels.clone(),
        state: entry.state,
        ip: entry.ip,
        created_at: entry.created_at,
        started_at: entry.started_at,
    }
}

impl ContainerBackend for NativeBackend {
    fn create(&self, spec: &ContainerSpec) -> Result<ContainerInfo> {
        let (_guard, mut index) = self.lock_state()?;
        if index.containers.iter().any(|e| e.name == spec.name) {
            return Err(AppboxError::AlreadyExists {
                kind: "container",
                id: spec.name.clone(),
            });
        }

        let id = ContainerId::generate();
        let mut limits = self.defaults.clone();
        limits.extend(spec.limits.iter().map(|(k, v)| (k.clone(), v.clone())));
        let plugin = self.plugin(&id, limits);
        plugin.create()?;

        let populated = spec
            .env
            .iter()
            .try_for_each(|(key, value)| plugin.add_env_var(key, value, false));
        if let Err(e) = populated {
            plugin.destroy();
            return Err(e);
        }

        let ip = match plugin.ip_address(1) {
            Ok(ip) => Some(ip),
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "no address for container");
                None
            }
        };
        let entry = StateEntry {
            id: id.clone(),
            name: spec.name.clone(),
            labels: spec.labels.clone(),
            state: ContainerState::Created,
            ip,
            created_at: chrono::Utc::now(),
            started_at: None,
        };
        index.containers.push(entry.clone());
        if let Err(e) = state::save_state(&self.state_file, &index) {
            plugin.destroy();
            return Err(e);
        }
        tracing::info!(id = %id, name = %spec.name, "container created (native)");
        Ok(to_info(&entry))
    }

    fn start(&self, id: &ContainerId) -> Result<()> {
        let (_guard, mut index) = self.lock_state()?;
        let entry = index.get_mut(id)?;
        if entry.state == ContainerState::Running {
            return Ok(());
        }
        let plugin = self.plugin(id, BTreeMap::new());
        plugin.start()?;
        self.spawn_main(plugin.as_ref())?;
        entry.state = ContainerState::Running;
        entry.started_at = Some(chrono::Utc::now());
        state::save_state(&self.state_file, &index)?;
        tracing::info!(id = %id, "container started (native)");
        Ok(())
    }

    fn stop(&self, id: &ContainerId, timeout: Duration) -> Result<()> {
        let (_guard, mut index) = self.lock_state()?;
        let entry = index.get_mut(id)?;
        self.plugin(id, BTreeMap::new()).stop(timeout)?;
        entry.state = ContainerState::Stopped;
        entry.started_at = None;
        state::save_state(&self.state_file, &index)?;
        tracing::info!(id = %id, "container stopped (native)");
        Ok(())
    }

    fn remove(&self, id: &ContainerId) -> Result<()> {
        let (_guard, mut index) = self.lock_state()?;
        let _ = index.get_mut(id)?;
        self.plugin(id, BTreeMap::new()).destroy();
        index.containers.retain(|e| e.id != *id);
        self.execs.forget(id);
        state::save_state(&self.state_file, &index)?;
        tracing::info!(id = %id, "container removed (native)");
        Ok(())
    }

    fn inspect(&self, id: &ContainerId) -> Result<ContainerInfo> {
        self.entry(id).map(|e| to_info(&e))
    }

    fn list(&self, filter: &LabelFilter) -> Result<Vec<ContainerInfo>> {
        let (_guard, index) = self.lock_state()?;
        Ok(index
            .containers
            .iter()
            .filter(|e| filter.matches(&e.labels))
            .map(to_info)
            .collect())
    }

    fn exec_create(&self, id: &ContainerId, config: &ExecConfig) -> Result<String> {
        let _ = self.entry(id)?;
        self.execs.insert(id, config)
    }

    fn exec_attach(&self, exec_id: &str) -> Result<Attached> {
        let exec = self.execs.get(exec_id)?;
        let plugin = self.plugin(&exec.container, BTreeMap::new());
        let Some((program, args)) = exec.config.cmd.split_first() else {
            return Err(AppboxError::invalid("exec command is empty"));
        };
        let mut cmd = Command::new(program);
        let _ = cmd.args(args);
        match exec.config.user.as_deref() {
            None => plugin.join(&mut cmd)?,
            Some(user) if user == exec.container.as_str() => plugin.join(&mut cmd)?,
            Some("root") => {
                let _ = cmd.current_dir(&plugin.sandbox().home).envs(plugin.env_vars()?);
            }
            Some(other) => {
                return Err(AppboxError::invalid(format!(
                    "cannot run as {other} in container {}",
                    exec.container
                )));
            }
        }
        process::spawn_attached(cmd, &exec.config, Arc::clone(&exec.status), |pid| {
            plugin.after_spawn(pid)
        })
    }

    fn exec_inspect(&self, exec_id: &str) -> Result<ExecInspect> {
        Ok(self.execs.get(exec_id)?.status.snapshot())
    }

    fn stats(&self, id: &ContainerId) -> Result<MetricsSnapshot> {
        let _ = self.entry(id)?;
        if !self.cgroups.is_enabled() {
            return Ok(MetricsSnapshot::empty(id.clone()));
        }
        let (uid, gid) = self.plugin(id, BTreeMap::new()).account()?;
        let params = self.cgroups.cgroup(id.as_str(), uid).with_gid(gid).fetch()?;
        Ok(MetricsSnapshot::from_params(id.clone(), &params))
    }

    fn update_env(&self, id: &ContainerId, key: &str, value: Option<&str>) -> Result<()> {
        let _ = self.entry(id)?;
        let plugin = self.plugin(id, BTreeMap::new());
        match value {
            Some(value) => plugin.add_env_var(key, value, false),
            None => plugin.remove_env_var(key, false),
        }
    }

    fn is_available(&self) -> bool {
        geteuid().is_root()
    }

    fn name(&self) -> &'static str {
        "native"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(dir: &std::path::Path) -> NativeBackend {
        let config = AppboxConfig {
            data_dir: dir.to_path_buf(),
            state_file: dir.join("containers.json"),
            ..AppboxConfig::default()
        };
        NativeBackend::with_host(&config, Platform::Linux, CgroupHost::disabled(&config.cgroup))
    }

    #[test]
    fn unknown_containers_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let id = ContainerId::new("cmissing");
        assert!(backend.inspect(&id).unwrap_err().is_not_found());
        assert!(backend.start(&id).unwrap_err().is_not_found());
        assert!(backend.remove(&id).unwrap_err().is_not_found());
        assert!(backend.exec_create(&id, &ExecConfig::default()).unwrap_err().is_not_found());
        assert!(backend.list(&LabelFilter::new()).unwrap().is_empty());
    }

    #[test]
    fn listing_reads_the_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let index = StateIndex {
            containers: vec![StateEntry {
                id: ContainerId::new("cabc"),
                name: "blog-acme".into(),
                labels: BTreeMap::from([("app".to_string(), "blog".to_string())]),
                state: ContainerState::Running,
                ip: None,
                created_at: chrono::Utc::now(),
                started_at: None,
            }],
        };
        state::save_state(&dir.path().join("containers.json"), &index).unwrap();

        let found = backend.list(&LabelFilter::new().with("app", "blog")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].state, ContainerState::Running);
        assert!(backend.list(&LabelFilter::new().with("app", "wiki")).unwrap().is_empty());
        assert_eq!(
            backend.stats(&ContainerId::new("cabc")).unwrap(),
            MetricsSnapshot::empty(ContainerId::new("cabc"))
        );
    }
}
