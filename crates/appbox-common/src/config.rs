//! Global configuration model for appbox.
//!
//! The configuration is a JSON document whose missing fields take their
//! defaults, overridden by `APPBOX_*` environment variables.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{AppboxError, Result};

/// Which container backend the engine drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// OS user sandboxes with cgroup limits.
    #[default]
    Native,
    /// In-process containers without isolation.
    Memory,
}

/// Root configuration for appbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppboxConfig {
    /// Base directory for appbox state and data.
    pub data_dir: PathBuf,
    /// Path to the container index file.
    pub state_file: PathBuf,
    /// Container backend.
    pub backend: BackendKind,
    /// Cgroup settings.
    pub cgroup: CgroupConfig,
    /// Container address allocation.
    pub network: NetworkConfig,
    /// Sandbox user settings.
    pub container: SandboxConfig,
}

impl Default for AppboxConfig {
    fn default() -> Self {
        let data_dir = constants::data_dir().clone();
        Self {
            state_file: data_dir.join(constants::STATE_FILE_NAME),
            data_dir,
            backend: BackendKind::default(),
            cgroup: CgroupConfig::default(),
            network: NetworkConfig::default(),
            container: SandboxConfig::default(),
        }
    }
}

/// Cgroup hierarchy settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CgroupConfig {
    /// Directory below each subsystem mount holding container groups.
    pub root: String,
    /// Subsystems every container group is created in.
    pub subsystems: Vec<String>,
    /// libcgroup rules file.
    pub rules_file: PathBuf,
    /// libcgroup configuration file.
    pub config_file: PathBuf,
    /// Proc filesystem used to enumerate tasks.
    pub proc_root: PathBuf,
    /// Mount table used to locate subsystem mounts.
    pub mounts_file: PathBuf,
    /// Parameter values applied to every new group, e.g. `memory.limit_in_bytes`.
    pub defaults: BTreeMap<String, String>,
}

impl Default for CgroupConfig {
    fn default() -> Self {
        Self {
            root: constants::DEFAULT_CGROUP_ROOT.to_string(),
            subsystems: constants::DEFAULT_CGROUP_SUBSYSTEMS
                .iter()
                .map(ToString::to_string)
                .collect(),
            rules_file: PathBuf::from(constants::CGRULES_PATH),
            config_file: PathBuf::from(constants::CGCONFIG_PATH),
            proc_root: PathBuf::from(constants::PROC_ROOT),
            mounts_file: PathBuf::from(constants::MOUNTS_FILE),
            defaults: BTreeMap::new(),
        }
    }
}

/// Loopback address allocation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Number of uids mapped onto distinct address blocks.
    pub uid_wraparound: u32,
    /// Block offset for uids above the wraparound.
    pub ip_offset: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            uid_wraparound: constants::DEFAULT_UID_WRAPAROUND,
            ip_offset: constants::DEFAULT_IP_OFFSET,
        }
    }
}

/// Settings for the OS user backing each container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Directory holding container home directories.
    pub home_root: PathBuf,
    /// Login shell of container users.
    pub shell: String,
    /// Grace period between SIGTERM and SIGKILL when stopping.
    pub stop_timeout_secs: u64,
    /// Command run in the container when it starts; empty runs nothing.
    pub command: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            home_root: PathBuf::from(constants::DEFAULT_CONTAINER_HOME),
            shell: constants::DEFAULT_CONTAINER_SHELL.to_string(),
            stop_timeout_secs: constants::DEFAULT_STOP_TIMEOUT_SECS,
            command: Vec::new(),
        }
    }
}

impl AppboxConfig {
    /// Loads the configuration from a JSON file, then applies the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an
    /// environment override is malformed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| AppboxError::io(path, e))?;
        let mut config: Self = serde_json::from_str(&content)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Defaults overridden by the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment override is malformed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies `APPBOX_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric or enumerated override cannot be parsed.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = lookup("APPBOX_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
            self.state_file = self.data_dir.join(constants::STATE_FILE_NAME);
        }
        if let Some(backend) = lookup("APPBOX_BACKEND") {
            self.backend = match backend.as_str() {
                "native" => BackendKind::Native,
                "memory" => BackendKind::Memory,
                other => {
                    return Err(AppboxError::Config {
                        message: format!("unknown backend '{other}'"),
                    });
                }
            };
        }
        if let Some(root) = lookup("APPBOX_CGROUP_ROOT") {
            self.cgroup.root = root;
        }
        if let Some(subsystems) = lookup("APPBOX_CGROUP_SUBSYSTEMS") {
            self.cgroup.subsystems = subsystems
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect();
        }
        if let Some(value) = lookup("APPBOX_UID_WRAPAROUND") {
            self.network.uid_wraparound = parse_number("APPBOX_UID_WRAPAROUND", &value)?;
        }
        if let Some(value) = lookup("APPBOX_IP_OFFSET") {
            self.network.ip_offset = parse_number("APPBOX_IP_OFFSET", &value)?;
        }
        Ok(())
    }
}

fn parse_number(key: &str, value: &str) -> Result<u32> {
    value.trim().parse().map_err(|_| AppboxError::Config {
        message: format!("{key} must be a non-negative integer, got '{value}'"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_host_tooling() {
        let config = AppboxConfig::default();
        assert_eq!(config.cgroup.root, "/appbox");
        assert_eq!(
            config.cgroup.subsystems,
            vec!["cpu", "cpuacct", "memory", "net_cls", "freezer"]
        );
        assert_eq!(config.cgroup.rules_file, PathBuf::from("/etc/cgrules.conf"));
        assert_eq!(config.network.uid_wraparound, 65536);
        assert_eq!(config.network.ip_offset, 1);
        assert_eq!(config.backend, BackendKind::Native);
    }

    #[test]
    fn load_fills_missing_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("appbox.json");
        std::fs::write(
            &path,
            r#"{ "backend": "memory", "network": { "ip_offset": 7 } }"#,
        )
        .expect("write");

        let config = AppboxConfig::load(&path).expect("load");
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.network.ip_offset, 7);
        assert_eq!(config.network.uid_wraparound, 65536);
        assert_eq!(config.cgroup.root, "/appbox");
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppboxConfig::default();
        config
            .apply_env(|key| match key {
                "APPBOX_CGROUP_SUBSYSTEMS" => Some("cpu, memory".into()),
                "APPBOX_UID_WRAPAROUND" => Some("1000".into()),
                "APPBOX_DATA_DIR" => Some("/srv/appbox".into()),
                _ => None,
            })
            .expect("apply");
        assert_eq!(config.cgroup.subsystems, vec!["cpu", "memory"]);
        assert_eq!(config.network.uid_wraparound, 1000);
        assert_eq!(config.state_file, PathBuf::from("/srv/appbox/containers.json"));
    }

    #[test]
    fn malformed_env_override_is_rejected() {
        let mut config = AppboxConfig::default();
        let err = config
            .apply_env(|key| (key == "APPBOX_IP_OFFSET").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, AppboxError::Config { .. }));

        let err = config
            .apply_env(|key| (key == "APPBOX_BACKEND").then(|| "docker".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("docker"));
    }
}
