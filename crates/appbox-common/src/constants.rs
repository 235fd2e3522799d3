//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Default base directory for appbox data on a host with root access.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/appbox";

/// Returns the data directory, preferring `$HOME/.appbox`, falling back
/// to `/var/lib/appbox`.
fn resolve_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        let user_dir = PathBuf::from(home).join(".appbox");
        if std::fs::create_dir_all(&user_dir).is_ok() {
            return user_dir;
        }
    }
    PathBuf::from(SYSTEM_DATA_DIR)
}

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved data directory for this session.
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(resolve_data_dir)
}

/// Name of the container index file inside the data directory.
pub const STATE_FILE_NAME: &str = "containers.json";

/// Default root of the per-container cgroups below each subsystem mount.
pub const DEFAULT_CGROUP_ROOT: &str = "/appbox";

/// Subsystems a container cgroup is created in, in this order.
pub const DEFAULT_CGROUP_SUBSYSTEMS: &[&str] = &["cpu", "cpuacct", "memory", "net_cls", "freezer"];

/// libcgroup rules file read by `cgrulesengd`.
pub const CGRULES_PATH: &str = "/etc/cgrules.conf";

/// libcgroup configuration file read by `cgconfigparser`.
pub const CGCONFIG_PATH: &str = "/etc/cgconfig.conf";

/// Process name of the libcgroup rules daemon.
pub const CGRULES_DAEMON: &str = "cgrulesengd";

/// Default proc filesystem mount.
pub const PROC_ROOT: &str = "/proc";

/// Default mount table.
pub const MOUNTS_FILE: &str = "/proc/mounts";

/// Number of uids mapped onto distinct loopback address blocks.
pub const DEFAULT_UID_WRAPAROUND: u32 = 65536;

/// Block offset applied to uids above the wraparound.
pub const DEFAULT_IP_OFFSET: u32 = 1;

/// First address of the loopback range used for container addresses.
pub const LOOPBACK_START: u32 = 0x7F00_0000;

/// Directory holding per-container home directories.
pub const DEFAULT_CONTAINER_HOME: &str = "/var/lib/appbox/containers";

/// Directory below the container home that uploaded builds unpack into.
pub const DEPLOYMENT_DIR: &str = "app";

/// Login shell of container users.
pub const DEFAULT_CONTAINER_SHELL: &str = "/bin/bash";

/// Seconds a container gets between SIGTERM and SIGKILL.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

/// Prefix applied to container environment variables set by the platform.
pub const ENV_PREFIX: &str = "APPBOX_";

/// Label holding the application name.
pub const LABEL_APP_NAME: &str = "appbox.app.name";
/// Label holding the application namespace.
pub const LABEL_APP_NAMESPACE: &str = "appbox.app.namespace";
/// Label holding the service name, absent on framework containers.
pub const LABEL_SERVICE_NAME: &str = "appbox.service.name";
/// Label holding the plugin tag.
pub const LABEL_PLUGIN_TAG: &str = "appbox.plugin.tag";
/// Label holding the plugin category.
pub const LABEL_CATEGORY: &str = "appbox.plugin.category";
/// Label holding the replica index within a scaling group.
pub const LABEL_REPLICA: &str = "appbox.replica";

/// Application name used in CLI output, keys, and state files.
pub const APP_NAME: &str = "appbox";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "abx";
