//! OS-level sandboxing of application containers.
//!
//! A container is backed by a dedicated OS user whose home directory holds
//! the application. [`ContainerPlugin`] is the capability set needed to
//! manage that user; the variant is picked once per host by
//! [`Platform::detect`]. Only the Linux variant enforces cgroup limits.

mod command;
pub mod keys;
pub mod linux;
pub mod macos;
pub mod network;
pub mod unix;

use std::collections::BTreeMap;
use std::fs;
use std::net::Ipv4Addr;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use appbox_common::config::{NetworkConfig, SandboxConfig};
use appbox_common::constants::ENV_PREFIX;
use appbox_common::error::{AppboxError, Result};
use nix::unistd::{Gid, Uid, User, chown};

use crate::cgroup::CgroupHost;
use crate::fsutil;
pub use keys::AuthorizedKey;

/// Everything a plugin needs to know about the container it manages.
#[derive(Debug, Clone)]
pub struct Sandbox {
    /// Container id, also used as the OS user name.
    pub id: String,
    /// Uid to create the user with; the system picks one when `None`.
    pub uid: Option<u32>,
    /// Home directory of the user.
    pub home: PathBuf,
    /// Login shell, also forced for SSH sessions.
    pub shell: String,
    /// Address allocation settings.
    pub network: NetworkConfig,
    /// Cgroup parameters applied when the user is created.
    pub limits: BTreeMap<String, String>,
}

impl Sandbox {
    /// A sandbox for container `id` laid out below the configured home root.
    #[must_use]
    pub fn new(id: impl Into<String>, settings: &SandboxConfig, network: NetworkConfig) -> Self {
        let id = id.into();
        Self {
            home: settings.home_root.join(&id),
            id,
            uid: None,
            shell: settings.shell.clone(),
            network,
            limits: BTreeMap::new(),
        }
    }

    /// Directory holding one file per environment variable.
    #[must_use]
    pub fn env_dir(&self) -> PathBuf {
        self.home.join(".env")
    }

    /// The user's `authorized_keys` file.
    #[must_use]
    pub fn authorized_keys_file(&self) -> PathBuf {
        self.home.join(".ssh").join("authorized_keys")
    }
}

/// Capability set for sandboxing a container as an OS user.
///
/// Implementors provide user management and process control; the
/// lifecycle, key, environment, and permission operations are built on
/// top of them.
pub trait ContainerPlugin: Send + Sync + std::fmt::Debug {
    /// The container this plugin manages.
    fn sandbox(&self) -> &Sandbox;

    /// Creates the OS user.
    ///
    /// # Errors
    ///
    /// Returns an error if the user cannot be created.
    fn create_user(&self) -> Result<()>;

    /// Deletes the OS user and everything it owns.
    ///
    /// # Errors
    ///
    /// Returns an error if any part of the teardown fails.
    fn delete_user(&self) -> Result<()>;

    /// Kills every process of the user. With a delay, processes get
    /// SIGTERM first and SIGKILL once the delay has passed.
    ///
    /// # Errors
    ///
    /// Returns an error if the processes cannot be enumerated or signalled.
    fn kill_procs(&self, term_delay: Option<Duration>) -> Result<()>;

    /// Hook run after a process was spawned through [`ContainerPlugin::join`].
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be placed under the
    /// container's resource limits.
    fn after_spawn(&self, pid: u32) -> Result<()> {
        let _ = pid;
        Ok(())
    }

    /// Uid and gid of the OS user.
    ///
    /// # Errors
    ///
    /// Returns [`AppboxError::NotFound`] if the user does not exist.
    fn account(&self) -> Result<(u32, u32)> {
        let id = &self.sandbox().id;
        match User::from_name(id) {
            Ok(Some(user)) => Ok((user.uid.as_raw(), user.gid.as_raw())),
            Ok(None) => Err(AppboxError::NotFound {
                kind: "user",
                id: id.clone(),
            }),
            Err(e) => Err(AppboxError::io("/etc/passwd", e.into())),
        }
    }

    /// Creates and populates the home directory.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created or handed over.
    fn create_home_dir(&self) -> Result<()> {
        let sandbox = self.sandbox();
        let (uid, gid) = self.account()?;
        fsutil::ensure_dir(&sandbox.home, 0o750)?;
        chown(&sandbox.home, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
            .map_err(|e| AppboxError::io(&sandbox.home, e.into()))?;

        let env_dir = sandbox.env_dir();
        fsutil::ensure_dir(&env_dir, 0o750)?;
        self.set_file_read_only(&env_dir)?;
        let ssh_dir = sandbox.home.join(".ssh");
        fsutil::ensure_dir(&ssh_dir, 0o750)?;
        self.set_file_read_only(&ssh_dir)?;
        tracing::debug!(id = %sandbox.id, home = %sandbox.home.display(), "home directory created");
        Ok(())
    }

    /// Creates the sandbox. A failure after the user was created deletes
    /// it again before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns the error of the step that failed.
    fn create(&self) -> Result<()> {
        let result = self.create_user().and_then(|()| self.create_home_dir());
        if let Err(e) = result {
            if let Err(cleanup) = self.delete_user() {
                tracing::warn!(id = %self.sandbox().id, error = %cleanup, "rollback of container user failed");
            }
            return Err(e);
        }
        tracing::info!(id = %self.sandbox().id, "container sandbox created");
        Ok(())
    }

    /// Stops every process and removes the user with its files.
    /// Failures are logged, never returned.
    fn destroy(&self) {
        let id = &self.sandbox().id;
        if let Err(e) = self.kill_procs(None) {
            tracing::warn!(id = %id, error = %e, "failed to kill container processes");
        }
        if let Err(e) = self.delete_user() {
            tracing::warn!(id = %id, error = %e, "failed to delete container user");
        }
        tracing::info!(id = %id, "container sandbox destroyed");
    }

    /// Starts the sandbox. Nothing needs to happen by default.
    ///
    /// # Errors
    ///
    /// Returns an error if a platform hook fails.
    fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Stops every process, giving them `term_delay` to exit cleanly.
    ///
    /// # Errors
    ///
    /// Returns an error if the processes cannot be signalled.
    fn stop(&self, term_delay: Duration) -> Result<()> {
        self.kill_procs(Some(term_delay))
    }

    /// Prepares `cmd` to run as the container user inside its home, with
    /// the container environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the user or its environment cannot be read.
    fn join(&self, cmd: &mut Command) -> Result<()> {
        let sandbox = self.sandbox();
        let (uid, gid) = self.account()?;
        let _ = cmd
            .uid(uid)
            .gid(gid)
            .current_dir(&sandbox.home)
            .env("HOME", &sandbox.home)
            .env("USER", &sandbox.id)
            .env("SHELL", &sandbox.shell)
            .envs(self.env_vars()?);
        Ok(())
    }

    /// Loopback address `host_id` of this container.
    ///
    /// # Errors
    ///
    /// Returns an error if the user does not exist or the inputs are out
    /// of range.
    fn ip_address(&self, host_id: u32) -> Result<Ipv4Addr> {
        let (uid, _) = self.account()?;
        network::ip_address(uid, host_id, &self.sandbox().network)
    }

    /// Returns `true` if `ip:port` accepts connections.
    fn is_address_in_use(&self, ip: Ipv4Addr, port: u16) -> bool {
        network::is_address_in_use(ip, port)
    }

    /// Makes a file readable but not writable by the container user.
    ///
    /// # Errors
    ///
    /// Returns an error if ownership or mode cannot be changed.
    fn set_file_read_only(&self, path: &Path) -> Result<()> {
        let (_, gid) = self.account()?;
        chown(path, Some(Uid::from_raw(0)), Some(Gid::from_raw(gid))).map_err(|e| AppboxError::io(path, e.into()))?;
        fsutil::set_mode(path, if path.is_dir() { 0o750 } else { 0o640 })
    }

    /// Hands a file over to the container user.
    ///
    /// # Errors
    ///
    /// Returns an error if ownership or mode cannot be changed.
    fn set_file_read_write(&self, path: &Path) -> Result<()> {
        let (uid, gid) = self.account()?;
        chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid))).map_err(|e| AppboxError::io(path, e.into()))?;
        fsutil::set_mode(path, if path.is_dir() { 0o770 } else { 0o660 })
    }

    /// Applies [`ContainerPlugin::set_file_read_only`] to a whole tree.
    ///
    /// # Errors
    ///
    /// Returns the first failure.
    fn set_file_tree_read_only(&self, dir: &Path) -> Result<()> {
        walk(dir, &mut |path| self.set_file_read_only(path))
    }

    /// Applies [`ContainerPlugin::set_file_read_write`] to a whole tree.
    ///
    /// # Errors
    ///
    /// Returns the first failure.
    fn set_file_tree_read_write(&self, dir: &Path) -> Result<()> {
        walk(dir, &mut |path| self.set_file_read_write(path))
    }

    /// Grants `key` SSH access under `id`, replacing an existing entry
    /// for the same key.
    ///
    /// # Errors
    ///
    /// Returns [`AppboxError::InvalidKey`] for a malformed key, or an I/O
    /// error if the file cannot be rewritten.
    fn add_authorized_key(&self, id: &str, key: &str) -> Result<()> {
        let key = AuthorizedKey::parse(id, key)?;
        let sandbox = self.sandbox();
        let line = key.to_line(&sandbox.shell);
        rewrite_authorized_keys(self, &key.body, Some(&line))?;
        tracing::info!(id = %sandbox.id, key_id = %id, "authorized key added");
        Ok(())
    }

    /// Revokes SSH access for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`AppboxError::InvalidKey`] for a malformed key, or an I/O
    /// error if the file cannot be rewritten.
    fn remove_authorized_key(&self, key: &str) -> Result<()> {
        let key = AuthorizedKey::parse("", key)?;
        rewrite_authorized_keys(self, &key.body, None)
    }

    /// Keys currently granted SSH access.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    fn authorized_keys(&self) -> Result<Vec<AuthorizedKey>> {
        let path = self.sandbox().authorized_keys_file();
        match fs::read_to_string(&path) {
            Ok(content) => Ok(content.lines().filter_map(AuthorizedKey::from_line).collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(AppboxError::io(&path, e)),
        }
    }

    /// Sets an environment variable for every process of the container.
    /// With `prefix`, the name is prefixed with `APPBOX_`.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid name or if the file cannot be written.
    fn add_env_var(&self, key: &str, value: &str, prefix: bool) -> Result<()> {
        let file = env_file(self.sandbox(), key, prefix)?;
        if let Some(dir) = file.parent() {
            fsutil::ensure_dir(dir, 0o750)?;
        }
        fs::write(&file, value).map_err(|e| AppboxError::io(&file, e))?;
        self.set_file_read_only(&file)
    }

    /// Removes an environment variable; removing an unset one succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid name or if the file cannot be removed.
    fn remove_env_var(&self, key: &str, prefix: bool) -> Result<()> {
        let file = env_file(self.sandbox(), key, prefix)?;
        match fs::remove_file(&file) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(AppboxError::io(&file, e)),
            _ => Ok(()),
        }
    }

    /// The container environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment directory cannot be listed.
    fn env_vars(&self) -> Result<BTreeMap<String, String>> {
        let dir = self.sandbox().env_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(AppboxError::io(&dir, e)),
        };
        let mut vars = BTreeMap::new();
        for entry in entries.filter_map(std::result::Result::ok) {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if let Ok(value) = fs::read_to_string(entry.path()) {
                let _ = vars.insert(name, value);
            }
        }
        Ok(vars)
    }
}

fn rewrite_authorized_keys<P: ContainerPlugin + ?Sized>(plugin: &P, body: &str, line: Option<&str>) -> Result<()> {
    let path = plugin.sandbox().authorized_keys_file();
    if let Some(dir) = path.parent() {
        fsutil::ensure_dir(dir, 0o750)?;
    }
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(AppboxError::io(&path, e)),
    };
    fsutil::write_atomic(&path, keys::rewrite(&content, body, line).as_bytes())?;
    plugin.set_file_read_only(&path)
}

fn env_file(sandbox: &Sandbox, key: &str, prefix: bool) -> Result<PathBuf> {
    if key.is_empty() || key.starts_with('.') || key.contains(['/', '=', '\0']) {
        return Err(AppboxError::invalid(format!("invalid environment variable name: {key:?}")));
    }
    let name = if prefix {
        format!("{ENV_PREFIX}{key}")
    } else {
        key.to_string()
    };
    Ok(sandbox.env_dir().join(name))
}

fn walk(path: &Path, f: &mut dyn FnMut(&Path) -> Result<()>) -> Result<()> {
    f(path)?;
    let meta = fs::symlink_metadata(path).map_err(|e| AppboxError::io(path, e))?;
    if meta.is_dir() {
        for entry in fs::read_dir(path).map_err(|e| AppboxError::io(path, e))? {
            let entry = entry.map_err(|e| AppboxError::io(path, e))?;
            walk(&entry.path(), f)?;
        }
    }
    Ok(())
}

/// Host operating system family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Linux, with cgroup enforcement.
    Linux,
    /// macOS.
    Darwin,
    /// Any other Unix.
    Unix,
}

impl Platform {
    /// Maps an OS name as reported by [`std::env::consts::OS`].
    ///
    /// # Errors
    ///
    /// Returns [`AppboxError::Unsupported`] for non-Unix systems.
    pub fn from_os(os: &str) -> Result<Self> {
        match os {
            "linux" => Ok(Self::Linux),
            "macos" => Ok(Self::Darwin),
            "freebsd" | "openbsd" | "netbsd" | "dragonfly" | "solaris" | "illumos" => Ok(Self::Unix),
            other => Err(AppboxError::Unsupported {
                message: format!("unsupported platform: {other}"),
            }),
        }
    }

    /// The platform this process runs on.
    ///
    /// # Errors
    ///
    /// Returns [`AppboxError::Unsupported`] on non-Unix systems.
    pub fn detect() -> Result<Self> {
        Self::from_os(std::env::consts::OS)
    }

    /// The plugin managing `sandbox` on this platform.
    #[must_use]
    pub fn plugin(self, sandbox: Sandbox, cgroups: Arc<CgroupHost>) -> Box<dyn ContainerPlugin> {
        match self {
            Self::Linux => Box::new(linux::LinuxPlugin::new(sandbox, cgroups)),
            Self::Darwin => Box::new(macos::MacOsPlugin::new(sandbox)),
            Self::Unix => Box::new(unix::UnixPlugin::new(sandbox)),
        }
    }
}
