//! Cgroup (v1) resource management for container users.
//!
//! Every container gets one group per configured subsystem, placed at
//! `<subsystem mount>/<cgroup root>/<uuid>`. The libcgroup files
//! `cgconfig.conf` and `cgrules.conf` are kept in sync so that the rules
//! daemon classifies processes started outside of appbox as well.

pub mod params;
pub mod tasks;

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use appbox_common::config::CgroupConfig;
use appbox_common::constants::CGRULES_DAEMON;
use appbox_common::error::{AppboxError, Result};
use nix::sys::signal::{Signal, kill};
use nix::unistd::{Gid, Pid, Uid, chown};

use crate::fsutil;
pub use params::ParamValue;
use params::{ConfigNode, subsystem_of};

/// Cgroup layout of the host, discovered once per process.
#[derive(Debug, Clone, Default)]
pub struct CgroupHost {
    root: String,
    subsystems: Vec<String>,
    rules_file: PathBuf,
    config_file: PathBuf,
    proc_root: PathBuf,
    paths: Vec<(String, PathBuf)>,
    parameters: Vec<(String, ParamValue)>,
}

impl CgroupHost {
    /// Discovers subsystem mounts and known parameters.
    ///
    /// Never fails: a host where discovery goes wrong is reported with a
    /// warning and returned disabled.
    #[must_use]
    pub fn discover(config: &CgroupConfig) -> Self {
        match Self::try_discover(config) {
            Ok(host) => {
                tracing::info!(
                    subsystems = host.paths.len(),
                    parameters = host.parameters.len(),
                    "cgroup hierarchy discovered"
                );
                host
            }
            Err(e) => {
                tracing::warn!(error = %e, "cgroup discovery failed, resource limits disabled");
                Self::disabled(config)
            }
        }
    }

    /// A host without any mounted subsystem.
    #[must_use]
    pub fn disabled(config: &CgroupConfig) -> Self {
        Self {
            root: config.root.clone(),
            subsystems: config.subsystems.clone(),
            rules_file: config.rules_file.clone(),
            config_file: config.config_file.clone(),
            proc_root: config.proc_root.clone(),
            paths: Vec::new(),
            parameters: Vec::new(),
        }
    }

    /// Discovery that reports its failure.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount table cannot be read or a subsystem
    /// root cannot be created.
    pub fn try_discover(config: &CgroupConfig) -> Result<Self> {
        let mut host = Self::disabled(config);
        let mounts = read_mounts(&config.mounts_file, &config.subsystems)?;

        for subsystem in &config.subsystems {
            let Some(mount) = mounts.get(subsystem) else {
                continue;
            };
            let path = mount.join(config.root.trim_start_matches('/'));
            fsutil::ensure_dir(&path, 0o755)?;
            host.paths.push((subsystem.clone(), path));
        }

        let mut parameters = Vec::new();
        for (subsystem, path) in &host.paths {
            let entries = fs::read_dir(path).map_err(|e| AppboxError::io(path, e))?;
            let prefix = format!("{subsystem}.");
            let mut files: Vec<String> = entries
                .filter_map(std::result::Result::ok)
                .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
                .filter_map(|entry| entry.file_name().into_string().ok())
                .filter(|name| name.starts_with(&prefix))
                .collect();
            files.sort_by(|a, b| dots(a).cmp(&dots(b)).then_with(|| a.cmp(b)));

            for name in files {
                if parameters.iter().any(|(known, _)| known == &name) {
                    continue;
                }
                let Ok(raw) = fs::read_to_string(path.join(&name)) else {
                    continue;
                };
                parameters.push((name, ParamValue::parse(&raw)));
            }
        }
        host.parameters = parameters;
        Ok(host)
    }

    /// Returns `true` if at least one subsystem is mounted.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.paths.is_empty()
    }

    /// Known parameters with the values found on the host, in discovery order.
    #[must_use]
    pub fn parameters(&self) -> &[(String, ParamValue)] {
        &self.parameters
    }

    /// Proc filesystem the task scans read.
    #[must_use]
    pub fn proc_root(&self) -> &Path {
        &self.proc_root
    }

    /// Root directory of a subsystem's container groups.
    #[must_use]
    pub fn subsystem_path(&self, subsystem: &str) -> Option<&Path> {
        self.paths
            .iter()
            .find(|(name, _)| name == subsystem)
            .map(|(_, path)| path.as_path())
    }

    /// Handle to the group of one container user.
    #[must_use]
    pub fn cgroup(&self, uuid: &str, uid: u32) -> Cgroup<'_> {
        Cgroup {
            host: self,
            uuid: uuid.to_string(),
            uid,
            gid: uid,
        }
    }
}

fn dots(name: &str) -> usize {
    name.matches('.').count()
}

fn read_mounts(mounts_file: &Path, subsystems: &[String]) -> Result<BTreeMap<String, PathBuf>> {
    let table = fs::read_to_string(mounts_file).map_err(|e| AppboxError::io(mounts_file, e))?;
    let mut mounts = BTreeMap::new();
    for line in table.lines() {
        // fs_spec fs_file fs_vtype fs_mntopts fs_freq fs_passno
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 || fields[2] != "cgroup" {
            continue;
        }
        let options: Vec<&str> = fields[3].split(',').collect();
        for subsystem in subsystems {
            if options.contains(&subsystem.as_str()) {
                let _ = mounts.insert(subsystem.clone(), PathBuf::from(fields[1]));
            }
        }
    }
    Ok(mounts)
}

/// The cgroup of one container user.
#[derive(Debug)]
pub struct Cgroup<'a> {
    host: &'a CgroupHost,
    uuid: String,
    uid: u32,
    gid: u32,
}

impl Cgroup<'_> {
    /// Uses a group id different from the uid.
    #[must_use]
    pub const fn with_gid(mut self, gid: u32) -> Self {
        self.gid = gid;
        self
    }

    /// Container uuid this group belongs to.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    fn path(&self, subsystem: &str) -> Option<PathBuf> {
        self.host.subsystem_path(subsystem).map(|p| p.join(&self.uuid))
    }

    fn missing_user(&self, path: &Path) -> AppboxError {
        AppboxError::io(
            path,
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("user does not exist in cgroups: {}", self.uuid),
            ),
        )
    }

    /// Creates the group, registers it with libcgroup, applies the known
    /// parameters present in `defaults`, and classifies the user's tasks.
    ///
    /// Directories created before a failing subsystem are left in place;
    /// [`Cgroup::delete`] removes them.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured subsystem is not mounted or any
    /// file operation fails.
    pub fn create(&self, defaults: &BTreeMap<String, String>) -> Result<()> {
        let mut tree = vec![(
            "perm".to_string(),
            ConfigNode::block([
                (
                    "task",
                    ConfigNode::block([
                        ("uid", ConfigNode::scalar(self.uid)),
                        ("gid", ConfigNode::scalar(self.gid)),
                    ]),
                ),
                (
                    "admin",
                    ConfigNode::block([("uid", ConfigNode::scalar("root")), ("gid", ConfigNode::scalar("root"))]),
                ),
            ]),
        )];
        for subsystem in &self.host.subsystems {
            tree.push((subsystem.clone(), ConfigNode::Block(Vec::new())));
        }

        let mut to_store = BTreeMap::new();
        for (param, _) in &self.host.parameters {
            let (Some(raw), Some(subsystem)) = (defaults.get(param), subsystem_of(param)) else {
                continue;
            };
            let value = ParamValue::parse(raw);
            if let Some((_, ConfigNode::Block(block))) = tree.iter_mut().find(|(name, _)| name == subsystem) {
                block.push((param.clone(), value.to_node()));
                let _ = to_store.insert(param.clone(), value);
            }
        }

        self.make_dirs()?;
        self.update_config(Some(&ConfigNode::Block(tree)))?;
        self.update_rules(true)?;
        self.store(&to_store)?;
        self.classify()?;
        tracing::info!(uuid = %self.uuid, uid = self.uid, "cgroup created");
        Ok(())
    }

    fn make_dirs(&self) -> Result<()> {
        for subsystem in &self.host.subsystems {
            let Some(path) = self.path(subsystem) else {
                return Err(AppboxError::io(
                    &self.host.root,
                    std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("cgroup subsystem {subsystem} is not mounted"),
                    ),
                ));
            };
            fsutil::ensure_dir(&path, 0o755)?;
            let owner = (Some(Uid::from_raw(self.uid)), Some(Gid::from_raw(self.gid)));
            chown(&path, owner.0, owner.1).map_err(|e| AppboxError::io(&path, e.into()))?;
            let tasks = path.join("tasks");
            if tasks.exists() {
                chown(&tasks, owner.0, owner.1).map_err(|e| AppboxError::io(&tasks, e.into()))?;
            }
        }
        Ok(())
    }

    /// Unregisters the group and removes its directories.
    ///
    /// Deleting a group that does not exist succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the libcgroup files cannot be rewritten or a
    /// directory cannot be removed.
    pub fn delete(&self) -> Result<()> {
        self.update_config(None)?;
        self.update_rules(false)?;
        for (subsystem, _) in &self.host.paths {
            let Some(path) = self.path(subsystem) else {
                continue;
            };
            let removed = match fs::remove_dir(&path) {
                Err(e) if e.kind() == std::io::ErrorKind::DirectoryNotEmpty => fs::remove_dir_all(&path),
                other => other,
            };
            match removed {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(AppboxError::io(&path, e)),
            }
        }
        tracing::info!(uuid = %self.uuid, "cgroup deleted");
        Ok(())
    }

    /// Reads the current value of every known parameter.
    ///
    /// # Errors
    ///
    /// Returns an error if the group does not exist or a control file
    /// cannot be read.
    pub fn fetch(&self) -> Result<BTreeMap<String, ParamValue>> {
        let mut values = BTreeMap::new();
        for (param, _) in &self.host.parameters {
            let dir = self.existing_dir(param)?;
            let file = dir.join(param);
            let raw = fs::read_to_string(&file).map_err(|e| AppboxError::io(&file, e))?;
            let _ = values.insert(param.clone(), ParamValue::parse(&raw));
        }
        Ok(values)
    }

    /// Writes parameter values; keys that are not known parameters are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the group does not exist or a control file
    /// cannot be written.
    pub fn store(&self, values: &BTreeMap<String, ParamValue>) -> Result<()> {
        for (param, _) in &self.host.parameters {
            let Some(value) = values.get(param) else {
                continue;
            };
            let dir = self.existing_dir(param)?;
            let file = dir.join(param);
            fs::write(&file, value.format()).map_err(|e| AppboxError::io(&file, e))?;
            tracing::debug!(uuid = %self.uuid, param = %param, "cgroup parameter stored");
        }
        Ok(())
    }

    fn existing_dir(&self, param: &str) -> Result<PathBuf> {
        let path = subsystem_of(param).and_then(|s| self.path(s));
        match path {
            Some(path) if path.is_dir() => Ok(path),
            Some(path) => Err(self.missing_user(&path)),
            None => Err(self.missing_user(Path::new(param))),
        }
    }

    /// Moves every thread owned by the user into the group.
    ///
    /// Threads exiting while they are classified are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the task table cannot be read or a `tasks`
    /// file cannot be written.
    pub fn classify(&self) -> Result<()> {
        let tids: Vec<u32> = tasks::threads(&self.host.proc_root)?
            .into_iter()
            .filter(|t| t.uid == self.uid)
            .map(|t| t.tid)
            .collect();
        if tids.is_empty() {
            return Ok(());
        }

        for (subsystem, _) in &self.host.paths {
            let Some(path) = self.path(subsystem) else {
                continue;
            };
            let file = path.join("tasks");
            let mut out = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .open(&file)
                .map_err(|e| AppboxError::io(&file, e))?;
            for tid in &tids {
                match out.write_all(format!("{tid}\n").as_bytes()) {
                    Ok(()) => {}
                    Err(e) if e.raw_os_error() == Some(nix::libc::ESRCH) => {}
                    Err(e) => return Err(AppboxError::io(&file, e)),
                }
            }
        }
        tracing::debug!(uuid = %self.uuid, tasks = tids.len(), "tasks classified");
        Ok(())
    }

    fn update_rules(&self, recreate: bool) -> Result<()> {
        let entry = recreate.then(|| {
            format!(
                "{}\t{}\t{}/{}\n",
                self.uuid,
                self.host.subsystems.join(","),
                self.host.root,
                self.uuid
            )
        });
        let owner = format!("{}\t", self.uuid);
        fsutil::rewrite_lines(
            &self.host.rules_file,
            |line| !line.starts_with(&owner),
            entry.as_deref(),
        )?;
        self.reload_rules();
        Ok(())
    }

    fn reload_rules(&self) {
        let daemons = match tasks::processes(&self.host.proc_root) {
            Ok(ps) => ps,
            Err(e) => {
                tracing::warn!(error = %e, "cannot scan for the cgroup rules daemon");
                return;
            }
        };
        for task in daemons.iter().filter(|t| t.name == CGRULES_DAEMON) {
            let Ok(pid) = i32::try_from(task.pid) else {
                continue;
            };
            if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGUSR2) {
                tracing::warn!(pid, error = %e, "failed to signal cgroup rules daemon");
            }
        }
    }

    fn update_config(&self, tree: Option<&ConfigNode>) -> Result<()> {
        let prefix = format!("group {}/{} ", self.host.root, self.uuid);
        let entry = tree.map(|tree| format!("{prefix}{}\n", tree.render()));
        fsutil::rewrite_lines(
            &self.host.config_file,
            |line| !line.starts_with(&prefix),
            entry.as_deref(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::tasks::fixture::add_process;
    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        config: CgroupConfig,
        mounts: PathBuf,
    }

    fn fixture(subsystems: &[&str], mounted: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mounts = dir.path().join("mnt");
        let mut table = String::from("proc /proc proc rw,nosuid 0 0\n");
        for subsystem in mounted {
            let mount = mounts.join(subsystem);
            fs::create_dir_all(&mount).unwrap();
            table.push_str(&format!(
                "cgroup {} cgroup rw,nosuid,nodev,noexec,relatime,{subsystem} 0 0\n",
                mount.display()
            ));
        }
        fs::write(dir.path().join("mounts"), table).unwrap();
        fs::create_dir_all(dir.path().join("proc")).unwrap();

        let config = CgroupConfig {
            root: "/appbox".into(),
            subsystems: subsystems.iter().map(ToString::to_string).collect(),
            rules_file: dir.path().join("cgrules.conf"),
            config_file: dir.path().join("cgconfig.conf"),
            proc_root: dir.path().join("proc"),
            mounts_file: dir.path().join("mounts"),
            defaults: BTreeMap::new(),
        };
        Fixture {
            _dir: dir,
            config,
            mounts,
        }
    }

    fn seed_parameters(fx: &Fixture) {
        let cpu = fx.mounts.join("cpu/appbox");
        let memory = fx.mounts.join("memory/appbox");
        fs::create_dir_all(&cpu).unwrap();
        fs::create_dir_all(&memory).unwrap();
        fs::write(cpu.join("cpu.shares"), "1024\n").unwrap();
        fs::write(memory.join("memory.limit_in_bytes"), "9223372036854771712\n").unwrap();
        fs::write(memory.join("memory.memsw.limit_in_bytes"), "9223372036854771712\n").unwrap();
        fs::write(memory.join("memory.stat"), "cache 0\nrss 0\n").unwrap();
        fs::write(memory.join("tasks"), "").unwrap();
    }

    fn current_uid() -> u32 {
        nix::unistd::getuid().as_raw()
    }

    fn current_gid() -> u32 {
        nix::unistd::getgid().as_raw()
    }

    fn own_cgroup<'a>(host: &'a CgroupHost, uuid: &str) -> Cgroup<'a> {
        host.cgroup(uuid, current_uid()).with_gid(current_gid())
    }

    #[test]
    fn discovery_without_mounts_is_disabled() {
        let fx = fixture(&["cpu", "memory"], &[]);
        let host = CgroupHost::discover(&fx.config);
        assert!(!host.is_enabled());
        assert!(host.parameters().is_empty());
    }

    #[test]
    fn discovery_failure_degrades_to_disabled() {
        let mut fx = fixture(&["cpu"], &["cpu"]);
        fx.config.mounts_file = PathBuf::from("/nonexistent/mounts");
        let host = CgroupHost::discover(&fx.config);
        assert!(!host.is_enabled());
    }

    #[test]
    fn discovery_orders_parameters_by_dot_count() {
        let fx = fixture(&["cpu", "memory"], &["cpu", "memory"]);
        seed_parameters(&fx);

        let host = CgroupHost::discover(&fx.config);
        assert!(host.is_enabled());
        let names: Vec<&str> = host.parameters().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["cpu.shares", "memory.limit_in_bytes", "memory.stat", "memory.memsw.limit_in_bytes"]
        );
        assert!(matches!(host.parameters()[2].1, ParamValue::Block(_)));
        assert_eq!(host.subsystem_path("cpu"), Some(fx.mounts.join("cpu/appbox").as_path()));
    }

    #[test]
    fn create_writes_rules_config_and_parameters() {
        let fx = fixture(&["cpu", "memory"], &["cpu", "memory"]);
        seed_parameters(&fx);
        let host = CgroupHost::discover(&fx.config);
        let (uid, gid) = (current_uid(), current_gid());
        add_process(&fx.config.proc_root, 4242, "python", uid, &[4242, 4243]);

        let defaults = BTreeMap::from([
            ("memory.limit_in_bytes".to_string(), "536870912".to_string()),
            ("blkio.weight".to_string(), "100".to_string()),
        ]);
        let cgroup = own_cgroup(&host, "c0ffee");
        cgroup.create(&defaults).unwrap();

        let rules = fs::read_to_string(&fx.config.rules_file).unwrap();
        assert_eq!(rules, "c0ffee\tcpu,memory\t/appbox/c0ffee\n");

        let config = fs::read_to_string(&fx.config.config_file).unwrap();
        assert_eq!(
            config,
            format!(
                "group /appbox/c0ffee {{ perm {{ task {{ uid = {uid};  gid = {gid}; }} admin {{ uid = root;  gid = root; }}}} cpu {{}} memory {{ memory.limit_in_bytes = 536870912; }}}}\n"
            )
        );

        let group = fx.mounts.join("memory/appbox/c0ffee");
        assert_eq!(
            fs::read_to_string(group.join("memory.limit_in_bytes")).unwrap(),
            "536870912"
        );
        assert_eq!(fs::read_to_string(group.join("tasks")).unwrap(), "4242\n4243\n");
    }

    #[test]
    fn create_fails_when_subsystem_is_not_mounted() {
        let fx = fixture(&["cpu", "memory"], &["cpu"]);
        let host = CgroupHost::discover(&fx.config);
        let err = own_cgroup(&host, "abc").create(&BTreeMap::new()).unwrap_err();
        assert!(matches!(err, AppboxError::Io { .. }));
        assert!(fx.mounts.join("cpu/appbox/abc").is_dir());
    }

    #[test]
    fn recreate_replaces_existing_entries() {
        let fx = fixture(&["cpu"], &["cpu"]);
        fs::write(&fx.config.rules_file, "other\tcpu\t/appbox/other\nabc\tcpu\t/appbox/abc\n").unwrap();
        let host = CgroupHost::discover(&fx.config);
        let cgroup = own_cgroup(&host, "abc");
        cgroup.create(&BTreeMap::new()).unwrap();
        cgroup.create(&BTreeMap::new()).unwrap();

        let rules = fs::read_to_string(&fx.config.rules_file).unwrap();
        assert_eq!(rules, "other\tcpu\t/appbox/other\nabc\tcpu\t/appbox/abc\n");
        let config = fs::read_to_string(&fx.config.config_file).unwrap();
        assert_eq!(config.lines().count(), 1);
    }

    #[test]
    fn delete_is_idempotent() {
        let fx = fixture(&["cpu", "memory"], &["cpu", "memory"]);
        seed_parameters(&fx);
        let host = CgroupHost::discover(&fx.config);
        let cgroup = own_cgroup(&host, "abc");
        cgroup.create(&BTreeMap::new()).unwrap();

        cgroup.delete().unwrap();
        cgroup.delete().unwrap();

        assert!(!fx.mounts.join("cpu/appbox/abc").exists());
        assert_eq!(fs::read_to_string(&fx.config.rules_file).unwrap(), "");
        assert_eq!(fs::read_to_string(&fx.config.config_file).unwrap(), "");
    }

    #[test]
    fn fetch_and_store_require_existing_group() {
        let fx = fixture(&["cpu", "memory"], &["cpu", "memory"]);
        seed_parameters(&fx);
        let host = CgroupHost::discover(&fx.config);
        let cgroup = own_cgroup(&host, "ghost");

        let err = cgroup.fetch().unwrap_err();
        assert!(err.to_string().contains("user does not exist in cgroups: ghost"));
        let values = BTreeMap::from([("cpu.shares".to_string(), ParamValue::from(512))]);
        assert!(cgroup.store(&values).is_err());
    }

    #[test]
    fn store_ignores_unknown_keys_and_fetch_reads_back() {
        let fx = fixture(&["cpu"], &["cpu"]);
        seed_parameters(&fx);
        let host = CgroupHost::discover(&fx.config);
        let cgroup = own_cgroup(&host, "abc");
        cgroup.create(&BTreeMap::new()).unwrap();

        let values = BTreeMap::from([
            ("cpu.shares".to_string(), ParamValue::from(256)),
            ("cpu.bogus".to_string(), ParamValue::from("1")),
        ]);
        cgroup.store(&values).unwrap();

        assert!(!fx.mounts.join("cpu/appbox/abc/cpu.bogus").exists());
        let fetched = cgroup.fetch().unwrap();
        assert_eq!(fetched.get("cpu.shares"), Some(&ParamValue::from("256")));
    }
}
