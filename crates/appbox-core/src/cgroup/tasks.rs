//! Process and thread enumeration through the proc filesystem.

use std::fs;
use std::path::Path;

use appbox_common::error::{AppboxError, Result};

/// A process or thread observed under `/proc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Owning process id.
    pub pid: u32,
    /// Thread id; equal to `pid` for a process entry.
    pub tid: u32,
    /// Command name from `status`.
    pub name: String,
    /// Real uid.
    pub uid: u32,
    /// Real gid.
    pub gid: u32,
}

fn numeric_entries(dir: &Path) -> std::io::Result<Vec<u32>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(id) = entry.file_name().to_str().and_then(|s| s.parse().ok()) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

fn first_id(values: &str) -> Option<u32> {
    values.split_whitespace().next()?.parse().ok()
}

fn read_status(proc_root: &Path, pid: u32) -> Option<Task> {
    let content = fs::read_to_string(proc_root.join(pid.to_string()).join("status")).ok()?;
    let mut task = Task {
        pid,
        tid: pid,
        name: String::new(),
        uid: 0,
        gid: 0,
    };
    for line in content.lines() {
        let Some((token, values)) = line.split_once(':') else {
            continue;
        };
        match token.trim() {
            "Name" => task.name = values.trim().to_string(),
            "Uid" => task.uid = first_id(values).unwrap_or(task.uid),
            "Gid" => task.gid = first_id(values).unwrap_or(task.gid),
            _ => {}
        }
    }
    Some(task)
}

/// Lists every process.
///
/// Processes exiting while the scan runs are skipped.
///
/// # Errors
///
/// Returns an error if `proc_root` cannot be listed.
pub fn processes(proc_root: &Path) -> Result<Vec<Task>> {
    let pids = numeric_entries(proc_root).map_err(|e| AppboxError::io(proc_root, e))?;
    Ok(pids.into_iter().filter_map(|pid| read_status(proc_root, pid)).collect())
}

/// Lists every thread of every process, carrying the owner of its process.
///
/// # Errors
///
/// Returns an error if `proc_root` cannot be listed.
pub fn threads(proc_root: &Path) -> Result<Vec<Task>> {
    let mut out = Vec::new();
    for process in processes(proc_root)? {
        let task_dir = proc_root.join(process.pid.to_string()).join("task");
        let Ok(tids) = numeric_entries(&task_dir) else {
            continue;
        };
        out.extend(tids.into_iter().map(|tid| Task {
            tid,
            ..process.clone()
        }));
    }
    Ok(out)
}

#[cfg(test)]
pub(crate) mod fixture {
    use std::fs;
    use std::path::Path;

    /// Writes a fake `/proc/<pid>` entry with the given threads.
    pub(crate) fn add_process(proc_root: &Path, pid: u32, name: &str, uid: u32, tids: &[u32]) {
        let dir = proc_root.join(pid.to_string());
        fs::create_dir_all(dir.join("task")).unwrap();
        fs::write(
            dir.join("status"),
            format!("Name:\t{name}\nState:\tS (sleeping)\nUid:\t{uid}\t{uid}\t{uid}\t{uid}\nGid:\t{uid}\t{uid}\t{uid}\t{uid}\n"),
        )
        .unwrap();
        for tid in tids {
            fs::create_dir_all(dir.join("task").join(tid.to_string())).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixture::add_process;
    use super::*;

    #[test]
    fn reads_name_and_owner() {
        let proc_root = tempfile::tempdir().unwrap();
        add_process(proc_root.path(), 42, "cgrulesengd", 0, &[42]);
        add_process(proc_root.path(), 7, "bash", 1001, &[7]);
        fs::create_dir_all(proc_root.path().join("self")).unwrap();

        let ps = processes(proc_root.path()).unwrap();
        assert_eq!(ps.len(), 2);
        assert_eq!(ps[0].pid, 7);
        assert_eq!(ps[0].uid, 1001);
        assert_eq!(ps[1].name, "cgrulesengd");
    }

    #[test]
    fn threads_inherit_process_owner() {
        let proc_root = tempfile::tempdir().unwrap();
        add_process(proc_root.path(), 10, "java", 1500, &[10, 11, 12]);

        let ts = threads(proc_root.path()).unwrap();
        let tids: Vec<u32> = ts.iter().map(|t| t.tid).collect();
        assert_eq!(tids, vec![10, 11, 12]);
        assert!(ts.iter().all(|t| t.pid == 10 && t.uid == 1500));
    }

    #[test]
    fn vanished_process_is_skipped() {
        let proc_root = tempfile::tempdir().unwrap();
        fs::create_dir_all(proc_root.path().join("99")).unwrap();
        assert!(processes(proc_root.path()).unwrap().is_empty());
    }
}
