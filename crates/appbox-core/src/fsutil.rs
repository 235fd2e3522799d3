//! File helpers shared by the cgroup and plugin modules.
//!
//! Host configuration files are never edited in place: the new content is
//! written to a `~` sibling which then replaces the original with a single
//! `rename(2)`. A crash leaves either the old or the new file. There is no
//! locking; the broker process is assumed to be the only writer.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use appbox_common::error::{AppboxError, Result};

/// Path of the swap sibling used while rewriting `path`.
#[must_use]
pub fn swap_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push("~");
    path.with_file_name(name)
}

/// Rewrites a line-oriented file, dropping the lines rejected by `keep`
/// and appending `extra` at the end.
///
/// A missing file is treated as empty.
///
/// # Errors
///
/// Returns an error if the file cannot be read, the swap file cannot be
/// written, or the final rename fails.
pub fn rewrite_lines(path: &Path, keep: impl Fn(&str) -> bool, extra: Option<&str>) -> Result<()> {
    let current = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(AppboxError::io(path, e)),
    };

    let mut next = String::with_capacity(current.len() + extra.map_or(0, str::len));
    for line in current.lines().filter(|line| keep(line)) {
        next.push_str(line);
        next.push('\n');
    }
    if let Some(extra) = extra {
        next.push_str(extra);
    }

    write_atomic(path, next.as_bytes())?;
    tracing::debug!(path = %path.display(), "rewrote host file");
    Ok(())
}

/// Replaces the content of `path` through a `~` sibling and a rename.
///
/// # Errors
///
/// Returns an error if the swap file cannot be written or renamed.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let tmp = swap_path(path);
    let mut file = fs::File::create(&tmp).map_err(|e| AppboxError::io(&tmp, e))?;
    file.write_all(content)
        .and_then(|()| file.sync_all())
        .map_err(|e| AppboxError::io(&tmp, e))?;
    drop(file);
    fs::rename(&tmp, path).map_err(|e| AppboxError::io(path, e))
}

/// Creates a directory with the given mode unless it already exists.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or its mode set.
pub fn ensure_dir(path: &Path, mode: u32) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path).map_err(|e| AppboxError::io(path, e))?;
    set_mode(path, mode)
}

/// Sets the permission bits of a path.
///
/// # Errors
///
/// Returns an error if the permissions cannot be changed.
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| AppboxError::io(path, e))
}
