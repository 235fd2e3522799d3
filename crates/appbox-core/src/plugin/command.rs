//! Host command helpers shared by the plugin variants.

use std::ffi::OsStr;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use appbox_common::error::{AppboxError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs a host administration command and returns its standard output.
pub(crate) fn run<I, S>(program: &str, args: I) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let path = which::which(program).map_err(|e| AppboxError::Command {
        command: program.to_string(),
        message: e.to_string(),
    })?;
    let output = Command::new(&path)
        .args(args)
        .output()
        .map_err(|e| AppboxError::io(&path, e))?;
    if !output.status.success() {
        return Err(AppboxError::Command {
            command: program.to_string(),
            message: format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    tracing::debug!(command = program, "host command succeeded");
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Runs `pkill`/`pgrep` style matchers; `Ok(false)` when no process matched.
fn match_user(program: &str, args: &[&str]) -> Result<bool> {
    let path = which::which(program).map_err(|e| AppboxError::Command {
        command: program.to_string(),
        message: e.to_string(),
    })?;
    let status = Command::new(&path)
        .args(args)
        .status()
        .map_err(|e| AppboxError::io(&path, e))?;
    match status.code() {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        _ => Err(AppboxError::Command {
            command: program.to_string(),
            message: status.to_string(),
        }),
    }
}

fn pkill(user: &str, signal: &str) -> Result<bool> {
    match_user("pkill", &[signal, "-u", user])
}

/// Kills the processes of `user` with `pkill`, politely first when a
/// delay is given.
pub(crate) fn pkill_user(user: &str, term_delay: Option<Duration>) -> Result<()> {
    if let Some(delay) = term_delay {
        if !pkill(user, "-TERM")? {
            return Ok(());
        }
        let deadline = Instant::now() + delay;
        while Instant::now() < deadline {
            thread::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
            if !match_user("pgrep", &["-u", user])? {
                return Ok(());
            }
        }
    }
    let _ = pkill(user, "-KILL")?;
    Ok(())
}

/// Removes a home directory; a missing one is not an error.
pub(crate) fn remove_home(home: &Path) -> Result<()> {
    match fs::remove_dir_all(home) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(AppboxError::io(home, e)),
        _ => Ok(()),
    }
}

/// Returns `true` if the passwd database knows `name`.
pub(crate) fn user_exists(name: &str) -> bool {
    matches!(nix::unistd::User::from_name(name), Ok(Some(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_a_command_error() {
        let err = run("appbox-no-such-tool", ["--help"]).unwrap_err();
        assert!(matches!(err, AppboxError::Command { .. }));
    }

    #[test]
    fn failing_program_reports_status() {
        let err = run("false", std::iter::empty::<&str>()).unwrap_err();
        assert!(err.to_string().starts_with("false failed"));
    }

    #[test]
    fn output_is_returned() {
        assert_eq!(run("echo", ["hi"]).unwrap(), "hi\n");
    }

    #[test]
    fn removing_missing_home_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        remove_home(&dir.path().join("gone")).unwrap();
        fs::create_dir_all(dir.path().join("home/.env")).unwrap();
        remove_home(&dir.path().join("home")).unwrap();
        assert!(!dir.path().join("home").exists());
    }
}
