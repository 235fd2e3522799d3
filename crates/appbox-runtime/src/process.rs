//! Process spawning behind a multiplexed connection.
//!
//! The child's output is framed onto one end of a Unix socket pair; the
//! other end is handed to the caller as an [`Attached`] connection.

use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use appbox_common::error::{AppboxError, Result};

use crate::exec::{Attached, ExecConfig, ExecStatus};
use crate::stdcopy::{StdType, encode_frame};

const CHUNK_LEN: usize = 32 * 1024;

/// Spawns `cmd` and connects its streams to a new [`Attached`] connection.
///
/// `on_spawn` runs with the child's pid before any output is read; its
/// failure is logged and the process keeps running. `status` is updated
/// when the child is reaped, after which the connection reaches end of
/// input.
///
/// # Errors
///
/// Returns an error if the socket pair cannot be created or the process
/// cannot be spawned.
pub fn spawn_attached(
    mut cmd: Command,
    config: &ExecConfig,
    status: Arc<ExecStatus>,
    on_spawn: impl FnOnce(u32) -> Result<()>,
) -> Result<Attached> {
    let (client, server) = UnixStream::pair().map_err(|e| AppboxError::Engine {
        message: format!("socket pair: {e}"),
    })?;

    let _ = cmd
        .stdin(piped_if(config.attach_stdin))
        .stdout(piped_if(config.attach_stdout))
        .stderr(piped_if(config.attach_stderr))
        .envs(config.env.iter().map(|(k, v)| (k, v)));
    let program = cmd.get_program().to_string_lossy().into_owned();
    let mut child = cmd.spawn().map_err(|e| AppboxError::Command {
        command: program.clone(),
        message: e.to_string(),
    })?;
    status.started();
    tracing::debug!(program = %program, pid = child.id(), "exec process spawned");

    if let Err(e) = on_spawn(child.id()) {
        tracing::warn!(pid = child.id(), error = %e, "post-spawn hook failed");
    }

    let server = Arc::new(Mutex::new(server));
    let mut copiers = Vec::new();
    if let Some(out) = child.stdout.take() {
        copiers.push(frame_output(out, StdType::Stdout, Arc::clone(&server)));
    }
    if let Some(err) = child.stderr.take() {
        copiers.push(frame_output(err, StdType::Stderr, Arc::clone(&server)));
    }
    if let Some(mut stdin) = child.stdin.take() {
        let mut input = lock(&server).try_clone().map_err(|e| AppboxError::Engine {
            message: format!("socket clone: {e}"),
        })?;
        let _ = thread::spawn(move || {
            if let Err(e) = io::copy(&mut input, &mut stdin) {
                tracing::debug!(error = %e, "exec stdin copy stopped");
            }
        });
    }

    let _ = thread::spawn(move || reap(child, copiers, &status, &server));

    let output = client.try_clone().map_err(|e| AppboxError::Engine {
        message: format!("socket clone: {e}"),
    })?;
    Ok(Attached {
        output: Box::new(output),
        input: Box::new(client),
    })
}

fn piped_if(attached: bool) -> Stdio {
    if attached { Stdio::piped() } else { Stdio::null() }
}

fn lock(server: &Mutex<UnixStream>) -> std::sync::MutexGuard<'_, UnixStream> {
    server.lock().unwrap_or_else(PoisonError::into_inner)
}

fn frame_output(mut src: impl Read + Send + 'static, tag: StdType, server: Arc<Mutex<UnixStream>>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = vec![0u8; CHUNK_LEN];
        loop {
            let n = match src.read(&mut buf) {
                Ok(0) => return,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!(?tag, error = %e, "exec output read failed");
                    return;
                }
            };
            let frame = encode_frame(tag, &buf[..n]);
            if let Err(e) = lock(&server).write_all(&frame) {
                // Reader went away; keep draining so the child never blocks.
                tracing::debug!(?tag, error = %e, "exec output dropped");
            }
        }
    })
}

fn reap(mut child: Child, copiers: Vec<JoinHandle<()>>, status: &ExecStatus, server: &Mutex<UnixStream>) {
    for copier in copiers {
        let _ = copier.join();
    }
    let code = match child.wait() {
        Ok(exit) => exit
            .code()
            .or_else(|| exit.signal().map(|sig| 128 + sig))
            .unwrap_or(-1),
        Err(e) => {
            tracing::warn!(pid = child.id(), error = %e, "failed to reap exec process");
            -1
        }
    };
    status.finished(code);
    tracing::debug!(pid = child.id(), code, "exec process exited");
    if let Err(e) = lock(server).shutdown(Shutdown::Both) {
        tracing::debug!(error = %e, "exec connection already closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{ExecIo, SharedBuffer, pump_streams};

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        let _ = cmd.args(["-c", script]);
        cmd
    }

    fn attached_config() -> ExecConfig {
        ExecConfig {
            attach_stdout: true,
            attach_stderr: true,
            ..ExecConfig::default()
        }
    }

    #[test]
    fn output_is_framed_per_stream() {
        let status = Arc::new(ExecStatus::default());
        let attached = spawn_attached(
            sh("echo out; echo err >&2; exit 3"),
            &attached_config(),
            Arc::clone(&status),
            |_| Ok(()),
        )
        .unwrap();

        let (out, err) = (SharedBuffer::new(), SharedBuffer::new());
        let io = ExecIo {
            stdout: Some(Box::new(out.clone())),
            stderr: Some(Box::new(err.clone())),
            ..ExecIo::default()
        };
        let _ = pump_streams(io, attached).unwrap();
        assert_eq!(out.contents(), "out\n");
        assert_eq!(err.contents(), "err\n");
        let inspect = status.snapshot();
        assert!(!inspect.running);
        assert_eq!(inspect.exit_code, Some(3));
    }

    #[test]
    fn stdin_reaches_the_process() {
        let status = Arc::new(ExecStatus::default());
        let config = ExecConfig {
            attach_stdin: true,
            ..attached_config()
        };
        let attached = spawn_attached(Command::new("cat"), &config, Arc::clone(&status), |_| Ok(())).unwrap();

        let out = SharedBuffer::new();
        let io = ExecIo {
            stdin: Some(Box::new(io::Cursor::new(b"through cat".to_vec()))),
            stdout: Some(Box::new(out.clone())),
            ..ExecIo::default()
        };
        let _ = pump_streams(io, attached).unwrap();
        assert_eq!(out.contents(), "through cat");
        assert_eq!(status.snapshot().exit_code, Some(0));
    }

    #[test]
    fn hook_failure_does_not_stop_the_process() {
        let status = Arc::new(ExecStatus::default());
        let attached = spawn_attached(sh("echo ok"), &attached_config(), Arc::clone(&status), |_| {
            Err(AppboxError::invalid("no cgroup"))
        })
        .unwrap();
        let out = SharedBuffer::new();
        let io = ExecIo {
            stdout: Some(Box::new(out.clone())),
            ..ExecIo::default()
        };
        let _ = pump_streams(io, attached).unwrap();
        assert_eq!(out.chomp(), "ok");
    }

    #[test]
    fn spawn_failure_names_the_program() {
        let err = spawn_attached(
            Command::new("/nonexistent/appbox-test-binary"),
            &ExecConfig::default(),
            Arc::new(ExecStatus::default()),
            |_| Ok(()),
        )
        .unwrap_err();
        assert!(err.to_string().contains("appbox-test-binary"));
    }
}
