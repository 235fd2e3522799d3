//! Running commands inside containers.
//!
//! An exec instance is created, attached, and inspected in three steps.
//! Attaching yields a multiplexed connection: process output arrives as
//! [`stdcopy`](crate::stdcopy) frames and bytes written to the input side
//! reach the process's stdin.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use appbox_common::error::{AppboxError, Result};
use appbox_common::types::ContainerId;
use crossbeam_channel::{Receiver, bounded, never, select};

use crate::stdcopy;

/// Parameters of one exec instance.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Default)]
pub struct ExecConfig {
    /// User to run as; `None` runs as the container user.
    pub user: Option<String>,
    /// Program and arguments.
    pub cmd: Vec<String>,
    /// Forward the caller's input.
    pub attach_stdin: bool,
    /// Capture standard output.
    pub attach_stdout: bool,
    /// Capture standard error.
    pub attach_stderr: bool,
    /// Extra environment.
    pub env: Vec<(String, String)>,
}

/// Observed state of an exec instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecInspect {
    /// The process has been spawned and not yet reaped.
    pub running: bool,
    /// Exit code once the process is reaped; 128+N after signal N.
    pub exit_code: Option<i32>,
}

/// Write half of an attached connection that can signal end of input.
pub trait CloseWrite: Write + Send {
    /// Half-closes the connection so the process sees end of input.
    ///
    /// # Errors
    ///
    /// Returns the underlying shutdown error.
    fn close_write(&mut self) -> io::Result<()>;
}

impl CloseWrite for UnixStream {
    fn close_write(&mut self) -> io::Result<()> {
        self.shutdown(std::net::Shutdown::Write)
    }
}

/// Connection to an attached exec instance.
pub struct Attached {
    /// Multiplexed process output.
    pub output: Box<dyn Read + Send>,
    /// Process input.
    pub input: Box<dyn CloseWrite>,
}

impl std::fmt::Debug for Attached {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attached").finish_non_exhaustive()
    }
}

/// Caller-side streams of an exec.
#[derive(Default)]
pub struct ExecIo {
    /// Input forwarded to the process.
    pub stdin: Option<Box<dyn Read + Send>>,
    /// Sink for standard output.
    pub stdout: Option<Box<dyn Write + Send>>,
    /// Sink for standard error.
    pub stderr: Option<Box<dyn Write + Send>>,
    /// Fires, or disconnects, when the caller stops waiting.
    pub cancel: Option<Receiver<()>>,
}

impl std::fmt::Debug for ExecIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecIo")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("cancel", &self.cancel.is_some())
            .finish()
    }
}

/// How [`pump_streams`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pumped {
    /// The output was drained, or the input was when no output is attached.
    Drained,
    /// The caller cancelled.
    Cancelled,
}

/// Moves data between the caller's streams and an attached exec until the
/// output is drained or the caller cancels.
///
/// When the input is exhausted first, the input side is half-closed and
/// the pump keeps waiting for the output, unless no output sink is set.
/// Cancelling only stops the waiting; the process keeps running.
///
/// # Errors
///
/// Returns an error if demultiplexing the output fails.
pub fn pump_streams(io: ExecIo, attached: Attached) -> Result<Pumped> {
    let ExecIo {
        stdin,
        stdout,
        stderr,
        cancel,
    } = io;
    let Attached { mut output, mut input } = attached;
    let cancel = cancel.unwrap_or_else(never);
    let has_output = stdout.is_some() || stderr.is_some();

    let output_done = if has_output {
        let (tx, rx) = bounded(1);
        let _ = thread::spawn(move || {
            let (mut stdout, mut stderr) = (stdout, stderr);
            let result = stdcopy::copy(
                stdout.as_deref_mut().map(|w| w as &mut dyn Write),
                stderr.as_deref_mut().map(|w| w as &mut dyn Write),
                None,
                &mut output,
            );
            let _ = tx.send(result);
        });
        rx
    } else {
        never()
    };

    let (input_tx, input_done) = bounded::<()>(1);
    let _ = thread::spawn(move || {
        if let Some(mut stdin) = stdin {
            if let Err(e) = io::copy(&mut stdin, &mut input) {
                tracing::debug!(error = %e, "exec input copy stopped");
            }
        }
        if let Err(e) = input.close_write() {
            tracing::debug!(error = %e, "failed to half-close exec input");
        }
        let _ = input_tx.send(());
    });

    select! {
        recv(output_done) -> result => output_result(result),
        recv(input_done) -> _ => {
            if has_output {
                select! {
                    recv(output_done) -> result => output_result(result),
                    recv(cancel) -> _ => Ok(Pumped::Cancelled),
                }
            } else {
                Ok(Pumped::Drained)
            }
        }
        recv(cancel) -> _ => Ok(Pumped::Cancelled),
    }
}

fn output_result(result: std::result::Result<io::Result<u64>, crossbeam_channel::RecvError>) -> Result<Pumped> {
    match result {
        Ok(Ok(bytes)) => {
            tracing::debug!(bytes, "exec output drained");
            Ok(Pumped::Drained)
        }
        Ok(Err(e)) => Err(AppboxError::Engine {
            message: format!("exec stream: {e}"),
        }),
        Err(_) => Ok(Pumped::Drained),
    }
}

/// Writer appending to a shared buffer, so output can be read after a
/// detached pump thread wrote it.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw bytes written so far.
    #[must_use]
    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Content written so far, lossily decoded.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes()).into_owned()
    }

    /// Content with trailing carriage returns and newlines removed.
    #[must_use]
    pub fn chomp(&self) -> String {
        self.contents().trim_end_matches(['\r', '\n']).to_string()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Shared exit status of one exec process.
#[derive(Debug, Default)]
pub struct ExecStatus(Mutex<ExecInspect>);

impl ExecStatus {
    /// Marks the process as spawned.
    pub fn started(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).running = true;
    }

    /// Records the exit code of the reaped process.
    pub fn finished(&self, code: i32) {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        state.running = false;
        state.exit_code = Some(code);
    }

    /// Current state.
    pub fn snapshot(&self) -> ExecInspect {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An exec instance known to a backend.
#[derive(Debug, Clone)]
pub struct ExecEntry {
    /// Container the command runs in.
    pub container: ContainerId,
    /// Command parameters.
    pub config: ExecConfig,
    /// Exit status, shared with the process waiter.
    pub status: Arc<ExecStatus>,
}

/// Exec instances of one backend, keyed by exec id.
#[derive(Debug, Default)]
pub struct ExecTable(Mutex<HashMap<String, ExecEntry>>);

impl ExecTable {
    /// Registers a new exec instance and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`AppboxError::InvalidInput`] for an empty command.
    pub fn insert(&self, container: &ContainerId, config: &ExecConfig) -> Result<String> {
        if config.cmd.is_empty() {
            return Err(AppboxError::invalid("exec command is empty"));
        }
        let id = ContainerId::generate().to_string();
        let entry = ExecEntry {
            container: container.clone(),
            config: config.clone(),
            status: Arc::new(ExecStatus::default()),
        };
        let _ = self
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), entry);
        Ok(id)
    }

    /// Looks up an exec instance.
    ///
    /// # Errors
    ///
    /// Returns [`AppboxError::NotFound`] for an unknown id.
    pub fn get(&self, exec_id: &str) -> Result<ExecEntry> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(exec_id)
            .cloned()
            .ok_or_else(|| AppboxError::NotFound {
                kind: "exec",
                id: exec_id.to_string(),
            })
    }

    /// Drops every exec instance of a removed container.
    pub fn forget(&self, container: &ContainerId) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, entry| entry.container != *container);
    }
}
