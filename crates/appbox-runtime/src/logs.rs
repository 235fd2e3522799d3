//! Output sinks for long-running operations.
//!
//! A sink hands out writers for standard output and standard error and
//! accepts one final structured result. The framed sink carries all three
//! over a single stream using the [`stdcopy`](crate::stdcopy) channels.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use appbox_common::error::{AppboxError, Result};

use crate::stdcopy::{StdType, encode_frame};

/// Destination of operation output.
pub trait LogSink: Send + Sync {
    /// Writer for regular output.
    fn stdout(&self) -> Box<dyn Write + Send>;

    /// Writer for diagnostics.
    fn stderr(&self) -> Box<dyn Write + Send>;

    /// Emits the terminal result object of the operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the object cannot be serialized or written.
    fn send_object(&self, value: &serde_json::Value) -> Result<()>;
}

/// Sink multiplexing everything over one stream.
#[derive(Debug)]
pub struct FramedLog<W> {
    inner: Arc<Mutex<W>>,
}

impl<W> Clone for FramedLog<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: Write + Send + 'static> FramedLog<W> {
    /// Wraps the destination stream.
    pub fn new(inner: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    fn channel(&self, tag: StdType) -> Channel<W> {
        Channel {
            inner: Arc::clone(&self.inner),
            tag,
        }
    }
}

struct Channel<W> {
    inner: Arc<Mutex<W>>,
    tag: StdType,
}

impl<W: Write> Write for Channel<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.write_all(&encode_frame(self.tag, buf))?;
        inner.flush()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).flush()
    }
}

impl<W: Write + Send + 'static> LogSink for FramedLog<W> {
    fn stdout(&self) -> Box<dyn Write + Send> {
        Box::new(self.channel(StdType::Stdout))
    }

    fn stderr(&self) -> Box<dyn Write + Send> {
        Box::new(self.channel(StdType::Stderr))
    }

    fn send_object(&self, value: &serde_json::Value) -> Result<()> {
        let json = serde_json::to_vec(value)?;
        self.channel(StdType::Data)
            .write_all(&json)
            .map_err(|e| AppboxError::io("<log stream>", e))
    }
}

/// Sink writing to the process's own standard streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleLog;

impl LogSink for ConsoleLog {
    fn stdout(&self) -> Box<dyn Write + Send> {
        Box::new(io::stdout())
    }

    fn stderr(&self) -> Box<dyn Write + Send> {
        Box::new(io::stderr())
    }

    fn send_object(&self, value: &serde_json::Value) -> Result<()> {
        let mut out = io::stdout().lock();
        serde_json::to_writer_pretty(&mut out, value)?;
        writeln!(out).map_err(|e| AppboxError::io("<stdout>", e))
    }
}

/// Sink dropping everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardLog;

impl LogSink for DiscardLog {
    fn stdout(&self) -> Box<dyn Write + Send> {
        Box::new(io::sink())
    }

    fn stderr(&self) -> Box<dyn Write + Send> {
        Box::new(io::sink())
    }

    fn send_object(&self, _value: &serde_json::Value) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::SharedBuffer;
    use crate::stdcopy;

    #[test]
    fn framed_log_separates_channels() {
        let wire = SharedBuffer::new();
        let log = FramedLog::new(wire.clone());
        log.stdout().write_all(b"building\n").unwrap();
        log.stderr().write_all(b"warning\n").unwrap();
        log.send_object(&serde_json::json!({"status": "ok"})).unwrap();

        let (mut out, mut err, mut data) = (Vec::new(), Vec::new(), Vec::new());
        let raw = wire.bytes();
        let _ = stdcopy::copy(Some(&mut out), Some(&mut err), Some(&mut data), &mut &raw[..]).unwrap();
        assert_eq!(out, b"building\n");
        assert_eq!(err, b"warning\n");
        let value: serde_json::Value = serde_json::from_slice(&data).unwrap();
        assert_eq!(value["status"], "ok");
    }

    #[test]
    fn discard_log_accepts_everything() {
        let log = DiscardLog;
        log.stdout().write_all(b"ignored").unwrap();
        log.send_object(&serde_json::Value::Null).unwrap();
    }
}
