//! Multiplexing of several byte streams over one connection.
//!
//! Every frame carries an 8-byte header: the stream tag, three reserved
//! bytes, and the payload length as a big-endian `u32`.

use std::io::{self, Read, Write};

/// Length of a frame header.
pub const HEADER_LEN: usize = 8;

const TAG_INDEX: usize = 0;
const SIZE_INDEX: usize = 4;
const STARTING_BUF_LEN: usize = 32 * 1024 + HEADER_LEN + 1;

/// Logical stream a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StdType {
    /// Standard input; demultiplexed onto the stdout sink.
    Stdin = 0,
    /// Standard output.
    Stdout = 1,
    /// Standard error.
    Stderr = 2,
    /// Structured application data.
    Data = 3,
}

impl TryFrom<u8> for StdType {
    type Error = u8;

    fn try_from(tag: u8) -> Result<Self, u8> {
        match tag {
            0 => Ok(Self::Stdin),
            1 => Ok(Self::Stdout),
            2 => Ok(Self::Stderr),
            3 => Ok(Self::Data),
            other => Err(other),
        }
    }
}

/// Writer emitting one frame of its stream type per `write` call.
#[derive(Debug)]
pub struct StdWriter<W> {
    inner: W,
    tag: StdType,
}

impl<W: Write> StdWriter<W> {
    /// Wraps `inner`, tagging everything written with `tag`.
    pub const fn new(inner: W, tag: StdType) -> Self {
        Self { inner, tag }
    }

    /// Unwraps the underlying writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Encodes `payload` into frames in a single buffer. Payloads longer
/// than a frame can carry are split over consecutive frames; an empty
/// payload still yields one empty frame.
#[must_use]
pub fn encode_frame(tag: StdType, payload: &[u8]) -> Vec<u8> {
    encode_chunked(tag, payload, MAX_FRAME_LEN)
}

const MAX_FRAME_LEN: usize = u32::MAX as usize;

fn encode_chunked(tag: StdType, payload: &[u8], max_len: usize) -> Vec<u8> {
    let frames = payload.len().div_ceil(max_len).max(1);
    let mut wire = Vec::with_capacity(frames * HEADER_LEN + payload.len());
    let mut rest = payload;
    loop {
        let (chunk, tail) = rest.split_at(rest.len().min(max_len));
        wire.push(tag as u8);
        wire.extend_from_slice(&[0; SIZE_INDEX - 1]);
        // chunk.len() <= max_len <= u32::MAX
        wire.extend_from_slice(&u32::try_from(chunk.len()).unwrap_or(u32::MAX).to_be_bytes());
        wire.extend_from_slice(chunk);
        rest = tail;
        if rest.is_empty() {
            return wire;
        }
    }
}

impl<W: Write> Write for StdWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let frame = encode_frame(self.tag, buf);
        self.inner.write_all(&frame)?;
        self.inner.flush()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Demultiplexes `src` until it is exhausted.
///
/// Frames go to `stdout` (stdin and stdout frames), `stderr`, or `data`;
/// frames for an absent sink are dropped. Input ending in the middle of a
/// header or frame ends the copy without error. Returns the number of
/// payload bytes consumed.
///
/// # Errors
///
/// Returns [`io::ErrorKind::InvalidData`] on an unknown stream tag,
/// [`io::ErrorKind::WriteZero`] when a sink accepts only part of a frame,
/// and any read or write error.
pub fn copy<'a>(
    mut stdout: Option<&'a mut (dyn Write + 'a)>,
    mut stderr: Option<&'a mut (dyn Write + 'a)>,
    mut data: Option<&'a mut (dyn Write + 'a)>,
    src: &mut dyn Read,
) -> io::Result<u64> {
    let mut buf = vec![0u8; STARTING_BUF_LEN];
    let mut nr = 0usize;
    let mut written = 0u64;

    loop {
        if !fill(src, &mut buf, &mut nr, HEADER_LEN)? {
            tracing::debug!(bytes = nr, "stream ended inside a frame header");
            return Ok(written);
        }

        let tag = StdType::try_from(buf[TAG_INDEX]).map_err(|tag| {
            io::Error::new(io::ErrorKind::InvalidData, format!("unrecognized stream tag: {tag}"))
        })?;
        let size_bytes = [
            buf[SIZE_INDEX],
            buf[SIZE_INDEX + 1],
            buf[SIZE_INDEX + 2],
            buf[SIZE_INDEX + 3],
        ];
        let frame_size = u32::from_be_bytes(size_bytes) as usize;
        let frame_end = HEADER_LEN + frame_size;
        if frame_end > buf.len() {
            tracing::debug!(frame_size, was = buf.len(), "growing frame buffer");
            buf.resize(frame_end + 1, 0);
        }

        if !fill(src, &mut buf, &mut nr, frame_end)? {
            tracing::debug!(frame_size, bytes = nr, "stream ended inside a frame");
            return Ok(written);
        }

        let sink: Option<&mut (dyn Write + 'a)> = match tag {
            StdType::Stdin | StdType::Stdout => stdout.as_deref_mut(),
            StdType::Stderr => stderr.as_deref_mut(),
            StdType::Data => data.as_deref_mut(),
        };
        if let Some(out) = sink {
            let n = out.write(&buf[HEADER_LEN..frame_end])?;
            if n != frame_size {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("short write: {n} of {frame_size} bytes"),
                ));
            }
        }
        written += frame_size as u64;

        buf.copy_within(frame_end..nr, 0);
        nr -= frame_end;
    }
}

/// Reads until `buf[..want]` is filled; `Ok(false)` when the input ends first.
fn fill(src: &mut dyn Read, buf: &mut [u8], nr: &mut usize, want: usize) -> io::Result<bool> {
    while *nr < want {
        match src.read(&mut buf[*nr..]) {
            Ok(0) => return Ok(false),
            Ok(n) => *nr += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}
