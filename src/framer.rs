//! Newline framing over raw, partially buffered byte streams
//!
//! A [`LineFramer`] owns one reusable buffer per stream. Reads may end in the
//! middle of a sentence or carry several sentences at once; the framer keeps
//! the unterminated tail around and hands out one complete line per call.

use std::borrow::Cow;
use std::io::{ErrorKind, Read};

use crate::{Result, error::GpsPushError};

/// Line terminator of the sentence protocol
pub const TERMINATOR: u8 = b'\n';

/// Default size of the framing buffer, larger than any NMEA sentence
pub const DEFAULT_LINE_CAPACITY: usize = 2048;

/// A readable byte source with a blocking readiness wait
///
/// Implementors are opened non-blocking; `wait_readable` parks the caller
/// until the next `read` has something to return (or the peer hung up).
pub trait RawStream: Read {
    fn wait_readable(&mut self) -> std::io::Result<()>;
}

impl<S: RawStream + ?Sized> RawStream for &mut S {
    fn wait_readable(&mut self) -> std::io::Result<()> {
        (**self).wait_readable()
    }
}

/// One decoded sentence, without its terminator
///
/// Borrows the framer buffer and is only valid until the next read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line<'a>(&'a [u8]);

impl<'a> Line<'a> {
    /// Wraps line content; `bytes` must not hold the terminator
    pub fn new(bytes: &'a [u8]) -> Self {
        Line(bytes)
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Bytes up to (not including) the first field separator
    pub fn leading_token(&self) -> &'a [u8] {
        let end = self.0.iter().position(|&b| b == b',').unwrap_or(self.0.len());
        &self.0[..end]
    }

    /// Text form for logs, invalid UTF-8 replaced
    pub fn to_string_lossy(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.0)
    }
}

impl std::fmt::Display for Line<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

/// Turns a [`RawStream`] into complete, non-empty lines
#[derive(Debug)]
pub struct LineFramer<S> {
    stream: S,
    buf: Vec<u8>,
    start: usize,
    end: usize,
    discarding: bool,
}

impl<S: RawStream> LineFramer<S> {
    /// Frames `stream` with a [`DEFAULT_LINE_CAPACITY`] byte buffer
    pub fn new(stream: S) -> Self {
        Self::with_capacity(stream, DEFAULT_LINE_CAPACITY)
    }

    /// Frames `stream` with a custom buffer size
    ///
    /// # Arguments
    /// * `stream` - Raw byte source
    /// * `capacity` - Longest line kept; longer ones are discarded
    pub fn with_capacity(stream: S, capacity: usize) -> Self {
        LineFramer {
            stream,
            buf: vec![0; capacity.max(1)],
            start: 0,
            end: 0,
            discarding: false,
        }
    }

    /// Blocks until one complete non-empty line is available
    ///
    /// Empty lines (runs of terminators) are swallowed without returning.
    /// Any read failure other than `WouldBlock`/`Interrupted` is returned as
    /// [`GpsPushError::ReadError`]; an empty read only means that no new
    /// complete line has arrived yet.
    pub fn read_line(&mut self) -> Result<Line<'_>> {
        loop {
            let pending = &self.buf[self.start..self.end];
            if let Some(pos) = pending.iter().position(|&b| b == TERMINATOR) {
                let line_start = self.start;
                let line_end = self.start + pos;
                self.start = line_end + 1;

                if self.discarding {
                    // tail of an oversized line
                    self.discarding = false;
                    continue;
                }
                if line_end == line_start {
                    continue;
                }

                return Ok(Line(&self.buf[line_start..line_end]));
            }

            self.fill()?;
        }
    }

    fn fill(&mut self) -> Result<()> {
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }

        if self.end == self.buf.len() {
            tracing::warn!(
                capacity = self.buf.len(),
                "line exceeds framing buffer, discarding"
            );
            self.end = 0;
            self.discarding = true;
        }

        self.stream
            .wait_readable()
            .map_err(GpsPushError::ReadError)?;

        match self.stream.read(&mut self.buf[self.end..]) {
            Ok(n) => {
                self.end += n;
                Ok(())
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(()),
            Err(e) => Err(GpsPushError::ReadError(e)),
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}
