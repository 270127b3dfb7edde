//! Local durable storage: capture file numbering and the capture log
//!
//! The index file is a plain decimal counter rewritten on every call. It
//! assumes a single writer across the deployment; two processes calling
//! [`LogIndex::next`] at once can hand out the same number.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::{Result, error::GpsPushError, framer::Line};

/// File name of the counter inside the storage directory
pub const INDEX_FILE_NAME: &str = "index";

/// Persistent sequence counter for capture file names
#[derive(Debug, Clone)]
pub struct LogIndex {
    path: PathBuf,
}

impl LogIndex {
    /// Counter kept in `storage`/[`INDEX_FILE_NAME`]; nothing is touched
    /// until [`next`](Self::next)
    pub fn new<P: AsRef<Path>>(storage: P) -> Self {
        LogIndex {
            path: storage.as_ref().join(INDEX_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current value and persists `value + 1`
    ///
    /// A missing or empty index file counts as a first run and yields 0. A
    /// counter that cannot advance any further is reported as
    /// [`GpsPushError::IndexCorrupt`] and left as it is.
    pub fn next(&self) -> Result<u32> {
        let value = self.read()?;
        let advanced = value.checked_add(1).ok_or_else(|| GpsPushError::IndexCorrupt {
            path: self.path.clone(),
            content: value.to_string(),
        })?;
        let content = format!("{advanced:05}");
        std::fs::write(&self.path, content).map_err(|source| GpsPushError::IndexError {
            path: self.path.clone(),
            source,
        })?;

        tracing::debug!(index = value, path = %self.path.display(), "log index advanced");
        Ok(value)
    }

    fn read(&self) -> Result<u32> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(GpsPushError::IndexError {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let trimmed = content.trim_matches(|c: char| c.is_whitespace() || c == '\0');
        if trimmed.is_empty() {
            return Ok(0);
        }

        trimmed.parse().map_err(|_| GpsPushError::IndexCorrupt {
            path: self.path.clone(),
            content: trimmed.to_string(),
        })
    }
}

/// Path of the capture file with the given sequence number
pub fn capture_file_name<P: AsRef<Path>>(storage: P, index: u32) -> PathBuf {
    storage.as_ref().join(format!("gps-{index:05}"))
}

/// Append-only text log, one sentence per line
#[derive(Debug)]
pub struct CaptureLog {
    path: PathBuf,
    file: File,
}

impl CaptureLog {
    /// Opens `path` for appending, creating it if needed
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| GpsPushError::CaptureLogError {
                path: path.clone(),
                source,
            })?;

        tracing::info!(path = %path.display(), "capture log opened");
        Ok(CaptureLog { path, file })
    }

    /// Allocates the next sequence number in `storage` and opens that file
    pub fn open_next<P: AsRef<Path>>(storage: P) -> Result<Self> {
        let index = LogIndex::new(&storage).next()?;
        Self::create(capture_file_name(storage, index))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends the line; a failed write is logged and otherwise ignored
    pub fn append(&mut self, line: &Line<'_>) {
        if let Err(e) = append_line(&mut self.file, line) {
            tracing::warn!(path = %self.path.display(), error = %e, "capture log write failed");
        }
    }
}

/// Writes `line` plus terminator with a single write call
pub(crate) fn append_line<W: Write>(out: &mut W, line: &Line<'_>) -> std::io::Result<()> {
    let mut frame = Vec::with_capacity(line.len() + 1);
    frame.extend_from_slice(line.as_bytes());
    frame.push(crate::framer::TERMINATOR);
    out.write_all(&frame)
}
