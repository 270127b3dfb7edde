//! Error types for capture, relay and delivery operations
//!
//! Every error carries a [`Severity`] so the run loops can decide whether to
//! stop the process, retry, or log the problem and keep reading.

use std::path::PathBuf;

use thiserror::Error;

/// How the run loops react to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// The process cannot continue safely and must exit non-zero
    Fatal,
    /// The operation may succeed if repeated later (network unreachable)
    Retryable,
    /// The current line or batch is dropped and the loop continues
    Degraded,
}

/// Main error type for gps-push operations
#[derive(Debug, Error)]
pub enum GpsPushError {
    /// The serial device could not be opened
    #[error("cannot open device {path}: {source}")]
    DeviceError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading or applying terminal attributes failed
    #[error("terminal attributes: {0}")]
    TermiosError(#[source] nix::Error),

    /// Waiting for readiness or reading from a raw stream failed
    #[error("stream read: {0}")]
    ReadError(#[source] std::io::Error),

    /// The log index file could not be read back or rewritten
    #[error("log index {path}: {source}")]
    IndexError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The log index file holds something other than a decimal number
    #[error("log index {path}: invalid content {content:?}")]
    IndexCorrupt { path: PathBuf, content: String },

    /// The local capture log could not be created
    #[error("capture log {path}: {source}")]
    CaptureLogError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The relay FIFO could not be created or opened
    #[error("relay {path}: {source}")]
    RelayError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Nobody holds the read end of the relay yet
    #[error("relay {0}: no reader attached")]
    NoReader(PathBuf),

    /// Writing a line into the relay failed (reader gone or pipe full)
    #[error("relay write: {0}")]
    RelayWriteError(#[source] std::io::Error),

    /// A line did not fit into the remaining batch capacity
    #[error("batch overflow: {needed} bytes needed, {available} available")]
    BatchOverflow { needed: usize, available: usize },

    /// Resolving or connecting to the collector failed
    #[error("{host}:{port} not reachable: {source}")]
    Unreachable {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Sending a request or receiving its response failed
    #[error("transport: {0}")]
    TransportError(#[source] std::io::Error),

    /// The collector answered something other than `HTTP/1.1 200 OK`
    #[error("wrong response from server on {path}: {status:?}")]
    HandshakeError { path: String, status: String },

    /// Settings could not be loaded
    #[error("configuration: {0}")]
    ConfigError(String),
}

impl GpsPushError {
    /// Classifies the error for the run loops
    pub fn severity(&self) -> Severity {
        match self {
            GpsPushError::Unreachable { .. } | GpsPushError::TransportError(_) => {
                Severity::Retryable
            }
            GpsPushError::NoReader(_)
            | GpsPushError::RelayWriteError(_)
            | GpsPushError::BatchOverflow { .. } => Severity::Degraded,
            _ => Severity::Fatal,
        }
    }

    /// `true` when the process cannot continue
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// `true` for network failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        self.severity() == Severity::Retryable
    }
}

impl From<serde_json::Error> for GpsPushError {
    fn from(err: serde_json::Error) -> Self {
        GpsPushError::ConfigError(err.to_string())
    }
}
