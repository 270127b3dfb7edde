//! Process settings
//!
//! Settings are read once at startup, from an optional JSON file plus command
//! line overrides, and never change afterwards. Every field has a default so
//! a file only needs to name what differs.
//!
//! ```json
//! {
//!     "device": "/dev/ttyUSB0",
//!     "baud": 4800,
//!     "server": "gps.example.net",
//!     "secret": "hunter2",
//!     "capture_dir": "/mnt/backlog"
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as, skip_serializing_none};

use crate::{
    Result,
    batch::DEFAULT_BATCH_CAPACITY,
    client::{DEFAULT_RETRY_INTERVAL, Endpoint},
    error::GpsPushError,
    relay::{DEFAULT_PIPE_SIZE, DEFAULT_RELAY_PATH},
    sentence::Trigger,
    serial::BaudRate,
};

/// Default serial device
pub const DEFAULT_DEVICE: &str = "/dev/ttyAMA0";

/// Default collector port
pub const DEFAULT_PORT: u16 = 80;

#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Serial device the receiver is attached to
    pub device: PathBuf,
    pub baud: BaudRate,
    /// Collector host name; required by the run modes that push
    pub server: Option<String>,
    pub port: u16,
    /// Value of the shared-secret header
    pub secret: String,
    /// Directory holding the index file and numbered capture logs; local
    /// logging is off when unset
    pub capture_dir: Option<PathBuf>,
    /// FIFO used by the split topology
    pub relay: PathBuf,
    /// Sentence identifier that flushes the batch
    pub trigger: Trigger,
    pub batch_capacity: usize,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub retry_interval: Duration,
    /// Relay pipe capacity; `null` keeps the kernel default
    pub pipe_size: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            device: PathBuf::from(DEFAULT_DEVICE),
            baud: BaudRate::default(),
            server: None,
            port: DEFAULT_PORT,
            secret: String::new(),
            capture_dir: None,
            relay: PathBuf::from(DEFAULT_RELAY_PATH),
            trigger: Trigger::default(),
            batch_capacity: DEFAULT_BATCH_CAPACITY,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            pipe_size: Some(DEFAULT_PIPE_SIZE),
        }
    }
}

impl Settings {
    /// Parses settings from JSON; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON settings file
    ///
    /// # Errors
    /// [`GpsPushError::ConfigError`] when the file is unreadable or invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| GpsPushError::ConfigError(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Collector address, failing when no server is configured
    pub fn endpoint(&self) -> Result<Endpoint> {
        match self.server.as_deref() {
            Some(host) if !host.is_empty() => Ok(Endpoint::new(host, self.port)),
            _ => Err(GpsPushError::ConfigError("missing server".into())),
        }
    }
}
