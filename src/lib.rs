//! # gps-push
//!
//! Captures NMEA 0183 sentences from a serial GPS receiver, keeps a local
//! capture log, and forwards the sentences in batches to a remote collector
//! over plain HTTP.
//!
//! ## Overview
//!
//! Serial bytes are framed into lines by [`framer::LineFramer`]. Lines that
//! start with `$` are appended to the capture log and to a [`batch::Batch`];
//! when the trigger sentence (`$GPRMC` by default) arrives, the batch is
//! posted to the collector and reset.
//!
//! The capture and delivery halves can also run as two processes joined by a
//! named pipe (see [`relay`]): the gateway keeps reading the receiver whatever
//! happens to the network, and the forwarder can be restarted at will.
//!
//! ## Example
//!
//! ```no_run
//! use gps_push::client::{Endpoint, blocking::DeliveryClient};
//! use gps_push::runner::{Direct, Forwarder, Runner};
//! use gps_push::sentence::Trigger;
//! use gps_push::serial::{BaudRate, SerialPort};
//!
//! fn example() -> gps_push::Result<()> {
//!     let client = DeliveryClient::new(Endpoint::new("gps.example.net", 80), "secret");
//!     client.handshake()?;
//!
//!     let port = SerialPort::open("/dev/ttyAMA0", BaudRate::B9600)?;
//!     let forwarder = Forwarder::new(client, Trigger::default(), 8192);
//!     Runner::new(port, Direct::new(None, forwarder)).run()
//! }
//! ```

use crate::error::GpsPushError;

/// Size-bounded sentence batches
pub mod batch;

/// Delivery client for the collector (async, with a blocking twin)
pub mod client;

/// Process settings
pub mod config;

/// Error types used throughout the library
pub mod error;

/// Newline framing over raw byte streams
pub mod framer;

/// Collector wire protocol
pub mod protocol;

/// Named-pipe relay for the split topology
pub mod relay;

/// Run loops for every mode
pub mod runner;

/// Sentence marker and flush trigger
pub mod sentence;

/// Serial device setup
pub mod serial;

/// Log index and capture log
pub mod storage;

/// Convenience type alias for Results with GpsPushError
pub type Result<T> = core::result::Result<T, GpsPushError>;
