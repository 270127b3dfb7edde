//! Run loops wiring framing, batching, logging, relaying and delivery
//!
//! A [`Runner`] reads one line at a time from a raw stream and hands it to a
//! [`LineSink`]. The sinks implement the run modes:
//!
//! - [`Direct`]: capture log + batch + push, in one process
//! - [`Gateway`]: capture log + relay write (capture half of the split mode)
//! - [`Forwarder`]: batch + push (delivery half, reading the relay)
//! - [`Monitor`]: print every line, no network
//!
//! Sinks only return errors that must stop the process; everything degraded
//! is logged and reported as an [`Outcome`].

use std::io::Write;

use crate::{
    Result,
    batch::Batch,
    client::blocking::{Connect, DeliveryClient, DeliveryClientCore},
    config::Settings,
    error::GpsPushError,
    framer::{Line, LineFramer, RawStream},
    relay::{RelayReader, RelayWriter, ignore_broken_pipe},
    sentence::{Trigger, is_sentence},
    serial::SerialPort,
    storage::CaptureLog,
};

/// What became of one framed line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Not a sentence; neither logged nor batched
    Skipped,
    /// Appended to the batch, which now holds this many lines
    Buffered(usize),
    /// Trigger seen: the batch was pushed (or the push failed) and reset
    Flushed {
        lines: usize,
        bytes: usize,
        delivered: bool,
    },
    /// The line did not fit; the batch was discarded
    Overflowed,
    /// Stored by the capture side; `relayed` is false while no reader is attached
    Captured { relayed: bool },
    /// Written to the monitor output
    Printed,
}

/// Consumer of framed lines
pub trait LineSink {
    fn accept(&mut self, line: &Line<'_>) -> Result<Outcome>;
}

/// Drives a [`LineSink`] from a [`RawStream`]
#[derive(Debug)]
pub struct Runner<S, K> {
    framer: LineFramer<S>,
    sink: K,
}

impl<S: RawStream, K: LineSink> Runner<S, K> {
    /// Frames `stream` and hands each line to `sink`
    pub fn new(stream: S, sink: K) -> Self {
        Runner {
            framer: LineFramer::new(stream),
            sink,
        }
    }

    /// Waits for the next line and processes it
    pub fn step(&mut self) -> Result<Outcome> {
        let line = self.framer.read_line()?;
        tracing::trace!(%line, "line received");
        self.sink.accept(&line)
    }

    /// Processes lines until a fatal error occurs
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.step()?;
        }
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut K {
        &mut self.sink
    }
}

/// Batches sentences and pushes them on every trigger sentence
#[derive(Debug)]
pub struct Forwarder<C> {
    client: DeliveryClientCore<C>,
    batch: Batch,
    trigger: Trigger,
}

impl<C: Connect> Forwarder<C> {
    /// # Arguments
    /// * `client` - Client that already completed the handshake
    /// * `trigger` - Sentence that flushes the batch
    /// * `capacity` - Batch size in bytes
    pub fn new(client: DeliveryClientCore<C>, trigger: Trigger, capacity: usize) -> Self {
        Forwarder {
            client,
            batch: Batch::with_capacity(capacity),
            trigger,
        }
    }

    pub fn client(&self) -> &DeliveryClientCore<C> {
        &self.client
    }

    pub fn batch(&self) -> &Batch {
        &self.batch
    }

    fn flush(&mut self) -> Outcome {
        let lines = self.batch.count();
        let bytes = self.batch.length();

        let delivered = match self.client.push(&self.batch) {
            Ok(response) if response.is_success() => {
                tracing::debug!(lines, bytes, "datapoint pushed");
                true
            }
            Ok(response) => {
                tracing::warn!(status = %response.status_line(), "datapoint rejected");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, lines, "cannot send datapoint");
                false
            }
        };

        self.batch.reset();
        Outcome::Flushed {
            lines,
            bytes,
            delivered,
        }
    }
}

impl<C: Connect> LineSink for Forwarder<C> {
    fn accept(&mut self, line: &Line<'_>) -> Result<Outcome> {
        if !is_sentence(line) {
            tracing::debug!(%line, "skipping invalid header");
            return Ok(Outcome::Skipped);
        }

        match self.batch.append(line) {
            Ok(count) if self.trigger.matches(line) => {
                tracing::debug!(count, trigger = %self.trigger, "trigger sentence received");
                Ok(self.flush())
            }
            Ok(count) => Ok(Outcome::Buffered(count)),
            Err(e @ GpsPushError::BatchOverflow { .. }) => {
                tracing::warn!(error = %e, "batch overflow, discarding batch");
                self.batch.reset();
                Ok(Outcome::Overflowed)
            }
            Err(e) => Err(e),
        }
    }
}

/// Single-process mode: capture log plus batching and delivery
#[derive(Debug)]
pub struct Direct<C> {
    log: Option<CaptureLog>,
    forwarder: Forwarder<C>,
}

impl<C: Connect> Direct<C> {
    /// `log` is `None` when local logging is disabled
    pub fn new(log: Option<CaptureLog>, forwarder: Forwarder<C>) -> Self {
        Direct { log, forwarder }
    }

    pub fn forwarder(&self) -> &Forwarder<C> {
        &self.forwarder
    }
}

impl<C: Connect> LineSink for Direct<C> {
    fn accept(&mut self, line: &Line<'_>) -> Result<Outcome> {
        if is_sentence(line) {
            if let Some(log) = self.log.as_mut() {
                log.append(line);
            }
        }
        self.forwarder.accept(line)
    }
}

/// Capture half of the split mode: capture log plus best-effort relay
#[derive(Debug)]
pub struct Gateway {
    log: Option<CaptureLog>,
    relay: RelayWriter,
}

impl Gateway {
    /// `log` is `None` when local logging is disabled
    pub fn new(log: Option<CaptureLog>, relay: RelayWriter) -> Self {
        Gateway { log, relay }
    }

    pub fn relay(&self) -> &RelayWriter {
        &self.relay
    }
}

impl LineSink for Gateway {
    fn accept(&mut self, line: &Line<'_>) -> Result<Outcome> {
        if !is_sentence(line) {
            tracing::debug!(%line, "skipping invalid header");
            return Ok(Outcome::Skipped);
        }

        if let Some(log) = self.log.as_mut() {
            log.append(line);
        }

        let relayed = match self.relay.write_line(line) {
            Ok(()) => true,
            Err(GpsPushError::NoReader(_)) => {
                tracing::debug!("push end-pipe not ready yet");
                false
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "cannot relay line");
                false
            }
        };

        Ok(Outcome::Captured { relayed })
    }
}

/// Prints every framed line
#[derive(Debug)]
pub struct Monitor<W> {
    out: W,
}

impl<W: Write> Monitor<W> {
    pub fn new(out: W) -> Self {
        Monitor { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> LineSink for Monitor<W> {
    fn accept(&mut self, line: &Line<'_>) -> Result<Outcome> {
        writeln!(self.out, "{line}").map_err(GpsPushError::TransportError)?;
        Ok(Outcome::Printed)
    }
}

fn open_capture_log(settings: &Settings) -> Result<Option<CaptureLog>> {
    settings
        .capture_dir
        .as_ref()
        .map(CaptureLog::open_next)
        .transpose()
}

fn delivery_client(settings: &Settings) -> Result<DeliveryClient> {
    Ok(
        DeliveryClient::new(settings.endpoint()?, settings.secret.clone())
            .retry_interval(settings.retry_interval),
    )
}

/// Serial capture, batching and delivery in this process
pub fn run_direct(settings: &Settings) -> Result<()> {
    let client = delivery_client(settings)?;
    let log = open_capture_log(settings)?;
    let port = SerialPort::open(&settings.device, settings.baud)?;

    client.handshake()?;

    let forwarder = Forwarder::new(client, settings.trigger.clone(), settings.batch_capacity);
    Runner::new(port, Direct::new(log, forwarder)).run()
}

/// Serial capture into the capture log and the relay FIFO
pub fn run_gateway(settings: &Settings) -> Result<()> {
    let log = open_capture_log(settings)?;
    ignore_broken_pipe()?;

    let relay = RelayWriter::create(&settings.relay)?.pipe_size(settings.pipe_size);
    let port = SerialPort::open(&settings.device, settings.baud)?;

    Runner::new(port, Gateway::new(log, relay)).run()
}

/// Relay reading, batching and delivery
pub fn run_forward(settings: &Settings) -> Result<()> {
    let client = delivery_client(settings)?;
    let reader = RelayReader::open(&settings.relay)?;

    client.handshake()?;

    let forwarder = Forwarder::new(client, settings.trigger.clone(), settings.batch_capacity);
    Runner::new(reader, forwarder).run()
}

/// Prints what the receiver sends
pub fn run_monitor(settings: &Settings) -> Result<()> {
    let port = SerialPort::open(&settings.device, settings.baud)?;
    Runner::new(port, Monitor::new(std::io::stdout().lock())).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Endpoint;
    use crate::client::blocking::tests::{Attempt, OK, ScriptedConnector};
    use crate::framer::tests::ChunkedStream;
    use crate::relay::tests::write_when_read;

    fn forwarder(script: Vec<Attempt>, capacity: usize) -> Forwarder<ScriptedConnector> {
        let client = DeliveryClientCore::with_connector(
            ScriptedConnector::new(script),
            Endpoint::new("gps.example.net", 80),
            "hunter2",
        );
        Forwarder::new(client, Trigger::default(), capacity)
    }

    fn body(request: &[u8]) -> &[u8] {
        let split = request
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("request head");
        &request[split + 4..]
    }

    #[test]
    fn test_flush_on_trigger() {
        let stream = ChunkedStream::new(["$GPGGA,123519,4807.038,N\n", "$GPRMC,123519,A\n"]);
        let mut runner = Runner::new(stream, forwarder(vec![Attempt::Respond(OK)], 8192));

        assert_eq!(runner.step().unwrap(), Outcome::Buffered(1));
        assert_eq!(
            runner.step().unwrap(),
            Outcome::Flushed {
                lines: 2,
                bytes: 41,
                delivered: true
            }
        );
        assert!(runner.sink().batch().is_empty());

        let requests = runner.sink().client().connector().requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            body(&requests[0]),
            b"$GPGGA,123519,4807.038,N\n$GPRMC,123519,A\n"
        );
    }

    #[test]
    fn test_failed_push_drops_batch() {
        let stream = ChunkedStream::new(["$GPRMC,1\n$GPGGA,2\n$GPRMC,3\n"]);
        let mut runner = Runner::new(
            stream,
            forwarder(vec![Attempt::Refused, Attempt::Respond(OK)], 8192),
        );

        assert!(matches!(
            runner.step().unwrap(),
            Outcome::Flushed {
                lines: 1,
                delivered: false,
                ..
            }
        ));
        assert_eq!(runner.step().unwrap(), Outcome::Buffered(1));
        assert!(matches!(
            runner.step().unwrap(),
            Outcome::Flushed {
                lines: 2,
                delivered: true,
                ..
            }
        ));

        let requests = runner.sink().client().connector().requests();
        assert_eq!(body(&requests[0]), b"$GPGGA,2\n$GPRMC,3\n");
    }

    #[test]
    fn test_overflow_discards_batch() {
        let stream = ChunkedStream::new(["$GPGSV,1\n$GPGSV,2\n$GPGSV,3\n"]);
        let mut runner = Runner::new(stream, forwarder(Vec::new(), 20));

        assert_eq!(runner.step().unwrap(), Outcome::Buffered(1));
        assert_eq!(runner.step().unwrap(), Outcome::Buffered(2));
        assert_eq!(runner.step().unwrap(), Outcome::Overflowed);
        assert!(runner.sink().batch().is_empty());
    }

    #[test]
    fn test_rejected_datapoint_is_not_fatal() {
        let stream = ChunkedStream::new(["$GPRMC,1\n"]);
        let mut runner = Runner::new(
            stream,
            forwarder(vec![Attempt::Respond(b"HTTP/1.1 403 Forbidden\r\n\r\n")], 8192),
        );

        assert!(matches!(
            runner.step().unwrap(),
            Outcome::Flushed {
                delivered: false,
                ..
            }
        ));
    }

    #[test]
    fn test_gateway_keeps_logging_without_reader() {
        let dir = tempfile::tempdir().unwrap();
        let log = CaptureLog::open_next(dir.path()).unwrap();
        let log_path = log.path().to_path_buf();
        let relay = RelayWriter::create(dir.path().join("gps.pipe")).unwrap();

        let stream = ChunkedStream::new(["junk\n$GPGGA,1\n"]);
        let mut runner = Runner::new(stream, Gateway::new(Some(log), relay));

        assert_eq!(runner.step().unwrap(), Outcome::Skipped);
        assert_eq!(
            runner.step().unwrap(),
            Outcome::Captured { relayed: false }
        );
        assert!(!runner.sink().relay().is_connected());

        assert_eq!(std::fs::read_to_string(log_path).unwrap(), "$GPGGA,1\n");
    }

    #[test]
    fn test_monitor_prints_everything() {
        let stream = ChunkedStream::new(["junk\n$GPGGA,1\n"]);
        let mut runner = Runner::new(stream, Monitor::new(Vec::new()));

        assert_eq!(runner.step().unwrap(), Outcome::Printed);
        assert_eq!(runner.step().unwrap(), Outcome::Printed);
        assert!(runner.step().is_err());
    }

    #[test]
    fn test_run_stops_on_read_error() {
        let stream = ChunkedStream::new(["$GPGGA,1\n"]);
        let mut runner = Runner::new(stream, forwarder(Vec::new(), 8192));

        let err = runner.run().unwrap_err();
        assert!(matches!(err, GpsPushError::ReadError(_)));
        assert_eq!(runner.sink().batch().count(), 1);
    }

    #[test]
    fn test_forward_flushes_lines_from_the_relay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gps.pipe");
        let mut relay = RelayWriter::create(&path).unwrap().pipe_size(None);

        let gateway = std::thread::spawn(move || {
            write_when_read(&mut relay, &Line::new(b"$GPGGA,123519,4807.038,N"));
            write_when_read(&mut relay, &Line::new(b"$GPRMC,123519,A"));
            relay
        });

        let reader = RelayReader::open(&path).unwrap();
        let mut runner = Runner::new(reader, forwarder(vec![Attempt::Respond(OK)], 8192));

        assert_eq!(runner.step().unwrap(), Outcome::Buffered(1));
        assert_eq!(
            runner.step().unwrap(),
            Outcome::Flushed {
                lines: 2,
                bytes: 41,
                delivered: true
            }
        );

        let requests = runner.sink().client().connector().requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].starts_with(b"POST /api/push/datapoint HTTP/1.0\r\n"));
        assert_eq!(
            body(&requests[0]),
            b"$GPGGA,123519,4807.038,N\n$GPRMC,123519,A\n"
        );

        gateway.join().unwrap();
    }
}
