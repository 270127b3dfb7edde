//! Blocking (synchronous) delivery client
//!
//! This is the client the run loops use. Connections go through the
//! [`Connect`] trait so the handshake and push logic can run over any
//! `Read + Write` transport; [`TcpConnector`] is the production one.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::client::{DEFAULT_RETRY_INTERVAL, Endpoint, Session, settle_attempt};
use crate::error::GpsPushError;
use crate::protocol::{
    DATAPOINT_PATH, PING_PATH, PushDecode, PushEncode, PushRequest, Response, SESSION_PATH,
};
use crate::{Result, batch::Batch};

/// Opens one fresh connection to the collector
pub trait Connect {
    type Stream: Read + Write;

    /// Failures to resolve or reach the endpoint must be reported as
    /// [`GpsPushError::Unreachable`]
    fn connect(&self, endpoint: &Endpoint) -> Result<Self::Stream>;
}

/// Plain TCP, trying every resolved address in turn
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connect for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self, endpoint: &Endpoint) -> Result<TcpStream> {
        let unreachable = |source| GpsPushError::Unreachable {
            host: endpoint.host.clone(),
            port: endpoint.port,
            source,
        };

        let addrs = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(unreachable)?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect(addr) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }

        Err(unreachable(last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved")
        })))
    }
}

/// Core implementation of the blocking delivery client
///
/// # Type Parameters
/// * `C` - How connections are opened (TCP in production)
#[derive(Debug, Clone)]
pub struct DeliveryClientCore<C> {
    connector: C,
    endpoint: Endpoint,
    secret: String,
    retry_interval: Duration,
}

/// Blocking delivery client over TCP
pub type DeliveryClient = DeliveryClientCore<TcpConnector>;

impl DeliveryClient {
    /// Creates a TCP client for `endpoint`
    ///
    /// # Arguments
    /// * `endpoint` - Collector host and port
    /// * `secret` - Value of the `X-GPS-Auth` header on every request
    pub fn new<S: Into<String>>(endpoint: Endpoint, secret: S) -> Self {
        Self::with_connector(TcpConnector, endpoint, secret)
    }
}

impl<C: Connect> DeliveryClientCore<C> {
    /// Creates a client that opens its connections through `connector`
    ///
    /// # Arguments
    /// * `connector` - Connection factory, [`TcpConnector`] in production
    /// * `endpoint` - Collector host and port
    /// * `secret` - Value of the `X-GPS-Auth` header on every request
    pub fn with_connector<S: Into<String>>(connector: C, endpoint: Endpoint, secret: S) -> Self {
        DeliveryClientCore {
            connector,
            endpoint,
            secret: secret.into(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Overrides the pause between handshake attempts
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Connects, sends `body` to `path` and returns the raw response
    pub fn post(&self, path: &str, body: &[u8]) -> Result<Response> {
        tracing::debug!(path, bytes = body.len(), "posting data");

        let mut stream = self.connector.connect(&self.endpoint)?;
        let request = PushRequest {
            path,
            host: &self.endpoint.host,
            secret: &self.secret,
            body,
        };

        stream.write_request(&request)?;
        let response = stream.read_response()?;
        tracing::debug!(path, status = %response.status_line(), "response received");
        Ok(response)
    }

    /// Posts an empty body until the collector answers, then requires `200 OK`
    ///
    /// Retryable failures sleep for the retry interval and try again, with no
    /// upper bound. Any other answer than `HTTP/1.1 200 OK` is returned as a
    /// fatal [`GpsPushError::HandshakeError`].
    pub fn validate(&self, path: &str) -> Result<Response> {
        self.validate_with(path, std::thread::sleep)
    }

    /// [`validate`](Self::validate) with a caller-supplied sleep
    pub fn validate_with<F>(&self, path: &str, mut sleep: F) -> Result<Response>
    where
        F: FnMut(Duration),
    {
        loop {
            if let Some(verdict) = settle_attempt(path, self.post(path, &[])) {
                return verdict;
            }
            sleep(self.retry_interval);
        }
    }

    /// Liveness check followed by a session-start request
    pub fn handshake(&self) -> Result<Session> {
        self.handshake_with(std::thread::sleep)
    }

    /// [`handshake`](Self::handshake) with a caller-supplied sleep
    pub fn handshake_with<F>(&self, mut sleep: F) -> Result<Session>
    where
        F: FnMut(Duration),
    {
        tracing::info!(endpoint = %self.endpoint, "validating remote server");
        self.validate_with(PING_PATH, &mut sleep)?;

        tracing::info!("requesting server new-session");
        self.validate_with(SESSION_PATH, &mut sleep)?;

        Ok(Session::start(&self.endpoint))
    }

    /// Posts a batch to the datapoint endpoint, once
    pub fn push(&self, batch: &Batch) -> Result<Response> {
        self.post(DATAPOINT_PATH, batch.as_bytes())
    }
}
