//! Delivery client for the collector endpoint
//!
//! Every call opens a fresh connection, sends one request and reads the
//! response until the server closes. The startup handshake (`validate` on the
//! ping and session endpoints) waits forever for the network to come back;
//! datapoint pushes are never retried.
//!
//! The run loops use the synchronous client in [`blocking`]. This module holds
//! the shared types and an async twin built on `futures-io`, with tokio
//! providing connections and timers.
//!
//! # Example
//!
//! ```no_run
//! use gps_push::client::{Endpoint, blocking::DeliveryClient};
//!
//! # fn example() -> gps_push::Result<()> {
//! let client = DeliveryClient::new(Endpoint::new("gps.example.net", 80), "secret");
//! let session = client.handshake()?;
//! println!("session opened at {}", session.opened_at);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Result,
    error::GpsPushError,
    protocol::{PushDecodeAsync, PushEncodeAsync, PushRequest, Response},
};

#[cfg(feature = "tokio")]
use crate::{
    batch::Batch,
    protocol::{DATAPOINT_PATH, PING_PATH, SESSION_PATH},
};

/// Blocking (synchronous) client implementation
pub mod blocking;

/// Pause between two handshake attempts while the collector is unreachable
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Collector address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// # Arguments
    /// * `host` - Host name or address, also sent as the `Host` header
    /// * `port` - TCP port of the collector
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Endpoint {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Proof that the startup handshake succeeded
///
/// There is no renewal: each later push opens its own connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub endpoint: Endpoint,
    pub opened_at: DateTime<Utc>,
}

impl Session {
    pub(crate) fn start(endpoint: &Endpoint) -> Self {
        let session = Session {
            endpoint: endpoint.clone(),
            opened_at: Utc::now(),
        };
        tracing::info!(opened_at = %session.opened_at, "session established");
        session
    }
}

/// Turns a handshake response into an error unless it is `200 OK`
pub(crate) fn check_handshake(path: &str, response: Response) -> Result<Response> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(GpsPushError::HandshakeError {
            path: path.to_string(),
            status: response.status_line(),
        })
    }
}

/// Verdict on one `validate` attempt, shared by both clients
///
/// `None` means the collector was not reachable and the caller should sleep
/// for its retry interval before the next attempt.
pub(crate) fn settle_attempt(path: &str, attempt: Result<Response>) -> Option<Result<Response>> {
    match attempt {
        Ok(response) => Some(check_handshake(path, response)),
        Err(e) if e.is_retryable() => {
            tracing::warn!(path, error = %e, "not reachable, retrying");
            None
        }
        Err(e) => Some(Err(e)),
    }
}

/// Async delivery client
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    endpoint: Endpoint,
    secret: String,
    retry_interval: Duration,
}

impl DeliveryClient {
    /// Creates a client for `endpoint`
    ///
    /// # Arguments
    /// * `endpoint` - Collector host and port
    /// * `secret` - Value of the `X-GPS-Auth` header on every request
    pub fn new<S: Into<String>>(endpoint: Endpoint, secret: S) -> Self {
        DeliveryClient {
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

    /// Sends one request over an already connected stream
    pub async fn post_over<Stream>(
        &self,
        mut stream: Stream,
        path: &str,
        body: &[u8],
    ) -> Result<Response>
    where
        Stream: futures_io::AsyncRead + futures_io::AsyncWrite + Unpin,
    {
        let request = PushRequest {
            path,
            host: &self.endpoint.host,
            secret: &self.secret,
            body,
        };

        stream.write_request(&request).await?;
        let response = stream.read_response().await?;
        tracing::debug!(path, status = %response.status_line(), "response received");
        Ok(response)
    }
}

#[cfg(feature = "tokio")]
impl DeliveryClient {
    /// Connects to the collector and posts `body` to `path`
    ///
    /// Resolution and connect failures come back as
    /// [`GpsPushError::Unreachable`].
    pub async fn post(&self, path: &str, body: &[u8]) -> Result<Response> {
        use tokio_util::compat::TokioAsyncReadCompatExt;

        let stream =
            tokio::net::TcpStream::connect((self.endpoint.host.as_str(), self.endpoint.port))
                .await
                .map_err(|source| GpsPushError::Unreachable {
                    host: self.endpoint.host.clone(),
                    port: self.endpoint.port,
                    source,
                })?;

        self.post_over(stream.compat(), path, body).await
    }

    /// Posts an empty body until the collector answers, then requires `200 OK`
    pub async fn validate(&self, path: &str) -> Result<Response> {
        loop {
            if let Some(verdict) = settle_attempt(path, self.post(path, &[]).await) {
                return verdict;
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    /// Liveness check followed by a session-start request
    pub async fn handshake(&self) -> Result<Session> {
        tracing::info!(endpoint = %self.endpoint, "validating remote server");
        self.validate(PING_PATH).await?;

        tracing::info!("requesting server new-session");
        self.validate(SESSION_PATH).await?;

        Ok(Session::start(&self.endpoint))
    }

    /// Posts a batch to the datapoint endpoint, once
    pub async fn push(&self, batch: &Batch) -> Result<Response> {
        self.post(DATAPOINT_PATH, batch.as_bytes()).await
    }
}
