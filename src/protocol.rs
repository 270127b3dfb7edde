//! Collector wire protocol
//!
//! Requests are bare HTTP/1.0 POSTs with a shared-secret header; the body is
//! the raw batch. The response is never parsed beyond its status prefix.

use std::io::{ErrorKind, Read, Write};

use crate::{Result, error::GpsPushError};

/// Byte-exact prefix of an accepted response
pub const SUCCESS_MARKER: &[u8] = b"HTTP/1.1 200 OK";

/// Header carrying the shared secret
pub const AUTH_HEADER: &str = "X-GPS-Auth";

/// Upper bound on the response bytes kept
pub const RESPONSE_LIMIT: usize = 8192;

const READ_CHUNK: usize = 512;

/// The status line is all the client looks at
fn response_complete(raw: &[u8]) -> bool {
    raw.len() >= RESPONSE_LIMIT || raw.contains(&b'\n')
}

/// Liveness endpoint
pub const PING_PATH: &str = "/api/ping";
/// Session-start endpoint
pub const SESSION_PATH: &str = "/api/push/session";
/// Datapoint endpoint for batches
pub const DATAPOINT_PATH: &str = "/api/push/datapoint";

/// One outbound POST
#[derive(Debug, Clone, PartialEq)]
pub struct PushRequest<'a> {
    pub path: &'a str,
    pub host: &'a str,
    pub secret: &'a str,
    pub body: &'a [u8],
}

impl PushRequest<'_> {
    /// Serializes the request head and body
    pub fn to_frame(&self) -> Vec<u8> {
        let head = format!(
            "POST {} HTTP/1.0\r\nContent-Length: {}\r\n{}: {}\r\nHost: {}\r\n\r\n",
            self.path,
            self.body.len(),
            AUTH_HEADER,
            self.secret,
            self.host
        );

        let mut frame = Vec::with_capacity(head.len() + self.body.len());
        frame.extend_from_slice(head.as_bytes());
        frame.extend_from_slice(self.body);
        frame
    }
}

/// Raw collector response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response(Vec<u8>);

impl Response {
    pub fn new(raw: Vec<u8>) -> Self {
        Response(raw)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether the response starts with [`SUCCESS_MARKER`]
    pub fn is_success(&self) -> bool {
        self.0.starts_with(SUCCESS_MARKER)
    }

    /// First line of the response, for diagnostics
    pub fn status_line(&self) -> String {
        let end = self
            .0
            .iter()
            .position(|&b| b == b'\r' || b == b'\n')
            .unwrap_or(self.0.len());
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }
}

/// Request writing for blocking streams
pub trait PushEncode: Write {
    fn write_request(&mut self, request: &PushRequest<'_>) -> Result<()> {
        self.write_all(&request.to_frame())
            .and_then(|()| self.flush())
            .map_err(GpsPushError::TransportError)
    }
}

impl<W: Write + ?Sized> PushEncode for W {}

/// Response reading for blocking streams
///
/// Reading stops at the end of the status line, at [`RESPONSE_LIMIT`] bytes
/// or when the peer closes, whichever comes first. A collector that keeps the
/// connection open after answering does not stall the caller.
pub trait PushDecode: Read {
    fn read_response(&mut self) -> Result<Response> {
        let mut raw = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        while !response_complete(&raw) {
            let want = chunk.len().min(RESPONSE_LIMIT - raw.len());
            match self.read(&mut chunk[..want]) {
                Ok(0) => break,
                Ok(n) => raw.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(GpsPushError::TransportError(e)),
            }
        }
        Ok(Response(raw))
    }
}

impl<R: Read + ?Sized> PushDecode for R {}

/// Async twin of [`PushEncode`]
pub trait PushEncodeAsync: futures_io::AsyncWrite + Unpin {
    fn write_request(
        &mut self,
        request: &PushRequest<'_>,
    ) -> impl std::future::Future<Output = Result<()>> {
        let frame = request.to_frame();
        async move {
            use futures_util::AsyncWriteExt;
            self.write_all(&frame)
                .await
                .map_err(GpsPushError::TransportError)?;
            self.flush().await.map_err(GpsPushError::TransportError)
        }
    }
}

impl<W: futures_io::AsyncWrite + Unpin + ?Sized> PushEncodeAsync for W {}

/// Async twin of [`PushDecode`], with the same stopping rules
pub trait PushDecodeAsync: futures_io::AsyncRead + Unpin {
    fn read_response(&mut self) -> impl std::future::Future<Output = Result<Response>> {
        async move {
            use futures_util::AsyncReadExt;
            let mut raw = Vec::new();
            let mut chunk = [0u8; READ_CHUNK];
            while !response_complete(&raw) {
                let want = chunk.len().min(RESPONSE_LIMIT - raw.len());
                match AsyncReadExt::read(&mut *self, &mut chunk[..want]).await {
                    Ok(0) => break,
                    Ok(n) => raw.extend_from_slice(&chunk[..n]),
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(GpsPushError::TransportError(e)),
                }
            }
            Ok(Response(raw))
        }
    }
}

impl<R: futures_io::AsyncRead + Unpin + ?Sized> PushDecodeAsync for R {}
