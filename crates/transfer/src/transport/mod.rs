//! Transports that carry a [`TransferRequest`] to a server.
//!
//! The primary path is [`HttpTransport`] (HTTP/2 over TLS). The fallback path
//! is [`FastOpenTransport`] (HTTP/1.1 over a TCP Fast Open connection).

mod fast_open;
mod http;

pub use fast_open::FastOpenTransport;
pub use http::HttpTransport;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use ::http::HeaderMap;
use ::http::header::CONTENT_RANGE;
use resumefetch_fast_open::ContentRange;

use crate::error::TransportError;
use crate::request::TransferRequest;

/// Response body as a stream of chunks. Dropping it releases the connection.
pub type BodyStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Status line summary plus the body stream of a response.
pub struct TransportResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    /// Parsed `Content-Range`, if the server sent a valid one.
    pub content_range: Option<ContentRange>,
    pub body: BodyStream,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("content_range", &self.content_range)
            .finish_non_exhaustive()
    }
}

/// Opens a request and hands back the response head and body.
pub trait Transport: Send + Sync {
    fn open(
        &self,
        request: &TransferRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + Send + '_>>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Connection and read deadlines shared by both transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    /// Maximum wait for the next body chunk. `None` waits indefinitely.
    pub read_idle: Option<Duration>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            read_idle: None,
        }
    }
}

pub(crate) fn content_range(headers: &HeaderMap) -> Option<ContentRange> {
    headers
        .get(CONTENT_RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(ContentRange::parse)
}

/// Reads the next chunk, failing with [`TransportError::Timeout`] when
/// `idle` elapses first.
pub(crate) async fn next_chunk(
    body: &mut BodyStream,
    idle: Option<Duration>,
) -> Result<Option<Bytes>, TransportError> {
    let next = match idle {
        Some(limit) => tokio::time::timeout(limit, body.next())
            .await
            .map_err(|_| TransportError::Timeout)?,
        None => body.next().await,
    };
    next.transpose()
}
