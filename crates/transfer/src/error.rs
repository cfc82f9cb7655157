//! Error types for transfers and transports.

use bytes::Bytes;
use resumefetch_fast_open::ConnectionError;

/// Errors produced while opening or reading a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP/1.1 error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("invalid request: {0}")]
    Request(#[from] http::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("read timed out")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("body ended after {received} of {expected} bytes")]
    Truncated { expected: u64, received: u64 },
}

/// Errors that end a transfer.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("{target} answered with status {status}")]
    Status { target: String, status: u16 },

    #[error("transfer task ended without reporting a result")]
    TaskLost,

    /// The fallback failed after an interruption. `retained` holds the
    /// primary bytes `[0, offset)`, which are never merged with partial
    /// fallback data.
    #[error("resume from offset {offset} failed: {source}")]
    Resume {
        offset: u64,
        retained: Bytes,
        fallback_received: u64,
        #[source]
        source: FallbackError,
    },

    #[error("assembled {actual} bytes, expected {expected}")]
    LengthMismatch { expected: u64, actual: u64 },
}

/// Errors produced by the fallback fetch.
#[derive(Debug, thiserror::Error)]
pub enum FallbackError {
    #[error("fallback connection failed: {0}")]
    Connect(#[source] TransportError),

    #[error("fallback rejected the range request with status {status}")]
    RangeRejected { status: u16 },

    #[error("fallback read failed after {received} bytes: {source}")]
    Read {
        received: u64,
        partial: Bytes,
        #[source]
        source: TransportError,
    },
}

impl FallbackError {
    /// Bytes the fallback delivered before failing.
    pub fn received(&self) -> u64 {
        match self {
            Self::Read { received, .. } => *received,
            Self::Connect(_) | Self::RangeRejected { .. } => 0,
        }
    }
}

/// Returned when appending to a sealed [`ByteSink`](crate::ByteSink).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("sink sealed at {len} bytes")]
pub struct SinkSealed {
    pub len: u64,
}
