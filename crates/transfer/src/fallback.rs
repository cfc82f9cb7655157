//! Fallback fetch of the remaining range over the fast-open transport.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{FallbackError, TransportError};
use crate::request::TransferRequest;
use crate::sink::ByteSink;
use crate::transport::{Transport, next_chunk};

/// Fetches a ranged continuation into a new sink.
#[derive(Clone)]
pub struct FallbackFetcher {
    transport: Arc<dyn Transport>,
    read_idle: Option<Duration>,
}

impl FallbackFetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            read_idle: None,
        }
    }

    pub fn with_read_idle(mut self, read_idle: Option<Duration>) -> Self {
        self.read_idle = read_idle;
        self
    }

    /// Opens `request` and copies the body.
    ///
    /// The server must answer `206` with a `Content-Range` starting at the
    /// requested offset, or `200` when the range starts at 0. A `416` whose
    /// `Content-Range: bytes */<len>` equals the offset means nothing is left
    /// and yields an empty sink. Any other answer is rejected rather than
    /// re-fetching the whole resource.
    pub async fn fetch(&self, request: &TransferRequest) -> Result<ByteSink, FallbackError> {
        let offset = request.range_start.unwrap_or(0);
        let transfer = request.target();

        let response = self
            .transport
            .open(request)
            .await
            .map_err(FallbackError::Connect)?;

        let complete_len = response.content_range.and_then(|r| r.complete_len);
        match response.status {
            206 => {
                let first = response.content_range.and_then(|r| r.first());
                if first != Some(offset) {
                    warn!(%transfer, offset, ?first, "fallback returned a different range");
                    return Err(FallbackError::RangeRejected { status: 206 });
                }
            }
            200 if offset == 0 => {}
            416 if complete_len == Some(offset) => {
                info!(%transfer, offset, "resource ends at the resume offset, nothing left to fetch");
                let sink = ByteSink::new();
                sink.set_expected_len(0);
                return Ok(sink);
            }
            status => {
                warn!(%transfer, offset, status, "fallback ignored the range request");
                return Err(FallbackError::RangeRejected { status });
            }
        }

        let sink = ByteSink::new();
        if let Some(len) = response.content_length {
            sink.set_expected_len(len);
        }

        let mut body = response.body;
        loop {
            let chunk = match next_chunk(&mut body, self.read_idle).await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(source) => return Err(read_failed(&sink, source)),
            };
            if let Err(sealed) = sink.append(&chunk) {
                return Err(read_failed(&sink, TransportError::Protocol(sealed.to_string())));
            }
        }

        let received = sink.len();
        if let Some(expected) = response.content_length {
            if received < expected {
                return Err(read_failed(
                    &sink,
                    TransportError::Truncated { expected, received },
                ));
            }
        }

        info!(
            %transfer,
            transport = self.transport.name(),
            offset,
            bytes = received,
            "fallback body complete"
        );
        Ok(sink)
    }
}

fn read_failed(sink: &ByteSink, source: TransportError) -> FallbackError {
    FallbackError::Read {
        received: sink.len(),
        partial: sink.bytes(),
        source,
    }
}
