//! Races primary completion against interruption and resumes over the
//! fallback transport from the exact sealed offset.

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::TransferError;
use crate::events::{StateTrace, TransferEvent, TransferState};
use crate::fallback::FallbackFetcher;
use crate::interrupt::InterruptWatcher;
use crate::primary::{PrimaryFetcher, PrimaryHandle};
use crate::request::TransferRequest;

/// Result of a successful transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    /// The assembled resource.
    pub bytes: Bytes,
    pub primary_len: u64,
    pub fallback_len: u64,
    /// Offset the fallback resumed from, if it ran.
    pub resumed_at: Option<u64>,
    pub path: Vec<TransferState>,
}

impl TransferOutcome {
    pub fn total_len(&self) -> u64 {
        self.primary_len + self.fallback_len
    }

    pub fn was_resumed(&self) -> bool {
        self.resumed_at.is_some()
    }
}

/// Drives one transfer through `Running -> {Completed, Interrupted} ->
/// Resuming -> {Done, Failed}`.
#[derive(Clone)]
pub struct ResumeCoordinator {
    primary: PrimaryFetcher,
    fallback: FallbackFetcher,
    events: Option<mpsc::Sender<TransferEvent>>,
}

impl ResumeCoordinator {
    pub fn new(primary: PrimaryFetcher, fallback: FallbackFetcher) -> Self {
        Self {
            primary,
            fallback,
            events: None,
        }
    }

    /// Forwards every state change to `events`.
    pub fn with_events(mut self, events: mpsc::Sender<TransferEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Runs `request` to completion, resuming once if `interrupt` fires first.
    pub async fn run(
        &self,
        request: TransferRequest,
        interrupt: &InterruptWatcher,
    ) -> Result<TransferOutcome, TransferError> {
        let handle = self.primary.start(request.clone());
        self.coordinate(request, handle, interrupt).await
    }

    /// Drives an already started primary fetch.
    pub async fn coordinate(
        &self,
        request: TransferRequest,
        mut handle: PrimaryHandle,
        interrupt: &InterruptWatcher,
    ) -> Result<TransferOutcome, TransferError> {
        let mut trace = StateTrace::new(request.target(), self.events.clone());
        trace.enter(TransferState::Running, 0, 0);

        // Completion is polled first so an already queued completion wins.
        let completion = tokio::select! {
            biased;
            result = handle.wait() => Some(result),
            _ = interrupt.interrupted() => None,
        };
        if let Some(result) = completion {
            return finish_primary(result, &handle, trace);
        }

        // Interrupted: no append succeeds after the seal, so `offset` is exact.
        let offset = handle.sink().seal();
        // Let a copy task that is already runnable report what it holds.
        tokio::task::yield_now().await;
        handle.close().await;

        match handle.try_completion() {
            Some(Ok(len)) => {
                info!(transfer = %request.target(), offset, "completion arrived with the interrupt");
                return finish_primary(Ok(len), &handle, trace);
            }
            Some(Err(e)) => {
                debug!(transfer = %request.target(), offset, "primary failed after the interrupt: {e}");
            }
            None => {}
        }

        let expected = handle.sink().expected_len();
        if expected == Some(offset) {
            info!(transfer = %request.target(), offset, "interrupted after the last byte");
            return finish_primary(Ok(offset), &handle, trace);
        }
        if let Some(total) = expected.filter(|&total| offset > total) {
            warn!(transfer = %request.target(), offset, total, "primary sent more than it announced");
            trace.enter(TransferState::Failed, offset, 0);
            return Err(TransferError::LengthMismatch {
                expected: total,
                actual: offset,
            });
        }

        trace.set_offset(offset);
        trace.enter(TransferState::Interrupted, offset, 0);
        let retained = handle.sink().bytes();
        drop(handle);

        let mut continuation = request.continuation(offset);
        if let Some(total) = expected {
            continuation = continuation.with_range_end(total - 1);
        }
        trace.enter(TransferState::Resuming, offset, 0);

        let fallback = match self.fallback.fetch(&continuation).await {
            Ok(sink) => sink.bytes(),
            Err(source) => {
                let fallback_received = source.received();
                trace.enter(TransferState::Failed, offset, fallback_received);
                warn!(
                    transfer = %request.target(),
                    offset,
                    retained = retained.len(),
                    fallback_received,
                    "resume failed: {source}"
                );
                return Err(TransferError::Resume {
                    offset,
                    retained,
                    fallback_received,
                    source,
                });
            }
        };

        let fallback_len = fallback.len() as u64;
        let actual = offset + fallback_len;
        if let Some(expected) = expected.filter(|&e| e != actual) {
            trace.enter(TransferState::Failed, offset, fallback_len);
            return Err(TransferError::LengthMismatch { expected, actual });
        }

        let mut bytes = BytesMut::with_capacity(retained.len() + fallback.len());
        bytes.extend_from_slice(&retained);
        bytes.extend_from_slice(&fallback);
        trace.enter(TransferState::Done, offset, fallback_len);

        Ok(TransferOutcome {
            bytes: bytes.freeze(),
            primary_len: offset,
            fallback_len,
            resumed_at: Some(offset),
            path: trace.into_path(),
        })
    }
}

fn finish_primary(
    result: Result<u64, TransferError>,
    handle: &PrimaryHandle,
    mut trace: StateTrace,
) -> Result<TransferOutcome, TransferError> {
    match result {
        Ok(len) => {
            trace.enter(TransferState::Completed, len, 0);
            Ok(TransferOutcome {
                bytes: handle.sink().bytes(),
                primary_len: len,
                fallback_len: 0,
                resumed_at: None,
                path: trace.into_path(),
            })
        }
        Err(e) => {
            trace.enter(TransferState::Failed, handle.sink().len(), 0);
            Err(e)
        }
    }
}
