//! Transfer state transitions, logged and optionally forwarded as events.

use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// States a transfer moves through.
///
/// `Running -> {Completed, Interrupted} -> Resuming -> {Done, Failed}`.
/// A primary failure moves straight from `Running` to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Running,
    Completed,
    Interrupted,
    Resuming,
    Done,
    Failed,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Done | Self::Failed)
    }
}

/// One state change, as written to diagnostic traces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferEvent {
    pub transfer: String,
    pub state: TransferState,
    /// Resume offset, once the primary has been interrupted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    pub primary_bytes: u64,
    pub fallback_bytes: u64,
    pub elapsed_ms: u64,
}

impl TransferEvent {
    /// Serializes the event as a single JSON line (without the newline).
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Records the path of one transfer and forwards each step.
#[derive(Debug)]
pub(crate) struct StateTrace {
    transfer: String,
    started: Instant,
    offset: Option<u64>,
    path: Vec<TransferState>,
    events: Option<mpsc::Sender<TransferEvent>>,
}

impl StateTrace {
    pub(crate) fn new(transfer: String, events: Option<mpsc::Sender<TransferEvent>>) -> Self {
        Self {
            transfer,
            started: Instant::now(),
            offset: None,
            path: Vec::new(),
            events,
        }
    }

    pub(crate) fn set_offset(&mut self, offset: u64) {
        self.offset = Some(offset);
    }

    pub(crate) fn enter(&mut self, state: TransferState, primary_bytes: u64, fallback_bytes: u64) {
        self.path.push(state);
        let elapsed_ms = self.started.elapsed().as_millis() as u64;

        info!(
            transfer = %self.transfer,
            state = ?state,
            offset = self.offset,
            primary_bytes,
            fallback_bytes,
            elapsed_ms,
            "transfer state"
        );

        if let Some(tx) = &self.events {
            let event = TransferEvent {
                transfer: self.transfer.clone(),
                state,
                offset: self.offset,
                primary_bytes,
                fallback_bytes,
                elapsed_ms,
            };
            // Non-blocking: a slow trace consumer must not stall the transfer.
            if tx.try_send(event).is_err() {
                debug!(transfer = %self.transfer, "transfer event dropped");
            }
        }
    }

    pub(crate) fn into_path(self) -> Vec<TransferState> {
        self.path
    }
}
