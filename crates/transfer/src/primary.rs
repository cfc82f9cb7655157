//! Primary fetch: a copy task that fills a [`ByteSink`] from the primary
//! transport until the body ends or the sink is sealed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::error::{TransferError, TransportError};
use crate::request::TransferRequest;
use crate::sink::ByteSink;
use crate::transport::{Transport, next_chunk};

/// Starts primary copy tasks.
#[derive(Clone)]
pub struct PrimaryFetcher {
    transport: Arc<dyn Transport>,
    read_idle: Option<Duration>,
}

impl PrimaryFetcher {
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

    /// Opens `request` on the primary transport and copies its body into a
    /// fresh sink on a background task.
    pub fn start(&self, request: TransferRequest) -> PrimaryHandle {
        let sink = ByteSink::new();
        let (done_tx, done_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(copy_task(
            Arc::clone(&self.transport),
            request,
            sink.clone(),
            self.read_idle,
            cancel.clone(),
            done_tx,
        ));

        PrimaryHandle {
            sink,
            done: done_rx,
            task: Some(task),
            _guard: cancel.clone().drop_guard(),
            cancel,
        }
    }
}

/// Owns a running primary copy task.
///
/// Dropping the handle cancels the task, which releases the primary
/// connection.
pub struct PrimaryHandle {
    sink: ByteSink,
    done: oneshot::Receiver<Result<u64, TransferError>>,
    task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl PrimaryHandle {
    pub fn sink(&self) -> &ByteSink {
        &self.sink
    }

    /// Waits for the copy task to report completion.
    ///
    /// Must not be called again once it has returned.
    pub async fn wait(&mut self) -> Result<u64, TransferError> {
        match (&mut self.done).await {
            Ok(result) => result,
            Err(_) => Err(TransferError::TaskLost),
        }
    }

    /// Returns a completion that is already queued, without waiting.
    pub fn try_completion(&mut self) -> Option<Result<u64, TransferError>> {
        self.done.try_recv().ok()
    }

    /// Returns `true` once the copy task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Cancels the copy task and waits for it to exit.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!("primary copy task panicked: {e}");
                }
            }
        }
    }
}

enum CopyEnd {
    /// The body ended; all bytes are in the sink.
    Finished(u64),
    /// The sink was sealed mid-body.
    Sealed,
}

async fn copy_task(
    transport: Arc<dyn Transport>,
    request: TransferRequest,
    sink: ByteSink,
    read_idle: Option<Duration>,
    cancel: CancellationToken,
    done: oneshot::Sender<Result<u64, TransferError>>,
) {
    let transfer = request.target();
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(%transfer, bytes = sink.len(), "primary copy cancelled");
            return;
        }
        result = copy_body(transport.as_ref(), &request, &sink, read_idle) => result,
    };

    match result {
        Ok(CopyEnd::Finished(bytes)) => {
            info!(%transfer, bytes, "primary body complete");
            let _ = done.send(Ok(bytes));
        }
        Ok(CopyEnd::Sealed) => {
            debug!(%transfer, bytes = sink.len(), "primary copy stopped at seal");
        }
        Err(e) => {
            warn!(%transfer, bytes = sink.len(), "primary transfer failed: {e}");
            let _ = done.send(Err(e));
        }
    }
}

async fn copy_body(
    transport: &dyn Transport,
    request: &TransferRequest,
    sink: &ByteSink,
    read_idle: Option<Duration>,
) -> Result<CopyEnd, TransferError> {
    let response = transport.open(request).await?;
    if !response.is_success() {
        return Err(TransferError::Status {
            target: request.target(),
            status: response.status,
        });
    }
    if let Some(len) = response.content_length {
        sink.set_expected_len(len);
    }
    debug!(
        transfer = %request.target(),
        transport = transport.name(),
        status = response.status,
        content_length = response.content_length,
        "primary response"
    );

    let mut body = response.body;
    while let Some(chunk) = next_chunk(&mut body, read_idle).await? {
        if let Err(sealed) = sink.append(&chunk) {
            debug!(len = sealed.len, "sink sealed, dropping primary stream");
            return Ok(CopyEnd::Sealed);
        }
    }

    let received = sink.len();
    if let Some(expected) = response.content_length {
        if received < expected {
            return Err(TransportError::Truncated { expected, received }.into());
        }
    }
    Ok(CopyEnd::Finished(received))
}
