//! Single-fire interruption signal.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Fires at most once and never queues.
///
/// Children fire with their parent, or on their own without affecting
/// siblings.
#[derive(Debug, Clone, Default)]
pub struct InterruptWatcher {
    token: CancellationToken,
}

impl InterruptWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Fires the signal. Later calls are no-ops.
    pub fn interrupt(&self) {
        self.token.cancel();
    }

    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal has fired.
    pub async fn interrupted(&self) {
        self.token.cancelled().await;
    }

    /// Watcher fired by the first Ctrl-C (SIGINT) delivered to the process.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_ctrl_c() -> Self {
        let watcher = Self::new();
        let fire = watcher.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("interrupt received");
                    fire.interrupt();
                }
                Err(e) => warn!("failed to listen for Ctrl-C: {e}"),
            }
        });
        watcher
    }
}
