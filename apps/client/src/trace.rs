//! Per-transfer diagnostic traces (`--qlog`).
//!
//! Each transfer gets its own `client_<id>.qlog` file holding one JSON
//! object per state change.

use std::path::{Path, PathBuf};

use anyhow::Context;
use resumefetch_transfer::TransferEvent;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const EVENT_BUFFER: usize = 64;

/// Writes events received on its channel until every sender is dropped.
pub struct TraceWriter {
    pub path: PathBuf,
    task: JoinHandle<()>,
}

impl TraceWriter {
    /// Creates a new trace file in `dir` and returns the event sender.
    pub async fn create(dir: &Path) -> anyhow::Result<(Self, mpsc::Sender<TransferEvent>)> {
        let path = dir.join(format!("client_{}.qlog", uuid::Uuid::new_v4().simple()));
        let file = tokio::fs::File::create(&path)
            .await
            .with_context(|| format!("failed to create trace {}", path.display()))?;
        info!(path = %path.display(), "writing transfer trace");

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let task = tokio::spawn(write_events(BufWriter::new(file), rx, path.clone()));
        Ok((Self { path, task }, tx))
    }

    /// Waits for the remaining events to be flushed.
    pub async fn finish(self) {
        if let Err(e) = self.task.await {
            warn!(path = %self.path.display(), "trace writer failed: {e}");
        }
    }
}

async fn write_events(
    mut out: BufWriter<tokio::fs::File>,
    mut rx: mpsc::Receiver<TransferEvent>,
    path: PathBuf,
) {
    while let Some(event) = rx.recv().await {
        let line = match event.to_json_line() {
            Ok(line) => line,
            Err(e) => {
                warn!("failed to encode transfer event: {e}");
                continue;
            }
        };
        if let Err(e) = out.write_all(format!("{line}\n").as_bytes()).await {
            warn!(path = %path.display(), "failed to write trace: {e}");
            return;
        }
    }
    if let Err(e) = out.flush().await {
        warn!(path = %path.display(), "failed to flush trace: {e}");
    }
}

#[cfg(test)]
mod tests {
    use resumefetch_transfer::TransferState;

    use super::*;

    #[tokio::test]
    async fn writes_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, tx) = TraceWriter::create(dir.path()).await.unwrap();
        let name = writer.path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("client_") && name.ends_with(".qlog"));

        for state in [TransferState::Running, TransferState::Completed] {
            tx.send(TransferEvent {
                transfer: "example.com:443".into(),
                state,
                offset: None,
                primary_bytes: 10,
                fallback_bytes: 0,
                elapsed_ms: 1,
            })
            .await
            .unwrap();
        }
        drop(tx);
        let path = writer.path.clone();
        writer.finish().await;

        let contents = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"running\""));
        assert!(lines[1].contains("\"completed\""));
    }
}
