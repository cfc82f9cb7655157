//! Listener startup and shutdown.

use anyhow::Context;
use resumefetch_fast_open::{ConnectionHandler, FastOpenListener, ListenerError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ServerConfig;

/// Binds the fast-open listener and serves until `cancel` fires.
pub async fn run(config: ServerConfig, cancel: CancellationToken) -> anyhow::Result<()> {
    if !config.resource.is_file() {
        warn!(
            resource = %config.resource.display(),
            "resource does not exist yet, connections will be closed without data"
        );
    }

    let listener = match FastOpenListener::bind(&config.listener_config()) {
        Ok(listener) => listener,
        Err(e @ ListenerError::FastOpenUnsupported(_)) => {
            error!("{e}");
            return Err(e).context("enable net.ipv4.tcp_fastopen (bit 2) to run the server");
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to start listener on {}", config.bind));
        }
    };

    info!(
        addr = %listener.local_addr(),
        resource = %config.resource.display(),
        policy = ?config.policy,
        "server ready"
    );

    let handler = ConnectionHandler::new(config.policy, config.resource);
    listener.run(handler, cancel).await?;
    Ok(())
}

/// Token cancelled by the first Ctrl-C.
pub fn shutdown_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutting down"),
            Err(e) => warn!("failed to listen for Ctrl-C: {e}"),
        }
        trigger.cancel();
    });
    cancel
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use resumefetch_fast_open::HandlerPolicy;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = ServerConfig {
            bind: taken.local_addr().unwrap(),
            ..ServerConfig::default()
        };

        let err = run(config, CancellationToken::new()).await.unwrap_err();
        let message = format!("{err:#}");
        assert!(
            message.contains("failed to start listener") || message.contains("Fast Open"),
            "{message}"
        );
    }

    #[tokio::test]
    async fn serves_ranged_requests_until_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let resource = dir.path().join("resource.bin");
        std::fs::write(&resource, b"0123456789").unwrap();

        // Reserve a free port, then release it for the server.
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let config = ServerConfig {
            bind: addr,
            resource,
            policy: HandlerPolicy::Ranged,
            ..ServerConfig::default()
        };
        let cancel = CancellationToken::new();
        let server = tokio::spawn(run(config, cancel.clone()));

        let mut stream = None;
        for _ in 0..50 {
            if server.is_finished() {
                break;
            }
            if let Ok(s) = tokio::net::TcpStream::connect(addr).await {
                stream = Some(s);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let Some(mut stream) = stream else {
            let result = server.await.unwrap();
            eprintln!("skipping: server did not start: {result:?}");
            return;
        };

        stream
            .write_all(b"GET /resource.bin HTTP/1.1\r\nHost: localhost\r\nRange: bytes=4-\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8(response).unwrap();
        assert!(response.starts_with("HTTP/1.1 206"), "{response}");
        assert!(response.ends_with("456789"));

        cancel.cancel();
        server.await.unwrap().unwrap();
    }
}
