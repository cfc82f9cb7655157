//! Fast-open listening socket and its accept loop.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::ListenerError;
use crate::handler::{Connection, ConnectionHandler};
use crate::sockopt;
use crate::{DEFAULT_BACKLOG, DEFAULT_FAST_OPEN_QUEUE};

/// Address and queue sizes for a [`FastOpenListener`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerConfig {
    pub addr: SocketAddr,
    pub backlog: u32,
    pub fast_open_queue: u32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            backlog: DEFAULT_BACKLOG,
            fast_open_queue: DEFAULT_FAST_OPEN_QUEUE,
        }
    }
}

/// A listening socket with `TCP_FASTOPEN` enabled.
#[derive(Debug)]
pub struct FastOpenListener {
    local_addr: SocketAddr,
    backlog: u32,
    queue_len: u32,
    listener: TcpListener,
}

impl FastOpenListener {
    /// Creates, configures, binds and starts listening on a socket.
    ///
    /// Fails with [`ListenerError::FastOpenUnsupported`] when the platform
    /// cannot enable fast-open on a listener. That failure is reported before
    /// any bind is attempted.
    pub fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        Self::bind_with(config, sockopt::set_listen_fast_open)
    }

    pub(crate) fn bind_with<F>(config: &ListenerConfig, enable_fast_open: F) -> Result<Self, ListenerError>
    where
        F: FnOnce(&TcpSocket, u32) -> io::Result<()>,
    {
        let socket = if config.addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(ListenerError::Socket)?;

        enable_fast_open(&socket, config.fast_open_queue).map_err(|e| {
            if sockopt::is_unsupported(&e) {
                ListenerError::FastOpenUnsupported(e)
            } else {
                ListenerError::SocketOption(e)
            }
        })?;
        debug!(queue = config.fast_open_queue, "TCP_FASTOPEN enabled");

        socket
            .set_reuseaddr(true)
            .map_err(ListenerError::Socket)?;
        socket.bind(config.addr).map_err(|source| ListenerError::Bind {
            addr: config.addr,
            source,
        })?;

        let listener = socket.listen(config.backlog).map_err(ListenerError::Listen)?;
        let local_addr = listener.local_addr().map_err(ListenerError::Listen)?;

        info!(
            %local_addr,
            backlog = config.backlog,
            fast_open_queue = config.fast_open_queue,
            "fast-open listener bound"
        );

        Ok(Self {
            local_addr,
            backlog: config.backlog,
            queue_len: config.fast_open_queue,
            listener,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn backlog(&self) -> u32 {
        self.backlog
    }

    pub fn fast_open_queue(&self) -> u32 {
        self.queue_len
    }

    /// Accepts the next connection.
    pub async fn accept(&self) -> Result<Connection, ListenerError> {
        let (stream, peer_addr) = self.listener.accept().await.map_err(ListenerError::Accept)?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer_addr, "failed to set TCP_NODELAY: {e}");
        }
        Ok(Connection { peer_addr, stream })
    }

    /// Accepts connections until `cancel` fires, serving each on its own task.
    ///
    /// An accept failure ends the loop with [`ListenerError::Accept`].
    pub async fn run(self, handler: ConnectionHandler, cancel: CancellationToken) -> Result<(), ListenerError> {
        let handler = Arc::new(handler);
        info!(addr = %self.local_addr, policy = ?handler.policy(), "accepting connections");

        loop {
            let conn = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(addr = %self.local_addr, "listener stopped");
                    return Ok(());
                }
                result = self.accept() => match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(addr = %self.local_addr, "{e}");
                        return Err(e);
                    }
                },
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                handler.handle(conn).await;
            });
        }
    }
}
