//! Error types for fast-open sockets.

use std::io;
use std::net::SocketAddr;

/// Errors produced while setting up or running a [`FastOpenListener`].
///
/// [`FastOpenListener`]: crate::FastOpenListener
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// The platform or kernel does not support `TCP_FASTOPEN` on listeners.
    #[error("TCP Fast Open server support is unavailable (unsupported kernel or platform): {0}")]
    FastOpenUnsupported(#[source] io::Error),

    #[error("failed to set TCP_FASTOPEN socket option: {0}")]
    SocketOption(#[source] io::Error),

    #[error("failed to create socket: {0}")]
    Socket(#[source] io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to listen: {0}")]
    Listen(#[source] io::Error),

    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),
}

impl ListenerError {
    /// Returns `true` for errors caused by configuration or platform support
    /// rather than by the network.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::FastOpenUnsupported(_) | Self::SocketOption(_))
    }
}

/// Errors produced on a single connection (client or server side).
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("connection timed out")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),
}
