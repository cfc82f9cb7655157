//! Client side of a fast-open connection.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpSocket, TcpStream};
use tracing::debug;

use crate::error::ConnectionError;
use crate::sockopt;

/// Opens a TCP connection to `addr`, requesting fast-open semantics.
///
/// On Linux the socket is configured with `TCP_FASTOPEN_CONNECT`, so the
/// handshake is deferred until the first write and that write is carried in
/// the SYN when the peer has issued a fast-open cookie. Where the option is
/// unavailable the connection falls back to a regular handshake.
pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<TcpStream, ConnectionError> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    match sockopt::set_connect_fast_open(&socket) {
        Ok(()) => debug!(%addr, "TCP_FASTOPEN_CONNECT enabled"),
        Err(e) => debug!(%addr, "fast-open connect unavailable, using regular handshake: {e}"),
    }

    let stream = match tokio::time::timeout(timeout, socket.connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Err(ConnectionError::Timeout),
    };
    stream.set_nodelay(true)?;

    debug!(%addr, "fast-open connection opened");
    Ok(stream)
}
