//! TCP Fast Open sockets for the fallback transfer path.
//!
//! Provides the listening side (a fast-open enabled listener that serves a
//! resource to every accepted connection) and the connecting side (a client
//! socket that coalesces its first write into the handshake where the
//! platform supports it).
//!
//! The `Range` and `Content-Range` types in [`range`] are shared by the
//! server's ranged handler and the client's fast-open transport.

pub mod connect;
pub mod error;
pub mod handler;
pub mod listener;
pub mod range;
mod sockopt;

pub use connect::connect;
pub use error::{ConnectionError, ListenerError};
pub use handler::{Connection, ConnectionHandler, HandlerPolicy};
pub use listener::{FastOpenListener, ListenerConfig};
pub use range::{ByteRange, ContentRange};

use std::time::Duration;

/// Listen backlog used when none is configured.
pub const DEFAULT_BACKLOG: u32 = 23;

/// Length of the pending fast-open request queue on the listening socket.
pub const DEFAULT_FAST_OPEN_QUEUE: u32 = 5;

/// Size of the buffer the probe handler reads from a client.
pub const PROBE_SIZE: usize = 1024;

/// Read/write buffer size for streaming resources (64 KB).
pub const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Timeout for a fast-open connection attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
