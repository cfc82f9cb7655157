//! Resumable transfers with transport fallback.
//!
//! A [`PrimaryFetcher`] copies a resource from the primary transport into a
//! shared [`ByteSink`]. When an [`InterruptWatcher`] fires first, the
//! [`ResumeCoordinator`] seals the sink, closes the primary connection and
//! fetches exactly the remaining range through a [`FallbackFetcher`], which
//! usually runs over a TCP Fast Open connection.

mod coordinator;
mod error;
mod events;
mod fallback;
mod interrupt;
mod primary;
mod request;
mod sink;
pub mod tls;
pub mod transport;

pub use coordinator::{ResumeCoordinator, TransferOutcome};
pub use error::{FallbackError, SinkSealed, TransferError, TransportError};
pub use events::{TransferEvent, TransferState};
pub use fallback::FallbackFetcher;
pub use interrupt::InterruptWatcher;
pub use primary::{PrimaryFetcher, PrimaryHandle};
pub use request::TransferRequest;
pub use sink::ByteSink;
pub use tls::TlsOptions;
pub use transport::{FastOpenTransport, HttpTransport, Timeouts, Transport, TransportResponse};
