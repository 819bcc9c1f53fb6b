//! Shared vocabulary for the dispatch resilience layer.
//!
//! - [`Message`]: the snapshot of an outbound message that resilience components
//!   carry around (type tag, opaque payload, correlation identifiers)
//! - [`ErrorKind`] and [`Classify`]: exact-tag failure classification consumed by
//!   the retry policy, the circuit breaker and the dead-letter queue
//! - [`logging`]: subscriber initialisation for binaries and tests

pub mod error;
pub mod logging;
pub mod message;

pub use error::{Classify, ErrorKind};
pub use message::Message;
pub use tracing;

/// Process-wide lifecycle signal broadcast to background tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
