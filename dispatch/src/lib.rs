//! Resilient message dispatch.
//!
//! [`ResilientDispatcher`] publishes a [`Message`](dispatch_common::Message) on a
//! [`Transport`], retrying transient failures with backoff, guarding each
//! transport with its own circuit breaker, and archiving anything that still
//! fails in the dead-letter queue.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod transport;

pub use config::{Dispatch, find_config_file};
pub use dispatcher::{DispatchOutcome, ResilientDispatcher, dead_letter_reason};
pub use error::DispatchError;
pub use transport::{Transport, TransportError};
