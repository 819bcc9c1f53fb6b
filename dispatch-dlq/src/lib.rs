//! Dead-letter queue for messages that exhausted their delivery attempts.
//!
//! A [`DeadLetterQueue`] archives failed messages in a [`DeadLetterStore`]
//! (in-memory, or PostgreSQL with the `postgres` feature), supports filtered
//! queries and counts, replays entries through a [`ReplayHandler`] with a
//! per-entry single-replay guarantee, and purges expired entries on a schedule.

pub mod backends;
pub mod config;
pub mod entry;
pub mod error;
pub mod filter;
pub mod purge;
pub mod queue;
pub mod store;
pub mod types;

pub use backends::MemoryDeadLetterStore;
#[cfg(feature = "postgres")]
pub use backends::{PostgresDeadLetterStore, QualifiedTable};
pub use config::{DeadLetterConfig, PostgresConfig};
pub use entry::{DeadLetterEntry, DeadLetterReason, FailureDetail};
pub use error::{DlqError, Result};
pub use filter::DeadLetterFilter;
pub use queue::{DeadLetterQueue, ReplayHandler};
pub use store::{DEFAULT_CLAIM_LEASE, DeadLetterStore};
pub use types::DeadLetterId;
