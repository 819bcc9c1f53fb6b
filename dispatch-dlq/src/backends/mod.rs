//! Storage backends for the dead-letter queue
//!
//! - `memory`: process-local storage, lost on restart
//! - `postgres`: durable storage in a schema-qualified table (feature `postgres`)

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryDeadLetterStore;
#[cfg(feature = "postgres")]
pub use postgres::{PostgresDeadLetterStore, QualifiedTable};
