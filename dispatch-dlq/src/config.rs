use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    backends::MemoryDeadLetterStore,
    error::{DlqError, Result},
    queue::DeadLetterQueue,
};

mod defaults {
    pub fn schema() -> String {
        "dispatch".to_string()
    }

    pub fn table() -> String {
        "dead_letters".to_string()
    }

    pub const fn command_timeout_secs() -> u64 {
        30
    }

    pub const fn retention_days() -> u64 {
        30
    }

    pub const fn purge_interval_secs() -> u64 {
        3600
    }

    pub const fn max_connections() -> u32 {
        5
    }
}

/// Selects the dead-letter storage backend.
///
/// In-memory storage for development:
/// ```ron
/// dead_letter: Memory,
/// ```
///
/// PostgreSQL storage:
/// ```ron
/// dead_letter: Postgres((
///     connection_string: "postgres://dispatch@localhost/dispatch",
///     schema: "dispatch",
///     table: "dead_letters",
///     retention_days: 14,
/// )),
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeadLetterConfig {
    /// Process-local storage, lost on restart. No retention purge.
    #[default]
    Memory,
    /// Durable storage (requires the `postgres` feature)
    Postgres(PostgresConfig),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub connection_string: String,

    #[serde(default = "defaults::schema")]
    pub schema: String,

    #[serde(default = "defaults::table")]
    pub table: String,

    /// Upper bound for any single database command
    #[serde(default = "defaults::command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Entries older than this are removed by the scheduled purge
    #[serde(default = "defaults::retention_days")]
    pub retention_days: u64,

    #[serde(default = "defaults::purge_interval_secs")]
    pub purge_interval_secs: u64,

    #[serde(default = "defaults::max_connections")]
    pub max_connections: u32,
}

impl PostgresConfig {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            schema: defaults::schema(),
            table: defaults::table(),
            command_timeout_secs: defaults::command_timeout_secs(),
            retention_days: defaults::retention_days(),
            purge_interval_secs: defaults::purge_interval_secs(),
            max_connections: defaults::max_connections(),
        }
    }

    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    #[must_use]
    pub const fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days.saturating_mul(24 * 60 * 60))
    }

    #[must_use]
    pub const fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }

    /// # Errors
    ///
    /// Returns [`DlqError::Configuration`] if any value is unusable.
    pub fn validate(&self) -> Result<()> {
        if self.connection_string.trim().is_empty() {
            return Err(DlqError::Configuration(
                "connection_string must not be empty".to_string(),
            ));
        }
        if self.command_timeout_secs == 0 {
            return Err(DlqError::Configuration(
                "command_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.retention_days == 0 {
            return Err(DlqError::Configuration(
                "retention_days must be greater than zero".to_string(),
            ));
        }
        if self.purge_interval_secs == 0 {
            return Err(DlqError::Configuration(
                "purge_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(DlqError::Configuration(
                "max_connections must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl DeadLetterConfig {
    /// Build a queue over the configured backend. No replay handler is attached.
    ///
    /// # Errors
    ///
    /// Returns [`DlqError::Configuration`] for invalid settings or when the
    /// `postgres` feature is not compiled in, and a storage error if the
    /// database cannot be reached.
    pub async fn into_queue(self) -> Result<DeadLetterQueue> {
        match self {
            Self::Memory => Ok(DeadLetterQueue::new(Arc::new(MemoryDeadLetterStore::new()))),
            Self::Postgres(config) => {
                config.validate()?;
                connect_postgres(config).await
            }
        }
    }
}

#[cfg(feature = "postgres")]
async fn connect_postgres(config: PostgresConfig) -> Result<DeadLetterQueue> {
    let store = crate::backends::PostgresDeadLetterStore::connect(&config).await?;
    Ok(DeadLetterQueue::new(Arc::new(store))
        .with_retention(config.retention(), config.purge_interval()))
}

#[cfg(not(feature = "postgres"))]
#[allow(clippy::unused_async)]
async fn connect_postgres(_config: PostgresConfig) -> Result<DeadLetterQueue> {
    Err(DlqError::Configuration(
        "PostgreSQL dead-letter storage requires the `postgres` feature".to_string(),
    ))
}
