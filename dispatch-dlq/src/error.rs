//! Error types for the dead-letter queue.

use std::time::Duration;

use dispatch_common::{Classify, ErrorKind};
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level dead-letter queue error type.
#[derive(Debug, Error)]
pub enum DlqError {
    /// The storage backend failed. `target` identifies the entry or table involved.
    #[error("Dead-letter {operation} failed for {target}: {source}")]
    Storage {
        operation: &'static str,
        target: String,
        #[source]
        source: BoxError,
    },

    /// A storage command did not complete within the configured timeout.
    #[error("Dead-letter {operation} for {target} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        target: String,
        after: Duration,
    },

    /// Invalid or unsupported configuration.
    #[error("Invalid dead-letter configuration: {0}")]
    Configuration(String),

    /// Replay was requested but no replay handler is configured.
    #[error("No replay handler configured")]
    NoReplayHandler,

    /// A stored value could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown dead-letter reason: {0}")]
    UnknownReason(String),
}

impl DlqError {
    pub fn storage(
        operation: &'static str,
        target: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Storage {
            operation,
            target: target.into(),
            source: source.into(),
        }
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::Timeout { .. })
    }
}

impl Classify for DlqError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage { .. } => ErrorKind::CONNECTION,
            Self::Timeout { .. } => ErrorKind::TIMEOUT,
            Self::Configuration(_) | Self::NoReplayHandler => ErrorKind::VALIDATION,
            Self::Serialization(_) | Self::UnknownReason(_) => ErrorKind::DESERIALIZATION,
        }
    }
}

/// Specialized `Result` type for dead-letter operations.
pub type Result<T> = std::result::Result<T, DlqError>;
