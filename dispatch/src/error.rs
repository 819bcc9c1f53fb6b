use dispatch_dlq::DlqError;
use dispatch_resilience::{ConfigError, RegistryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The caller cancelled the dispatch. Nothing was dead-lettered.
    #[error("Dispatch cancelled")]
    Cancelled,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The message failed and could not be archived either.
    #[error("Failed to dead-letter message: {0}")]
    DeadLetter(#[from] DlqError),
}

impl DispatchError {
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
