use async_trait::async_trait;
use dispatch_common::{Classify, ErrorKind, Message};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A named destination messages are published to.
///
/// The name identifies the transport's circuit breaker, so two transports with
/// the same name (ignoring case) share failure state.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Publish `message`. Implementations should stop early and return a
    /// [`TransportError::cancelled`] error once `token` is cancelled.
    async fn publish(&self, message: &Message, token: CancellationToken)
    -> Result<(), TransportError>;
}

/// Failure reported by a [`Transport`], tagged with its classification.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl TransportError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TRANSIENT, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TIMEOUT, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CONNECTION, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::VALIDATION, message)
    }

    pub fn poison(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::POISON, message)
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::CANCELLED, "Publish cancelled")
    }
}

impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        Self {
            kind: Classify::kind(&error),
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }
}

impl Classify for TransportError {
    fn kind(&self) -> ErrorKind {
        self.kind.clone()
    }
}
