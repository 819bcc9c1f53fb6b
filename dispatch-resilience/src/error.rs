//! Error types for the resilience engine.
//!
//! Three distinct outcomes can surface from a guarded call:
//! - the operation's own failure, returned unchanged after retries run out
//! - a circuit-open rejection carrying a retry-after hint
//! - cancellation, which always wins over every other outcome

use std::time::Duration;

use dispatch_common::{Classify, ErrorKind};
use thiserror::Error;

/// Rejection raised by an open circuit without running the operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Circuit '{circuit}' is open, retry after {retry_after:?}")]
pub struct CircuitOpenError {
    /// Name of the circuit that rejected the call
    pub circuit: String,
    /// Remaining portion of the open duration
    pub retry_after: Duration,
}

impl Classify for CircuitOpenError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::CIRCUIT_OPEN
    }
}

/// Outcome of a call guarded by a retry policy or a circuit breaker.
#[derive(Debug, Error)]
pub enum ResilienceError<E> {
    /// The caller's cancellation token fired.
    #[error("Operation cancelled")]
    Cancelled,

    /// A circuit breaker rejected the call.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// The operation's own failure, exactly as it was returned.
    #[error(transparent)]
    Operation(E),
}

impl<E> ResilienceError<E> {
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    #[must_use]
    pub const fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }

    /// Borrow the operation failure, if that is what this is.
    pub const fn operation(&self) -> Option<&E> {
        match self {
            Self::Operation(e) => Some(e),
            _ => None,
        }
    }

    /// Take the operation failure, if that is what this is.
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> ResilienceError<ResilienceError<E>> {
    /// Collapse the nesting produced by running a breaker inside a retry policy.
    pub fn flatten(self) -> ResilienceError<E> {
        match self {
            Self::Cancelled | Self::Operation(ResilienceError::Cancelled) => {
                ResilienceError::Cancelled
            }
            Self::CircuitOpen(e) | Self::Operation(ResilienceError::CircuitOpen(e)) => {
                ResilienceError::CircuitOpen(e)
            }
            Self::Operation(ResilienceError::Operation(e)) => ResilienceError::Operation(e),
        }
    }
}

impl<E: Classify> Classify for ResilienceError<E> {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::CANCELLED,
            Self::CircuitOpen(_) => ErrorKind::CIRCUIT_OPEN,
            Self::Operation(e) => e.kind(),
        }
    }

    fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::CircuitOpen(_) => false,
            Self::Operation(e) => e.is_cancellation(),
        }
    }
}

/// Invalid backoff parameters or strategy selection.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackoffError {
    /// A numeric parameter is outside its accepted range.
    #[error("{parameter} is out of range: {reason}")]
    OutOfRange {
        parameter: &'static str,
        reason: String,
    },

    /// The strategy tag is not recognised.
    #[error("Unknown backoff strategy: {0}")]
    UnknownStrategy(String),

    /// No options were supplied to the factory.
    #[error("Backoff options are required")]
    MissingOptions,
}

impl BackoffError {
    pub(crate) fn out_of_range(parameter: &'static str, reason: impl Into<String>) -> Self {
        Self::OutOfRange {
            parameter,
            reason: reason.into(),
        }
    }
}

/// Invalid circuit breaker or retry configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error(transparent)]
    Backoff(#[from] BackoffError),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors raised by the circuit breaker registry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    /// Transport names must contain at least one non-whitespace character.
    #[error("Transport name must not be empty or blank")]
    BlankName,

    #[error(transparent)]
    Config(#[from] ConfigError),
}
