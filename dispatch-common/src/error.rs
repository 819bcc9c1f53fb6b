//! Failure classification shared by every resilience component.
//!
//! Retry and dead-letter decisions are made on an [`ErrorKind`] tag rather than on
//! the Rust type of the error. Tags are compared by exact equality: a policy that
//! lists `timeout` as retriable does not also retry `connection`, even if both are
//! produced by the same error enum.

use std::{borrow::Cow, fmt, io};

use serde::{Deserialize, Serialize};

/// Discriminating tag for a failure, compared by exact identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorKind(Cow<'static, str>);

impl ErrorKind {
    /// Temporary failure that is expected to succeed on a later attempt.
    pub const TRANSIENT: Self = Self::new("transient");
    /// The operation did not finish in time.
    pub const TIMEOUT: Self = Self::new("timeout");
    /// The transport could not be reached or dropped the connection.
    pub const CONNECTION: Self = Self::new("connection");
    /// The message failed validation.
    pub const VALIDATION: Self = Self::new("validation");
    /// The payload could not be decoded.
    pub const DESERIALIZATION: Self = Self::new("deserialization");
    /// The caller is not allowed to publish to the destination.
    pub const AUTHORIZATION: Self = Self::new("authorization");
    /// No handler is registered for the message type.
    pub const HANDLER_NOT_FOUND: Self = Self::new("handler_not_found");
    /// The message outlived its time-to-live.
    pub const EXPIRED: Self = Self::new("expired");
    /// The message fails deterministically on every attempt.
    pub const POISON: Self = Self::new("poison");
    /// A circuit breaker rejected the call without running it.
    pub const CIRCUIT_OPEN: Self = Self::new("circuit_open");
    /// Cooperative cancellation was requested.
    pub const CANCELLED: Self = Self::new("cancelled");
    /// Anything that does not fit a more specific tag.
    pub const UNKNOWN: Self = Self::new("unknown");

    #[must_use]
    pub const fn new(tag: &'static str) -> Self {
        Self(Cow::Borrowed(tag))
    }

    /// Build a tag from runtime data, e.g. configuration.
    pub fn custom(tag: impl Into<String>) -> Self {
        Self(Cow::Owned(tag.into()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for ErrorKind {
    fn from(tag: &'static str) -> Self {
        Self::new(tag)
    }
}

/// A failure the resilience engine knows how to classify.
///
/// The trait is object safe so breakers can accept `&dyn Classify` from any
/// error type the caller's operation produces.
pub trait Classify: std::error::Error + Send + Sync {
    /// Exact classification tag for this failure.
    fn kind(&self) -> ErrorKind;

    /// Returns `true` if the failure represents cooperative cancellation.
    ///
    /// Cancellation is never retried and never counts against circuit health.
    fn is_cancellation(&self) -> bool {
        self.kind() == ErrorKind::CANCELLED
    }
}

impl Classify for io::Error {
    fn kind(&self) -> ErrorKind {
        match io::Error::kind(self) {
            io::ErrorKind::TimedOut => ErrorKind::TIMEOUT,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe => ErrorKind::CONNECTION,
            io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => ErrorKind::TRANSIENT,
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                ErrorKind::DESERIALIZATION
            }
            io::ErrorKind::InvalidInput => ErrorKind::VALIDATION,
            io::ErrorKind::PermissionDenied => ErrorKind::AUTHORIZATION,
            _ => ErrorKind::UNKNOWN,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_kinds_compare_by_exact_tag() {
        assert_eq!(ErrorKind::TIMEOUT, ErrorKind::custom("timeout"));
        assert_ne!(ErrorKind::TIMEOUT, ErrorKind::CONNECTION);
        assert_ne!(ErrorKind::custom("Timeout"), ErrorKind::TIMEOUT);

        let set: HashSet<ErrorKind> = [ErrorKind::TIMEOUT].into_iter().collect();
        assert!(set.contains(&ErrorKind::custom("timeout")));
    }

    #[test]
    fn test_io_error_classification() {
        let err = io::Error::new(io::ErrorKind::TimedOut, "slow broker");
        assert_eq!(Classify::kind(&err), ErrorKind::TIMEOUT);
        assert!(!err.is_cancellation());

        let err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(Classify::kind(&err), ErrorKind::CONNECTION);

        let err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(Classify::kind(&err), ErrorKind::AUTHORIZATION);

        let err = io::Error::other("boom");
        assert_eq!(Classify::kind(&err), ErrorKind::UNKNOWN);
    }

    #[test]
    fn test_kind_deserializes_from_plain_string() {
        let kinds: Vec<ErrorKind> = ron::from_str(r#"["timeout", "my_custom"]"#).unwrap();
        assert_eq!(kinds, vec![ErrorKind::TIMEOUT, ErrorKind::custom("my_custom")]);
        assert_eq!(kinds[1].to_string(), "my_custom");
    }
}
