//! Dead-letter entries and the reasons messages end up in the queue.

use std::{error::Error as StdError, fmt, str::FromStr, sync::Arc};

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use dispatch_common::Message;
use serde::{Deserialize, Serialize};

use crate::{error::DlqError, types::DeadLetterId};

/// Why a message was dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeadLetterReason {
    /// Every allowed delivery attempt failed with a retriable error.
    MaxRetriesExceeded,
    /// The destination's circuit was open.
    CircuitBreakerOpen,
    /// The payload could not be decoded.
    DeserializationFailed,
    /// No handler is registered for the message type.
    HandlerNotFound,
    /// The message failed validation.
    ValidationFailed,
    /// An operator or handler rejected the message explicitly.
    ManualRejection,
    /// The message outlived its time-to-live.
    MessageExpired,
    /// The sender was not allowed to deliver the message.
    AuthorizationFailed,
    /// A non-retriable failure without a more specific reason.
    UnhandledException,
    /// The message fails deterministically on every attempt.
    PoisonMessage,
    Unknown,
}

impl DeadLetterReason {
    pub const ALL: [Self; 11] = [
        Self::MaxRetriesExceeded,
        Self::CircuitBreakerOpen,
        Self::DeserializationFailed,
        Self::HandlerNotFound,
        Self::ValidationFailed,
        Self::ManualRejection,
        Self::MessageExpired,
        Self::AuthorizationFailed,
        Self::UnhandledException,
        Self::PoisonMessage,
        Self::Unknown,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MaxRetriesExceeded => "MaxRetriesExceeded",
            Self::CircuitBreakerOpen => "CircuitBreakerOpen",
            Self::DeserializationFailed => "DeserializationFailed",
            Self::HandlerNotFound => "HandlerNotFound",
            Self::ValidationFailed => "ValidationFailed",
            Self::ManualRejection => "ManualRejection",
            Self::MessageExpired => "MessageExpired",
            Self::AuthorizationFailed => "AuthorizationFailed",
            Self::UnhandledException => "UnhandledException",
            Self::PoisonMessage => "PoisonMessage",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeadLetterReason {
    type Err = DlqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|reason| reason.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DlqError::UnknownReason(s.to_string()))
    }
}

/// Snapshot of the failure that caused a message to be dead-lettered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    /// The failure's display message
    pub message: String,
    /// Debug rendering followed by the chain of sources, one per line
    pub trace: Option<String>,
}

impl FailureDetail {
    /// Capture `error` and its source chain.
    pub fn capture(error: &(dyn StdError + '_)) -> Self {
        let mut trace = format!("{error:?}");
        let mut source = error.source();
        while let Some(cause) = source {
            trace.push_str("\ncaused by: ");
            trace.push_str(&cause.to_string());
            source = cause.source();
        }

        Self {
            message: error.to_string(),
            trace: Some(trace),
        }
    }
}

/// A message that could not be delivered, kept for inspection and replay.
///
/// Entries are immutable once stored, except for the replay flag and timestamp
/// which are set together exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: DeadLetterId,
    pub message_type: String,
    pub payload: Arc<[u8]>,
    pub reason: DeadLetterReason,
    pub failure: Option<FailureDetail>,
    pub enqueued_at: DateTime<Utc>,
    /// Delivery attempts made before the message was dead-lettered
    pub attempts: u32,
    pub metadata: AHashMap<String, String>,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub source_queue: Option<String>,
    pub replayed: bool,
    pub replayed_at: Option<DateTime<Utc>>,
}

impl DeadLetterEntry {
    /// Snapshot `message` into a new, not-yet-replayed entry.
    #[must_use]
    pub fn new(
        message: &Message,
        reason: DeadLetterReason,
        failure: Option<FailureDetail>,
        metadata: AHashMap<String, String>,
    ) -> Self {
        Self {
            id: DeadLetterId::generate(),
            message_type: message.message_type.clone(),
            payload: Arc::clone(&message.payload),
            reason,
            failure,
            enqueued_at: Utc::now(),
            attempts: message.attempts,
            metadata,
            correlation_id: message.correlation_id.clone(),
            causation_id: message.causation_id.clone(),
            source_queue: message.source_queue.clone(),
            replayed: false,
            replayed_at: None,
        }
    }

    /// Rebuild the message as it was when it was dead-lettered.
    #[must_use]
    pub fn to_message(&self) -> Message {
        Message {
            message_type: self.message_type.clone(),
            payload: Arc::clone(&self.payload),
            correlation_id: self.correlation_id.clone(),
            causation_id: self.causation_id.clone(),
            source_queue: self.source_queue.clone(),
            attempts: self.attempts,
        }
    }

    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.failure.as_ref().map(|failure| failure.message.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io;

    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("publish failed")]
    struct PublishError {
        #[source]
        source: io::Error,
    }

    #[test]
    fn test_reason_round_trips_through_text() {
        assert_eq!(DeadLetterReason::ALL.len(), 11);
        for reason in DeadLetterReason::ALL {
            assert_eq!(reason.to_string().parse::<DeadLetterReason>().unwrap(), reason);
        }
        assert_eq!(
            "poisonmessage".parse::<DeadLetterReason>().unwrap(),
            DeadLetterReason::PoisonMessage
        );
        assert!("Exploded".parse::<DeadLetterReason>().is_err());
    }

    #[test]
    fn test_failure_detail_includes_sources() {
        let error = PublishError {
            source: io::Error::new(io::ErrorKind::ConnectionReset, "peer reset"),
        };
        let detail = FailureDetail::capture(&error);

        assert_eq!(detail.message, "publish failed");
        let trace = detail.trace.unwrap();
        assert!(trace.starts_with("PublishError"));
        assert!(trace.ends_with("caused by: peer reset"));
    }

    #[test]
    fn test_entry_snapshots_message() {
        let message = Message::new("order.created", b"{\"id\":1}".to_vec())
            .with_correlation_id("corr-1")
            .with_source_queue("orders")
            .with_attempts(3);

        let mut metadata = AHashMap::new();
        metadata.insert("transport".to_string(), "rabbitmq".to_string());
        let entry = DeadLetterEntry::new(
            &message,
            DeadLetterReason::MaxRetriesExceeded,
            None,
            metadata.clone(),
        );

        assert_eq!(entry.message_type, "order.created");
        assert_eq!(entry.attempts, 3);
        assert_eq!(entry.metadata, metadata);
        assert!(!entry.replayed);
        assert_eq!(entry.replayed_at, None);
        assert_eq!(entry.to_message(), message);
    }
}
