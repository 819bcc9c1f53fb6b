use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Snapshot of an outbound message as seen by the resilience layer.
///
/// The payload is opaque: codecs live outside this crate and the resilience
/// components only ever copy the bytes around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Type tag used for routing replays back to a handler
    pub message_type: String,
    /// Encoded message body
    pub payload: Arc<[u8]>,
    /// Identifier shared by every message in one logical conversation
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Identifier of the message that caused this one
    #[serde(default)]
    pub causation_id: Option<String>,
    /// Queue or topic the message was read from, if any
    #[serde(default)]
    pub source_queue: Option<String>,
    /// Number of delivery attempts made so far
    #[serde(default)]
    pub attempts: u32,
}

impl Message {
    pub fn new(message_type: impl Into<String>, payload: impl Into<Arc<[u8]>>) -> Self {
        Self {
            message_type: message_type.into(),
            payload: payload.into(),
            correlation_id: None,
            causation_id: None,
            source_queue: None,
            attempts: 0,
        }
    }

    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_causation_id(mut self, id: impl Into<String>) -> Self {
        self.causation_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_source_queue(mut self, queue: impl Into<String>) -> Self {
        self.source_queue = Some(queue.into());
        self
    }

    #[must_use]
    pub const fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}
