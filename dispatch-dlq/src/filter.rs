use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::{DeadLetterEntry, DeadLetterReason};

/// Criteria for selecting dead-letter entries.
///
/// Every field that is set must match (conjunction); unset fields match
/// everything. Date bounds are inclusive. `skip` and `limit` paginate query
/// results in enqueue order and are ignored when counting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterFilter {
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub reason: Option<DeadLetterReason>,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub replayed: Option<bool>,
    #[serde(default)]
    pub source_queue: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub min_attempts: Option<u32>,
    #[serde(default)]
    pub skip: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl DeadLetterFilter {
    /// Filter matching every entry.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn by_reason(reason: DeadLetterReason) -> Self {
        Self::default().reason(reason)
    }

    #[must_use]
    pub fn message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }

    #[must_use]
    pub const fn reason(mut self, reason: DeadLetterReason) -> Self {
        self.reason = Some(reason);
        self
    }

    #[must_use]
    pub const fn since(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    #[must_use]
    pub const fn until(mut self, to: DateTime<Utc>) -> Self {
        self.to = Some(to);
        self
    }

    #[must_use]
    pub const fn replayed(mut self, replayed: bool) -> Self {
        self.replayed = Some(replayed);
        self
    }

    #[must_use]
    pub fn source_queue(mut self, source_queue: impl Into<String>) -> Self {
        self.source_queue = Some(source_queue.into());
        self
    }

    #[must_use]
    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    #[must_use]
    pub const fn min_attempts(mut self, attempts: u32) -> Self {
        self.min_attempts = Some(attempts);
        self
    }

    #[must_use]
    pub const fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Same criteria without pagination.
    #[must_use]
    pub fn unpaginated(&self) -> Self {
        Self {
            skip: 0,
            limit: None,
            ..self.clone()
        }
    }

    /// Whether `entry` satisfies every criterion. Pagination is not considered.
    #[must_use]
    pub fn matches(&self, entry: &DeadLetterEntry) -> bool {
        self.message_type
            .as_ref()
            .is_none_or(|message_type| entry.message_type == *message_type)
            && self.reason.is_none_or(|reason| entry.reason == reason)
            && self.from.is_none_or(|from| entry.enqueued_at >= from)
            && self.to.is_none_or(|to| entry.enqueued_at <= to)
            && self.replayed.is_none_or(|replayed| entry.replayed == replayed)
            && self
                .source_queue
                .as_ref()
                .is_none_or(|queue| entry.source_queue.as_ref() == Some(queue))
            && self
                .correlation_id
                .as_ref()
                .is_none_or(|id| entry.correlation_id.as_ref() == Some(id))
            && self.min_attempts.is_none_or(|min| entry.attempts >= min)
    }
}
