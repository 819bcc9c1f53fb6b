use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::time::Instant;

use crate::{
    entry::DeadLetterEntry,
    error::Result,
    filter::DeadLetterFilter,
    store::{DEFAULT_CLAIM_LEASE, DeadLetterStore},
    types::DeadLetterId,
};

#[derive(Debug, Clone)]
struct Slot {
    entry: DeadLetterEntry,
    claimed_at: Option<Instant>,
}

impl Slot {
    fn is_claimed(&self, lease: Duration) -> bool {
        self.claimed_at.is_some_and(|at| at.elapsed() < lease)
    }
}

/// In-memory dead-letter store
///
/// Entries live in a `DashMap` keyed by id and are lost when the process exits.
/// Claims are taken under the entry's shard lock, so concurrent replayers
/// cannot both claim the same entry. A claim expires after the lease.
///
/// # Performance
/// - Insert: O(1)
/// - Get: O(1)
/// - Query / count: O(n), plus O(m log m) to sort the m matches
#[derive(Debug, Clone)]
pub struct MemoryDeadLetterStore {
    entries: Arc<DashMap<DeadLetterId, Slot>>,
    claim_lease: Duration,
}

impl Default for MemoryDeadLetterStore {
    fn default() -> Self {
        Self {
            entries: Arc::default(),
            claim_lease: DEFAULT_CLAIM_LEASE,
        }
    }
}

impl MemoryDeadLetterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace [`DEFAULT_CLAIM_LEASE`].
    #[must_use]
    pub const fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DeadLetterStore for MemoryDeadLetterStore {
    async fn insert(&self, entry: &DeadLetterEntry) -> Result<()> {
        self.entries.insert(
            entry.id,
            Slot {
                entry: entry.clone(),
                claimed_at: None,
            },
        );
        Ok(())
    }

    async fn get(&self, id: &DeadLetterId) -> Result<Option<DeadLetterEntry>> {
        Ok(self.entries.get(id).map(|slot| slot.entry.clone()))
    }

    async fn query(&self, filter: &DeadLetterFilter) -> Result<Vec<DeadLetterEntry>> {
        let mut matches: Vec<_> = self
            .entries
            .iter()
            .filter(|slot| filter.matches(&slot.entry))
            .map(|slot| slot.entry.clone())
            .collect();

        // ULIDs sort by creation time
        matches.sort_by_key(|entry| entry.id);

        Ok(matches
            .into_iter()
            .skip(filter.skip)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn count(&self, filter: &DeadLetterFilter) -> Result<u64> {
        let count = self
            .entries
            .iter()
            .filter(|slot| filter.matches(&slot.entry))
            .count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }

    async fn try_claim(&self, id: &DeadLetterId) -> Result<bool> {
        Ok(self.entries.get_mut(id).is_some_and(|mut slot| {
            if slot.entry.replayed || slot.is_claimed(self.claim_lease) {
                false
            } else {
                slot.claimed_at = Some(Instant::now());
                true
            }
        }))
    }

    async fn mark_replayed(&self, id: &DeadLetterId, at: DateTime<Utc>) -> Result<bool> {
        Ok(self.entries.get_mut(id).is_some_and(|mut slot| {
            slot.claimed_at = None;
            if slot.entry.replayed {
                false
            } else {
                slot.entry.replayed = true;
                slot.entry.replayed_at = Some(at);
                true
            }
        }))
    }

    async fn release_claim(&self, id: &DeadLetterId) -> Result<()> {
        if let Some(mut slot) = self.entries.get_mut(id) {
            slot.claimed_at = None;
        }
        Ok(())
    }

    async fn purge(&self, older_than: DateTime<Utc>, replayed_only: bool) -> Result<u64> {
        let mut removed: u64 = 0;
        self.entries.retain(|_, slot| {
            let keep =
                slot.entry.enqueued_at >= older_than || (replayed_only && !slot.entry.replayed);
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}
