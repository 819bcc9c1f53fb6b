use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    entry::DeadLetterEntry, error::Result, filter::DeadLetterFilter, types::DeadLetterId,
};

/// How long a replay claim is honoured before another replayer may take it.
///
/// A handler that runs longer than the lease can be invoked a second time by
/// another replayer, and both may then mark the entry replayed.
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(5 * 60);

/// Storage backend for dead-letter entries.
///
/// Replay is coordinated through claims: a replayer must win
/// [`try_claim`](Self::try_claim) before invoking its handler, then either
/// [`mark_replayed`](Self::mark_replayed) or [`release_claim`](Self::release_claim).
/// Implementations must make `try_claim` atomic so that concurrent replayers
/// never process the same entry twice, and must treat a claim older than their
/// lease as abandoned.
#[async_trait]
pub trait DeadLetterStore: std::fmt::Debug + Send + Sync {
    /// Store a new entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot persist the entry.
    async fn insert(&self, entry: &DeadLetterEntry) -> Result<()>;

    /// Fetch an entry by id, `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn get(&self, id: &DeadLetterId) -> Result<Option<DeadLetterEntry>>;

    /// Entries matching `filter`, ordered by enqueue time and paginated.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn query(&self, filter: &DeadLetterFilter) -> Result<Vec<DeadLetterEntry>>;

    /// Number of entries matching `filter`, ignoring pagination.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn count(&self, filter: &DeadLetterFilter) -> Result<u64>;

    /// Claim an unreplayed entry for replay. Returns `false` if the entry does
    /// not exist, is already replayed, or holds a claim that has not expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be updated.
    async fn try_claim(&self, id: &DeadLetterId) -> Result<bool>;

    /// Mark a claimed entry replayed. Returns `false` if it was already replayed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be updated.
    async fn mark_replayed(&self, id: &DeadLetterId, at: DateTime<Utc>) -> Result<bool>;

    /// Give up a claim after a failed replay so the entry can be retried later.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be updated.
    async fn release_claim(&self, id: &DeadLetterId) -> Result<()>;

    /// Delete entries enqueued before `older_than`, optionally only those
    /// already replayed. Returns the number of entries deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be updated.
    async fn purge(&self, older_than: DateTime<Utc>, replayed_only: bool) -> Result<u64>;
}
