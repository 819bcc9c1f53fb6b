use std::{error::Error as StdError, fmt, future::Future, sync::Arc, time::Duration};

use ahash::AHashMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch_common::Message;

use crate::{
    entry::{DeadLetterEntry, DeadLetterReason, FailureDetail},
    error::{DlqError, Result},
    filter::DeadLetterFilter,
    store::DeadLetterStore,
    types::DeadLetterId,
};

/// Re-delivers a dead-lettered message.
///
/// Implemented for any `Fn(Message) -> impl Future<Output = anyhow::Result<()>>`.
#[async_trait]
pub trait ReplayHandler: Send + Sync {
    /// Deliver `message` again. An error leaves the entry unreplayed.
    async fn replay(&self, message: Message) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> ReplayHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn replay(&self, message: Message) -> anyhow::Result<()> {
        self(message).await
    }
}

/// Replay claim on one entry.
///
/// Dropped while still held (the replay future was cancelled or timed out
/// mid-handler), it releases the claim on a background task.
struct Claim {
    store: Arc<dyn DeadLetterStore>,
    id: DeadLetterId,
    held: bool,
}

impl Claim {
    async fn acquire(store: &Arc<dyn DeadLetterStore>, id: DeadLetterId) -> Result<Option<Self>> {
        let claimed = store.try_claim(&id).await?;
        Ok(claimed.then(|| Self {
            store: Arc::clone(store),
            id,
            held: true,
        }))
    }

    /// The store cleared the claim itself.
    fn settle(mut self) {
        self.held = false;
    }

    async fn release(mut self) -> Result<()> {
        self.held = false;
        self.store.release_claim(&self.id).await
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if !self.held {
            return;
        }

        let id = self.id;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(entry_id = %id, "Replay abandoned outside a runtime, claim left to expire");
            return;
        };

        tracing::debug!(entry_id = %id, "Replay abandoned, releasing claim");
        let store = Arc::clone(&self.store);
        runtime.spawn(async move {
            if let Err(e) = store.release_claim(&id).await {
                tracing::warn!(entry_id = %id, error = %e, "Failed to release abandoned replay claim");
            }
        });
    }
}

/// Dead-letter queue over a [`DeadLetterStore`].
///
/// Enqueue snapshots the failed message together with its failure detail.
/// Replay hands each matching entry to the configured [`ReplayHandler`] and
/// marks it replayed once the handler succeeds. Each entry is claimed before
/// its handler runs, so concurrent replays never deliver the same entry twice
/// while the claim lease holds. A replay that is dropped mid-handler gives its
/// claim back.
/// A batch is not atomic: entries replayed before a failure stay replayed.
#[derive(Clone)]
pub struct DeadLetterQueue {
    store: Arc<dyn DeadLetterStore>,
    replay_handler: Option<Arc<dyn ReplayHandler>>,
    retention: Option<Duration>,
    purge_interval: Option<Duration>,
}

impl fmt::Debug for DeadLetterQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadLetterQueue")
            .field("store", &self.store)
            .field("replay_handler", &self.replay_handler.is_some())
            .field("retention", &self.retention)
            .field("purge_interval", &self.purge_interval)
            .finish()
    }
}

impl DeadLetterQueue {
    pub fn new(store: Arc<dyn DeadLetterStore>) -> Self {
        Self {
            store,
            replay_handler: None,
            retention: None,
            purge_interval: None,
        }
    }

    #[must_use]
    pub fn with_replay_handler(mut self, handler: impl ReplayHandler + 'static) -> Self {
        self.replay_handler = Some(Arc::new(handler));
        self
    }

    /// Enable the scheduled purge: every `interval`, entries older than
    /// `retention` are deleted.
    #[must_use]
    pub const fn with_retention(mut self, retention: Duration, interval: Duration) -> Self {
        self.retention = Some(retention);
        self.purge_interval = Some(interval);
        self
    }

    #[must_use]
    pub const fn retention(&self) -> Option<Duration> {
        self.retention
    }

    #[must_use]
    pub const fn purge_interval(&self) -> Option<Duration> {
        self.purge_interval
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn DeadLetterStore> {
        &self.store
    }

    /// Archive a message that could not be delivered.
    ///
    /// # Errors
    ///
    /// The in-memory store never fails. Durable stores return a storage or
    /// timeout error naming the entry id when the write does not complete.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(message_type = %message.message_type, %reason)
    )]
    pub async fn enqueue(
        &self,
        message: &Message,
        reason: DeadLetterReason,
        error: Option<&(dyn StdError + Send + Sync + '_)>,
        metadata: Option<AHashMap<String, String>>,
    ) -> Result<DeadLetterId> {
        let entry = DeadLetterEntry::new(
            message,
            reason,
            error.map(|error| FailureDetail::capture(error)),
            metadata.unwrap_or_default(),
        );

        self.store.insert(&entry).await?;

        tracing::warn!(
            entry_id = %entry.id,
            message_type = %entry.message_type,
            %reason,
            attempts = entry.attempts,
            error = entry.error_message().unwrap_or_default(),
            "Message dead-lettered"
        );

        Ok(entry.id)
    }

    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get(&self, id: &DeadLetterId) -> Result<Option<DeadLetterEntry>> {
        self.store.get(id).await
    }

    /// Matching entries in enqueue order, paginated by the filter.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn entries(&self, filter: &DeadLetterFilter) -> Result<Vec<DeadLetterEntry>> {
        self.store.query(filter).await
    }

    /// Number of matching entries. Pagination is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn count(&self, filter: &DeadLetterFilter) -> Result<u64> {
        self.store.count(filter).await
    }

    /// Entry counts per reason, covering every reason (zero counts included).
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn count_by_reason(&self) -> Result<Vec<(DeadLetterReason, u64)>> {
        let mut counts = Vec::with_capacity(DeadLetterReason::ALL.len());
        for reason in DeadLetterReason::ALL {
            let count = self.store.count(&DeadLetterFilter::by_reason(reason)).await?;
            counts.push((reason, count));
        }
        Ok(counts)
    }

    /// Replay every unreplayed entry matching `filter`. A filter selecting
    /// only replayed entries replays nothing.
    ///
    /// Returns the number of entries this call replayed. Entries whose handler
    /// fails are released for a later attempt; entries claimed by a concurrent
    /// replay are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`DlqError::NoReplayHandler`] if no handler is configured, or a
    /// store error. Entries replayed before a store error stay replayed.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn replay_batch(&self, filter: &DeadLetterFilter) -> Result<u64> {
        let handler = self
            .replay_handler
            .as_ref()
            .ok_or(DlqError::NoReplayHandler)?;

        if filter.replayed == Some(true) {
            tracing::debug!("Filter selects only replayed entries, nothing to replay");
            return Ok(0);
        }
        let filter = DeadLetterFilter {
            replayed: Some(false),
            ..filter.clone()
        };

        let mut replayed = 0;
        for entry in self.store.query(&filter).await? {
            if self.replay_entry(handler.as_ref(), &entry).await? {
                replayed += 1;
            }
        }

        tracing::info!(replayed, "Dead-letter replay batch complete");
        Ok(replayed)
    }

    /// Replay a single entry. Returns `false` if it does not exist, was already
    /// replayed, is being replayed elsewhere, or the handler failed.
    ///
    /// # Errors
    ///
    /// Returns [`DlqError::NoReplayHandler`] if no handler is configured, or a
    /// store error.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn replay(&self, id: &DeadLetterId) -> Result<bool> {
        let handler = self
            .replay_handler
            .as_ref()
            .ok_or(DlqError::NoReplayHandler)?;

        match self.store.get(id).await? {
            Some(entry) if !entry.replayed => self.replay_entry(handler.as_ref(), &entry).await,
            _ => Ok(false),
        }
    }

    async fn replay_entry(
        &self,
        handler: &dyn ReplayHandler,
        entry: &DeadLetterEntry,
    ) -> Result<bool> {
        let Some(claim) = Claim::acquire(&self.store, entry.id).await? else {
            tracing::debug!(entry_id = %entry.id, "Entry claimed elsewhere, skipping");
            return Ok(false);
        };

        match handler.replay(entry.to_message()).await {
            Ok(()) => {
                let marked = self.store.mark_replayed(&entry.id, Utc::now()).await?;
                claim.settle();
                if marked {
                    tracing::info!(
                        entry_id = %entry.id,
                        message_type = %entry.message_type,
                        reason = %entry.reason,
                        "Dead-letter entry replayed"
                    );
                }
                Ok(marked)
            }
            Err(e) => {
                tracing::warn!(
                    entry_id = %entry.id,
                    message_type = %entry.message_type,
                    error = %e,
                    "Dead-letter replay failed, entry left for a later attempt"
                );
                claim.release().await?;
                Ok(false)
            }
        }
    }

    /// Delete entries enqueued before `older_than`. `reason` is recorded in the
    /// log for audit.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be updated.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn purge(
        &self,
        older_than: DateTime<Utc>,
        replayed_only: bool,
        reason: &str,
    ) -> Result<u64> {
        let purged = self.store.purge(older_than, replayed_only).await?;
        tracing::info!(
            purged,
            %older_than,
            replayed_only,
            reason,
            "Purged dead-letter entries"
        );
        Ok(purged)
    }

    /// Delete entries older than the configured retention. Returns zero when no
    /// retention is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be updated.
    pub async fn purge_expired(&self) -> Result<u64> {
        let Some(retention) = self.retention else {
            return Ok(0);
        };

        let cutoff = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        self.purge(cutoff, false, "retention expired").await
    }
}
