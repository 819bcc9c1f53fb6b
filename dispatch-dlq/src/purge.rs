use dispatch_common::Signal;
use tokio::sync::broadcast;

use crate::queue::DeadLetterQueue;

impl DeadLetterQueue {
    /// Run the scheduled retention purge until shutdown.
    ///
    /// Purges every purge interval, starting one interval after the call. Purge
    /// failures are logged and retried on the next tick. Without a configured
    /// retention this only waits for shutdown.
    pub async fn serve_purge(&self, mut shutdown: broadcast::Receiver<Signal>) {
        let Some(interval) = self.purge_interval() else {
            tracing::debug!("No dead-letter retention configured, purge disabled");
            let _ = shutdown.recv().await;
            return;
        };

        tracing::info!(interval_secs = interval.as_secs(), "Dead-letter purge starting");

        let mut timer = tokio::time::interval(interval);
        // Skip the first tick to avoid immediate execution
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if let Err(e) = self.purge_expired().await {
                        tracing::error!(error = %e, "Scheduled dead-letter purge failed");
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown) => {
                            tracing::info!("Dead-letter purge received shutdown signal");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Dead-letter purge shutdown channel error");
                        }
                    }
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use chrono::Utc;
    use dispatch_common::Message;

    use super::*;
    use crate::{
        backends::MemoryDeadLetterStore, entry::DeadLetterReason, filter::DeadLetterFilter,
    };

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn test_serve_purge_stops_on_shutdown() {
        let queue = DeadLetterQueue::new(Arc::new(MemoryDeadLetterStore::new()))
            .with_retention(Duration::from_secs(3600), Duration::from_secs(3600));
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move { queue.serve_purge(rx).await });
        tx.send(Signal::Shutdown).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("Purge loop did not stop")
            .unwrap();
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn test_serve_purge_removes_expired_entries() {
        let store = Arc::new(MemoryDeadLetterStore::new());
        let queue = DeadLetterQueue::new(store.clone())
            .with_retention(Duration::from_secs(60), Duration::from_millis(20));

        let mut expired = crate::entry::DeadLetterEntry::new(
            &Message::new("ping", b"x".to_vec()),
            DeadLetterReason::MessageExpired,
            None,
            ahash::AHashMap::new(),
        );
        expired.enqueued_at = Utc::now() - chrono::Duration::hours(2);
        crate::store::DeadLetterStore::insert(store.as_ref(), &expired)
            .await
            .unwrap();
        queue
            .enqueue(&Message::new("pong", b"y".to_vec()), DeadLetterReason::Unknown, None, None)
            .await
            .unwrap();

        let (tx, rx) = broadcast::channel(1);
        let purger = queue.clone();
        let handle = tokio::spawn(async move { purger.serve_purge(rx).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(Signal::Shutdown).unwrap();
        handle.await.unwrap();

        assert_eq!(queue.count(&DeadLetterFilter::all()).await.unwrap(), 1);
        assert!(queue.get(&expired.id).await.unwrap().is_none());
    }
}
