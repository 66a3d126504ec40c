//! Periodic purge of expired processed-event markers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use store::ProcessedEventStore;
use tokio::sync::watch;
use tracing::{error, info};

use crate::error::Result;

pub struct ProcessedEventPurger<P: ProcessedEventStore> {
    processed: Arc<P>,
    interval: Duration,
}

impl<P: ProcessedEventStore> ProcessedEventPurger<P> {
    pub fn new(processed: Arc<P>, interval: Duration) -> Self {
        Self { processed, interval }
    }

    /// Deletes markers that have expired by now. Returns how many.
    #[tracing::instrument(skip(self))]
    pub async fn purge_once(&self) -> Result<u64> {
        let purged = self.processed.purge_expired(Utc::now()).await?;
        metrics::counter!("processed_events_purged_total").increment(purged);
        if purged > 0 {
            info!(purged, "Expired processed-event markers purged");
        }
        Ok(purged)
    }

    /// Purges on every interval tick until `shutdown` flips to true or its
    /// sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.purge_once().await {
                        error!(error = %err, "Processed-event purge failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Processed-event purger stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::{EventId, InMemoryStore, ProcessedEvent};

    #[tokio::test]
    async fn expired_markers_go_live_ones_stay() {
        let store = Arc::new(InMemoryStore::new());
        let expired = ProcessedEvent::new(EventId::new(), "reject_losing_quotes", chrono::Duration::seconds(-1));
        let live = ProcessedEvent::new(EventId::new(), "reject_losing_quotes", chrono::Duration::hours(1));
        store.record_processed(&expired).await.unwrap();
        store.record_processed(&live).await.unwrap();

        let purger = ProcessedEventPurger::new(store.clone(), Duration::from_secs(60));
        assert_eq!(purger.purge_once().await.unwrap(), 1);
        assert_eq!(purger.purge_once().await.unwrap(), 0);

        assert!(!store.has_processed(expired.event_id, "reject_losing_quotes").await.unwrap());
        assert!(store.has_processed(live.event_id, "reject_losing_quotes").await.unwrap());
    }

    #[tokio::test]
    async fn run_purges_on_start_and_stops_on_shutdown() {
        let store = Arc::new(InMemoryStore::new());
        let expired = ProcessedEvent::new(EventId::new(), "h", chrono::Duration::seconds(-1));
        store.record_processed(&expired).await.unwrap();

        let purger = Arc::new(ProcessedEventPurger::new(store.clone(), Duration::from_secs(3600)));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = {
            let purger = Arc::clone(&purger);
            tokio::spawn(async move { purger.run(shutdown_rx).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!store.has_processed(expired.event_id, "h").await.unwrap());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }
}
