//! Outbox relay worker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use store::{OutboxEvent, OutboxStatus, OutboxStore, StoreError};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::sink::EventSink;

/// What one relay batch did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub claimed: usize,
    pub delivered: usize,
    /// Failed deliveries returned to PENDING.
    pub retried: usize,
    /// Failed deliveries that exhausted their retries.
    pub dead_lettered: usize,
    /// Events another worker took over before this one settled them.
    pub lost: usize,
}

/// Claims pending outbox events and hands them to a sink.
///
/// Several relays may share one outbox: claims are atomic, so no event is
/// delivered by two workers at once. A claim older than the lease can be
/// taken over, which recovers events held by a worker that died mid-batch.
pub struct OutboxRelay<O: OutboxStore> {
    outbox: Arc<O>,
    sink: Arc<dyn EventSink>,
    worker_id: String,
    batch_size: usize,
    lease: chrono::Duration,
    poll_interval: Duration,
}

impl<O: OutboxStore> OutboxRelay<O> {
    /// Creates a relay with the default batch size, lease and poll interval.
    pub fn new(outbox: Arc<O>, sink: Arc<dyn EventSink>, worker_id: impl Into<String>) -> Self {
        Self::from_config(outbox, sink, worker_id, &RelayConfig::default())
    }

    pub fn from_config(
        outbox: Arc<O>,
        sink: Arc<dyn EventSink>,
        worker_id: impl Into<String>,
        config: &RelayConfig,
    ) -> Self {
        Self {
            outbox,
            sink,
            worker_id: worker_id.into(),
            batch_size: config.batch_size,
            lease: config.lease(),
            poll_interval: config.poll_interval,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_lease(mut self, lease: chrono::Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Claims one batch and delivers it.
    ///
    /// Delivery failures are recorded on the events and counted in the
    /// report. An event whose claim was lost is skipped; other store errors
    /// fail the call.
    #[tracing::instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn run_once(&self) -> Result<RelayReport> {
        let started = Instant::now();
        let batch = self
            .outbox
            .claim_batch(&self.worker_id, self.batch_size, self.lease)
            .await?;

        let mut report = RelayReport {
            claimed: batch.len(),
            ..RelayReport::default()
        };
        for event in &batch {
            match self.deliver(event, &mut report).await {
                Ok(()) => {}
                Err(RelayError::Store(
                    err @ (StoreError::ClaimLost { .. } | StoreError::OutboxStateConflict { .. }),
                )) => {
                    report.lost += 1;
                    metrics::counter!("outbox_claims_lost_total").increment(1);
                    warn!(event_id = %event.id, error = %err, "Claim lost before settling, skipped");
                }
                Err(err) => return Err(err),
            }
        }

        metrics::histogram!("outbox_relay_batch_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        if report.claimed > 0 {
            info!(
                claimed = report.claimed,
                delivered = report.delivered,
                retried = report.retried,
                dead_lettered = report.dead_lettered,
                lost = report.lost,
                "Relay batch complete"
            );
        }

        Ok(report)
    }

    async fn deliver(&self, event: &OutboxEvent, report: &mut RelayReport) -> Result<()> {
        let event_type = event.event_type.clone();
        match self.sink.deliver(event).await {
            Ok(()) => {
                self.outbox.mark_completed(event.id, &self.worker_id).await?;
                report.delivered += 1;
                metrics::counter!("outbox_events_delivered_total", "event_type" => event_type)
                    .increment(1);
            }
            Err(failure) => {
                metrics::counter!("outbox_delivery_failures_total", "event_type" => event_type.clone())
                    .increment(1);
                let status = self
                    .outbox
                    .mark_failed(event.id, &self.worker_id, &failure.message)
                    .await?;
                if status == OutboxStatus::Failed {
                    report.dead_lettered += 1;
                    metrics::counter!("outbox_dead_letters_total", "event_type" => event_type)
                        .increment(1);
                    error!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        error = %failure,
                        "Event dead-lettered"
                    );
                } else {
                    report.retried += 1;
                    warn!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        attempt = event.retry_count + 1,
                        error = %failure,
                        "Delivery failed, will retry"
                    );
                }
            }
        }
        Ok(())
    }

    /// Runs batches until `shutdown` flips to true or its sender is dropped.
    ///
    /// A full batch is followed immediately by the next one; otherwise the
    /// worker waits for the poll interval.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.worker_id, "Relay worker started");
        while !*shutdown.borrow() {
            let drained = match self.run_once().await {
                Ok(report) => report.claimed < self.batch_size,
                Err(err) => {
                    error!(worker_id = %self.worker_id, error = %err, "Relay batch failed");
                    true
                }
            };
            if !drained {
                continue;
            }
            tokio::select! {
                () = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(worker_id = %self.worker_id, "Relay worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{DeliveryError, InMemorySink};
    use async_trait::async_trait;
    use common::{AggregateId, AggregateType};
    use store::{InMemoryStore, Store};
    use tokio::sync::Mutex;

    /// Lets a second worker take over the event being delivered, as if the
    /// first worker's lease ran out mid-delivery.
    struct TakenOverMidDelivery {
        store: Arc<InMemoryStore>,
        taken: Mutex<bool>,
    }

    #[async_trait]
    impl EventSink for TakenOverMidDelivery {
        async fn deliver(&self, _event: &OutboxEvent) -> std::result::Result<(), DeliveryError> {
            let mut taken = self.taken.lock().await;
            if !*taken {
                *taken = true;
                self.store
                    .claim_batch("w2", 1, chrono::Duration::seconds(-1))
                    .await
                    .map_err(RelayError::from)?;
            }
            Ok(())
        }
    }

    async fn seeded(count: usize) -> (Arc<InMemoryStore>, Vec<OutboxEvent>) {
        let store = Arc::new(InMemoryStore::new());
        let mut events = Vec::new();
        let mut tx = store.begin().await.unwrap();
        for i in 0..count {
            let event = OutboxEvent::new(
                if i % 2 == 0 { "delivery.dispatched" } else { "delivery.arrived" },
                AggregateType::Delivery,
                AggregateId::new(),
                serde_json::json!({ "n": i }),
            );
            tx.append_outbox_event(&event).await.unwrap();
            events.push(event);
        }
        tx.commit().await.unwrap();
        (store, events)
    }

    #[tokio::test]
    async fn delivers_and_completes_a_batch() {
        let (store, events) = seeded(3).await;
        let sink = InMemorySink::new();
        let relay = OutboxRelay::new(store.clone(), Arc::new(sink.clone()), "w1");

        let report = relay.run_once().await.unwrap();
        assert_eq!(report, RelayReport { claimed: 3, delivered: 3, ..Default::default() });

        let delivered: Vec<_> = sink.delivered().await.into_iter().map(|e| e.id).collect();
        assert_eq!(delivered, events.iter().map(|e| e.id).collect::<Vec<_>>());
        for event in &events {
            let stored = store.get_event(event.id).await.unwrap().unwrap();
            assert_eq!(stored.status, OutboxStatus::Completed);
            assert!(stored.processed_at.is_some());
        }

        assert_eq!(relay.run_once().await.unwrap(), RelayReport::default());
    }

    #[tokio::test]
    async fn batch_size_bounds_each_claim() {
        let (store, _) = seeded(5).await;
        let relay = OutboxRelay::new(store, Arc::new(InMemorySink::new()), "w1").with_batch_size(2);

        assert_eq!(relay.run_once().await.unwrap().claimed, 2);
        assert_eq!(relay.run_once().await.unwrap().claimed, 2);
        assert_eq!(relay.run_once().await.unwrap().claimed, 1);
    }

    #[tokio::test]
    async fn failures_retry_then_dead_letter() {
        let (store, events) = seeded(1).await;
        let sink = InMemorySink::new();
        sink.fail_next("delivery.dispatched", 3).await;
        let relay = OutboxRelay::new(store.clone(), Arc::new(sink.clone()), "w1");

        for _ in 0..2 {
            let report = relay.run_once().await.unwrap();
            assert_eq!(report.retried, 1);
            let stored = store.get_event(events[0].id).await.unwrap().unwrap();
            assert_eq!(stored.status, OutboxStatus::Pending);
        }

        let report = relay.run_once().await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        let stored = store.get_event(events[0].id).await.unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::Failed);
        assert_eq!(stored.retry_count, 3);
        assert_eq!(stored.last_error.as_deref(), Some("sink refused delivery.dispatched"));

        assert_eq!(relay.run_once().await.unwrap().claimed, 0);
        assert_eq!(sink.delivered_count().await, 0);
    }

    #[tokio::test]
    async fn lost_claim_is_skipped_and_the_batch_goes_on() {
        let (store, events) = seeded(2).await;
        let sink = TakenOverMidDelivery {
            store: store.clone(),
            taken: Mutex::new(false),
        };
        let relay = OutboxRelay::new(store.clone(), Arc::new(sink), "w1");

        let report = relay.run_once().await.unwrap();
        assert_eq!(report, RelayReport { claimed: 2, delivered: 1, lost: 1, ..Default::default() });

        let taken_over = store.get_event(events[0].id).await.unwrap().unwrap();
        assert_eq!(taken_over.status, OutboxStatus::Processing);
        assert_eq!(taken_over.claimed_by.as_deref(), Some("w2"));
        let delivered = store.get_event(events[1].id).await.unwrap().unwrap();
        assert_eq!(delivered.status, OutboxStatus::Completed);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (store, _) = seeded(2).await;
        let sink = InMemorySink::new();
        let relay = Arc::new(
            OutboxRelay::new(store, Arc::new(sink.clone()), "w1")
                .with_poll_interval(Duration::from_millis(10)),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move { relay.run(shutdown_rx).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sink.delivered_count().await, 2);
    }
}
