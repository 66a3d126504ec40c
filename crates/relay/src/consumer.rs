//! Idempotent event consumption.

use std::sync::Arc;

use async_trait::async_trait;
use store::{OutboxEvent, ProcessedEvent, ProcessedEventStore};
use tracing::debug;

use crate::error::Result;
use crate::sink::{DeliveryError, EventSink};

/// A downstream reaction to outbox events.
///
/// The name keys the processed-event ledger, so it must be stable across
/// releases.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Returns the name of this handler.
    fn name(&self) -> &'static str;

    /// Returns true if this handler consumes `event_type`.
    fn handles(&self, event_type: &str) -> bool;

    /// Applies the handler's effects for one event.
    async fn handle(&self, event: &OutboxEvent) -> Result<()>;
}

/// Runs handlers at most once per `(event_id, handler_name)` while the
/// marker lives.
pub struct IdempotentConsumer<P: ProcessedEventStore> {
    processed: Arc<P>,
    ttl: chrono::Duration,
}

impl<P: ProcessedEventStore> IdempotentConsumer<P> {
    pub fn new(processed: Arc<P>, ttl: chrono::Duration) -> Self {
        Self { processed, ttl }
    }

    /// Runs `handler` on `event` unless it already did.
    ///
    /// Returns false when the event was skipped as a replay. The marker is
    /// written only after the handler succeeds, so a failed run is retried
    /// in full.
    #[tracing::instrument(skip(self, handler, event), fields(handler = handler.name(), event_id = %event.id))]
    pub async fn consume(&self, handler: &dyn EventHandler, event: &OutboxEvent) -> Result<bool> {
        if self.processed.has_processed(event.id, handler.name()).await? {
            metrics::counter!("consumer_events_skipped_total", "handler" => handler.name())
                .increment(1);
            debug!("Event already processed, skipping");
            return Ok(false);
        }

        handler.handle(event).await?;

        let marker = ProcessedEvent::new(event.id, handler.name(), self.ttl);
        if !self.processed.record_processed(&marker).await? {
            debug!("Marker already recorded by a concurrent consumer");
        }
        Ok(true)
    }
}

/// A sink that fans each event out to every handler that consumes its type,
/// through an idempotent consumer.
///
/// One failing handler fails the delivery. On the relay's retry, handlers
/// that already succeeded are skipped.
pub struct HandlerDispatcher<P: ProcessedEventStore> {
    consumer: IdempotentConsumer<P>,
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl<P: ProcessedEventStore> HandlerDispatcher<P> {
    pub fn new(consumer: IdempotentConsumer<P>) -> Self {
        Self {
            consumer,
            handlers: Vec::new(),
        }
    }

    /// Registers a handler with this dispatcher.
    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.register(handler);
        self
    }

    /// Returns the number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait]
impl<P: ProcessedEventStore> EventSink for HandlerDispatcher<P> {
    async fn deliver(&self, event: &OutboxEvent) -> std::result::Result<(), DeliveryError> {
        for handler in self.handlers.iter().filter(|h| h.handles(&event.event_type)) {
            self.consumer
                .consume(handler.as_ref(), event)
                .await
                .map_err(|e| DeliveryError::new(format!("{}: {e}", handler.name())))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use common::{AggregateId, AggregateType};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use store::InMemoryStore;

    /// Counts calls and fails the first `failures` of them.
    struct CountingHandler {
        name: &'static str,
        event_type: &'static str,
        calls: AtomicUsize,
        failures: usize,
    }

    impl CountingHandler {
        fn new(name: &'static str, event_type: &'static str, failures: usize) -> Arc<Self> {
            Arc::new(Self {
                name,
                event_type,
                calls: AtomicUsize::new(0),
                failures,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        fn name(&self) -> &'static str {
            self.name
        }

        fn handles(&self, event_type: &str) -> bool {
            event_type == self.event_type
        }

        async fn handle(&self, _event: &OutboxEvent) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(RelayError::Handler {
                    handler: self.name,
                    reason: "downstream unavailable".into(),
                });
            }
            Ok(())
        }
    }

    fn event(event_type: &str) -> OutboxEvent {
        OutboxEvent::new(
            event_type,
            AggregateType::Order,
            AggregateId::new(),
            serde_json::json!({}),
        )
    }

    fn consumer() -> IdempotentConsumer<InMemoryStore> {
        IdempotentConsumer::new(Arc::new(InMemoryStore::new()), chrono::Duration::hours(1))
    }

    #[tokio::test]
    async fn replay_is_a_no_op() {
        let consumer = consumer();
        let handler = CountingHandler::new("notify_buyer", "order.confirmed", 0);
        let confirmed = event("order.confirmed");

        assert!(consumer.consume(handler.as_ref(), &confirmed).await.unwrap());
        assert!(!consumer.consume(handler.as_ref(), &confirmed).await.unwrap());
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn handlers_are_tracked_independently() {
        let consumer = consumer();
        let first = CountingHandler::new("notify_buyer", "order.confirmed", 0);
        let second = CountingHandler::new("update_ledger", "order.confirmed", 0);
        let confirmed = event("order.confirmed");

        assert!(consumer.consume(first.as_ref(), &confirmed).await.unwrap());
        assert!(consumer.consume(second.as_ref(), &confirmed).await.unwrap());
    }

    #[tokio::test]
    async fn failed_handler_is_not_marked() {
        let consumer = consumer();
        let handler = CountingHandler::new("notify_buyer", "order.confirmed", 1);
        let confirmed = event("order.confirmed");

        assert!(consumer.consume(handler.as_ref(), &confirmed).await.is_err());
        assert!(consumer.consume(handler.as_ref(), &confirmed).await.unwrap());
        assert_eq!(handler.calls(), 2);
    }

    #[tokio::test]
    async fn dispatcher_routes_by_event_type() {
        let confirmed_handler = CountingHandler::new("on_confirmed", "order.confirmed", 0);
        let cancelled_handler = CountingHandler::new("on_cancelled", "order.cancelled", 0);
        let dispatcher = HandlerDispatcher::new(consumer())
            .with_handler(confirmed_handler.clone())
            .with_handler(cancelled_handler.clone());
        assert_eq!(dispatcher.handler_count(), 2);

        dispatcher.deliver(&event("order.confirmed")).await.unwrap();
        dispatcher.deliver(&event("order.shipped")).await.unwrap();

        assert_eq!(confirmed_handler.calls(), 1);
        assert_eq!(cancelled_handler.calls(), 0);
    }

    #[tokio::test]
    async fn dispatcher_retry_skips_handlers_that_succeeded() {
        let steady = CountingHandler::new("steady", "order.confirmed", 0);
        let flaky = CountingHandler::new("flaky", "order.confirmed", 1);
        let dispatcher = HandlerDispatcher::new(consumer())
            .with_handler(steady.clone())
            .with_handler(flaky.clone());
        let confirmed = event("order.confirmed");

        let err = dispatcher.deliver(&confirmed).await.unwrap_err();
        assert!(err.message.starts_with("flaky: "), "{err}");

        dispatcher.deliver(&confirmed).await.unwrap();
        assert_eq!(steady.calls(), 1);
        assert_eq!(flaky.calls(), 2);
    }
}
