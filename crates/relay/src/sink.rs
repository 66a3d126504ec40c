//! Delivery targets for relayed events.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use store::OutboxEvent;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::error::RelayError;

/// A failed delivery attempt. The message is stored on the outbox row as
/// `last_error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DeliveryError {
    pub message: String,
}

impl DeliveryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<RelayError> for DeliveryError {
    fn from(e: RelayError) -> Self {
        Self::new(e.to_string())
    }
}

/// Where the relay hands events.
///
/// Implementations report success or failure per event. A failure leaves the
/// event to the relay's retry policy.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: &OutboxEvent) -> Result<(), DeliveryError>;
}

/// Records delivered events in memory. Can be told to fail events of a
/// given type a number of times.
#[derive(Debug, Clone, Default)]
pub struct InMemorySink {
    delivered: Arc<RwLock<Vec<OutboxEvent>>>,
    failures: Arc<RwLock<HashMap<String, usize>>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `times` deliveries of `event_type`.
    pub async fn fail_next(&self, event_type: impl Into<String>, times: usize) {
        self.failures.write().await.insert(event_type.into(), times);
    }

    /// Returns every event delivered so far, in delivery order.
    pub async fn delivered(&self) -> Vec<OutboxEvent> {
        self.delivered.read().await.clone()
    }

    pub async fn delivered_count(&self) -> usize {
        self.delivered.read().await.len()
    }
}

#[async_trait]
impl EventSink for InMemorySink {
    async fn deliver(&self, event: &OutboxEvent) -> Result<(), DeliveryError> {
        {
            let mut failures = self.failures.write().await;
            if let Some(remaining) = failures.get_mut(&event.event_type) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(DeliveryError::new(format!(
                        "sink refused {}",
                        event.event_type
                    )));
                }
            }
        }
        self.delivered.write().await.push(event.clone());
        Ok(())
    }
}

/// Logs each event and accepts it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl EventSink for TracingSink {
    async fn deliver(&self, event: &OutboxEvent) -> Result<(), DeliveryError> {
        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            aggregate_type = %event.aggregate_type,
            aggregate_id = %event.aggregate_id,
            retry_count = event.retry_count,
            "Event delivered"
        );
        Ok(())
    }
}
