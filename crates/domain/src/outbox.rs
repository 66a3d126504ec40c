//! Outbox writer.

use chrono::{DateTime, Utc};
use common::{ActorId, AggregateId, AggregateType, TriggerSource};
use serde::{Deserialize, Serialize};
use store::{EventId, OutboxEvent, StoreTransaction};

use crate::error::DomainError;

/// Payload schema version written by this crate.
pub const SCHEMA_VERSION: i32 = 1;

/// Payload of every transition event.
///
/// Carries enough for a consumer to act without reading the aggregate back:
/// ids, the status change, who made it and why, plus the aggregate's
/// denormalized fields under `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEventPayload {
    pub aggregate_id: AggregateId,
    pub aggregate_type: AggregateType,
    pub reference_number: Option<String>,
    pub from_status: String,
    pub to_status: String,
    pub transition_kind: String,
    pub actor_id: Option<ActorId>,
    pub trigger_source: TriggerSource,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Appends a PENDING outbox event to an open transaction.
///
/// Takes a transaction handle, so an event can only be written as part of
/// the unit that changes state.
pub(crate) async fn append(
    tx: &mut dyn StoreTransaction,
    event_type: &str,
    aggregate_type: AggregateType,
    aggregate_id: AggregateId,
    payload: serde_json::Value,
    schema_version: i32,
) -> Result<EventId, DomainError> {
    let event = OutboxEvent::new(event_type, aggregate_type, aggregate_id, payload)
        .with_schema_version(schema_version);
    tx.append_outbox_event(&event).await?;
    tracing::debug!(event_id = %event.id, event_type, %aggregate_id, "Outbox event appended");

    Ok(event.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::{InMemoryStore, OutboxQuery, OutboxStatus, OutboxStore, Store};

    #[tokio::test]
    async fn append_writes_pending_row_on_commit() {
        let store = InMemoryStore::new();
        let aggregate_id = AggregateId::new();

        let mut tx = store.begin().await.unwrap();
        let id = append(
            tx.as_mut(),
            "order.cancelled",
            AggregateType::Order,
            aggregate_id,
            serde_json::json!({"reason": "duplicate"}),
            SCHEMA_VERSION,
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let events = store
            .query_events(OutboxQuery::for_aggregate(aggregate_id))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, id);
        assert_eq!(events[0].status, OutboxStatus::Pending);
        assert_eq!(events[0].schema_version, 1);
    }

    #[test]
    fn payload_tolerates_missing_data() {
        let json = serde_json::json!({
            "aggregate_id": AggregateId::new(),
            "aggregate_type": "rfq",
            "reference_number": null,
            "from_status": "EVALUATION",
            "to_status": "AWARDED",
            "transition_kind": "award",
            "actor_id": null,
            "trigger_source": "system",
            "reason": null,
            "occurred_at": Utc::now(),
        });
        let payload: TransitionEventPayload = serde_json::from_value(json).unwrap();
        assert_eq!(payload.aggregate_type, AggregateType::Rfq);
        assert!(payload.data.is_null());
    }
}
