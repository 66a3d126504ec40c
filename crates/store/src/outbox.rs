use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AggregateId, AggregateType};

/// Default number of delivery attempts before an event is dead-lettered.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Unique identifier for an outbox event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<EventId> for Uuid {
    fn from(id: EventId) -> Self {
        id.0
    }
}

/// Delivery status of an outbox event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    /// Waiting to be claimed by a relay worker.
    Pending,
    /// Claimed by a relay worker; the lease is in `claimed_at`.
    Processing,
    /// Delivered.
    Completed,
    /// Retries exhausted. Dead letter.
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Processing => "PROCESSING",
            OutboxStatus::Completed => "COMPLETED",
            OutboxStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OutboxStatus::Pending),
            "PROCESSING" => Ok(OutboxStatus::Processing),
            "COMPLETED" => Ok(OutboxStatus::Completed),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(format!("unknown outbox status: {other}")),
        }
    }
}

/// A domain event waiting for (or past) delivery.
///
/// Rows are written by the engine in the same unit as the state change that
/// caused them; every field after `created_at` belongs to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: EventId,

    /// Dotted event name, e.g. `order.cancelled`.
    pub event_type: String,

    pub aggregate_type: AggregateType,
    pub aggregate_id: AggregateId,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    pub schema_version: i32,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,

    /// Worker holding the current claim.
    pub claimed_by: Option<String>,

    /// When the current claim was taken. Claims older than the relay lease
    /// can be taken over by another worker.
    pub claimed_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    /// Creates a new PENDING event.
    pub fn new(
        event_type: impl Into<String>,
        aggregate_type: AggregateType,
        aggregate_id: AggregateId,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: EventId::new(),
            event_type: event_type.into(),
            aggregate_type,
            aggregate_id,
            payload,
            status: OutboxStatus::Pending,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            last_error: None,
            schema_version: 1,
            created_at: Utc::now(),
            processed_at: None,
            claimed_by: None,
            claimed_at: None,
        }
    }

    /// Sets the payload schema version.
    pub fn with_schema_version(mut self, schema_version: i32) -> Self {
        self.schema_version = schema_version;
        self
    }

    /// Sets the retry budget.
    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Returns true if the event can be claimed at `now` given `lease`.
    pub fn is_claimable(&self, now: DateTime<Utc>, lease: chrono::Duration) -> bool {
        match self.status {
            OutboxStatus::Pending => true,
            OutboxStatus::Processing => self.claimed_at.is_none_or(|at| at + lease < now),
            OutboxStatus::Completed | OutboxStatus::Failed => false,
        }
    }

    /// Takes a claim on the event for `worker_id`.
    pub fn claim(&mut self, worker_id: &str, now: DateTime<Utc>) {
        self.status = OutboxStatus::Processing;
        self.claimed_by = Some(worker_id.to_string());
        self.claimed_at = Some(now);
    }

    /// Marks the event delivered.
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = OutboxStatus::Completed;
        self.processed_at = Some(now);
        self.last_error = None;
        self.release();
    }

    /// Records a failed delivery attempt and returns the resulting status:
    /// PENDING while retries remain, FAILED once they are exhausted.
    pub fn record_failure(&mut self, error: impl Into<String>) -> OutboxStatus {
        self.retry_count += 1;
        self.last_error = Some(error.into());
        self.status = if self.retry_count >= self.max_retries {
            OutboxStatus::Failed
        } else {
            OutboxStatus::Pending
        };
        self.release();
        self.status
    }

    /// Returns a dead letter to PENDING with a fresh retry budget.
    pub fn requeue(&mut self) {
        self.status = OutboxStatus::Pending;
        self.retry_count = 0;
        self.release();
    }

    fn release(&mut self) {
        self.claimed_by = None;
        self.claimed_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> OutboxEvent {
        OutboxEvent::new(
            "order.cancelled",
            AggregateType::Order,
            AggregateId::new(),
            serde_json::json!({}),
        )
    }

    #[test]
    fn new_event_is_pending_with_default_budget() {
        let event = event();
        assert_eq!(event.status, OutboxStatus::Pending);
        assert_eq!(event.retry_count, 0);
        assert_eq!(event.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(event.schema_version, 1);
    }

    #[test]
    fn third_failure_dead_letters() {
        let mut event = event();
        assert_eq!(event.record_failure("boom"), OutboxStatus::Pending);
        assert_eq!(event.record_failure("boom"), OutboxStatus::Pending);
        assert_eq!(event.record_failure("boom"), OutboxStatus::Failed);
        assert_eq!(event.retry_count, 3);
        assert_eq!(event.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn expired_lease_is_claimable_again() {
        let now = Utc::now();
        let lease = chrono::Duration::seconds(30);
        let mut event = event();
        assert!(event.is_claimable(now, lease));

        event.claim("worker-1", now);
        assert!(!event.is_claimable(now + chrono::Duration::seconds(10), lease));
        assert!(event.is_claimable(now + chrono::Duration::seconds(31), lease));

        event.complete(now);
        assert!(!event.is_claimable(now + chrono::Duration::hours(1), lease));
        assert!(event.claimed_by.is_none());
    }

    #[test]
    fn requeue_resets_budget() {
        let mut event = event().with_max_retries(1);
        assert_eq!(event.record_failure("boom"), OutboxStatus::Failed);
        event.requeue();
        assert_eq!(event.status, OutboxStatus::Pending);
        assert_eq!(event.retry_count, 0);
    }

    #[test]
    fn status_parses_wire_names() {
        assert_eq!("FAILED".parse::<OutboxStatus>(), Ok(OutboxStatus::Failed));
        assert_eq!(OutboxStatus::Processing.to_string(), "PROCESSING");
        assert!("failed".parse::<OutboxStatus>().is_err());
    }
}
