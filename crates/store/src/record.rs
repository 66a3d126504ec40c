use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ActorId, AggregateId, AggregateType, PartyId, TriggerSource};

/// The persisted form of an aggregate.
///
/// The typed aggregate is serialized into `state`; `status`, `parent_id` and
/// `owner_id` are denormalized beside it so the store can lock, filter and
/// count without decoding the JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    /// The aggregate's unique identifier.
    pub id: AggregateId,

    /// The type of aggregate (e.g. `rfq`, `vendor_order`).
    pub aggregate_type: AggregateType,

    /// Current status in its wire form (e.g. `BIDDING_OPEN`).
    pub status: String,

    /// The aggregate this one belongs to, if any.
    pub parent_id: Option<AggregateId>,

    /// The trading party that owns the aggregate, if any.
    pub owner_id: Option<PartyId>,

    /// Human-readable reference number, for types that carry one.
    pub reference_number: Option<String>,

    /// Incremented on every write; used to detect lost updates.
    pub version: i64,

    /// The serialized aggregate.
    pub state: serde_json::Value,

    /// When the aggregate was created.
    pub created_at: DateTime<Utc>,

    /// When the aggregate was last written.
    pub updated_at: DateTime<Utc>,
}

impl AggregateRecord {
    /// Creates a first-version record from a serializable aggregate state.
    pub fn from_state<T: Serialize>(
        id: AggregateId,
        aggregate_type: AggregateType,
        status: impl Into<String>,
        state: &T,
    ) -> Result<Self, serde_json::Error> {
        let now = Utc::now();
        Ok(Self {
            id,
            aggregate_type,
            status: status.into(),
            parent_id: None,
            owner_id: None,
            reference_number: None,
            version: 1,
            state: serde_json::to_value(state)?,
            created_at: now,
            updated_at: now,
        })
    }

    /// Sets the parent aggregate.
    pub fn with_parent(mut self, parent_id: Option<AggregateId>) -> Self {
        self.parent_id = parent_id;
        self
    }

    /// Sets the owning party.
    pub fn with_owner(mut self, owner_id: Option<PartyId>) -> Self {
        self.owner_id = owner_id;
        self
    }

    /// Sets the reference number.
    pub fn with_reference_number(mut self, reference_number: Option<String>) -> Self {
        self.reference_number = reference_number;
        self
    }
}

/// One committed status change. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Unique identifier for this record.
    pub id: Uuid,

    /// Store-assigned position; strictly increasing in commit order.
    /// Zero until the record has been appended.
    pub sequence: i64,

    /// The aggregate that changed.
    pub aggregate_id: AggregateId,

    /// The type of the aggregate that changed.
    pub aggregate_type: AggregateType,

    /// Status before the change.
    pub from_status: String,

    /// Status after the change.
    pub to_status: String,

    /// The transition kind that was applied (e.g. `award`).
    pub transition_kind: String,

    /// The actor who requested the change; `None` for system triggers.
    pub triggered_by: Option<ActorId>,

    /// Whether a user or the platform initiated the change.
    pub trigger_source: TriggerSource,

    /// Free-text justification supplied with the request.
    pub reason: Option<String>,

    /// Open key/value context supplied with the request.
    pub metadata: HashMap<String, serde_json::Value>,

    /// When the change was committed.
    pub created_at: DateTime<Utc>,
}

impl TransitionRecord {
    /// Creates a new transition record builder.
    pub fn builder() -> TransitionRecordBuilder {
        TransitionRecordBuilder::default()
    }
}

/// Builder for constructing transition records.
#[derive(Debug, Default)]
pub struct TransitionRecordBuilder {
    aggregate_id: Option<AggregateId>,
    aggregate_type: Option<AggregateType>,
    from_status: Option<String>,
    to_status: Option<String>,
    transition_kind: Option<String>,
    triggered_by: Option<ActorId>,
    trigger_source: TriggerSource,
    reason: Option<String>,
    metadata: HashMap<String, serde_json::Value>,
    created_at: Option<DateTime<Utc>>,
}

impl TransitionRecordBuilder {
    pub fn aggregate(mut self, aggregate_type: AggregateType, id: AggregateId) -> Self {
        self.aggregate_type = Some(aggregate_type);
        self.aggregate_id = Some(id);
        self
    }

    pub fn from_status(mut self, status: impl Into<String>) -> Self {
        self.from_status = Some(status.into());
        self
    }

    pub fn to_status(mut self, status: impl Into<String>) -> Self {
        self.to_status = Some(status.into());
        self
    }

    pub fn transition_kind(mut self, kind: impl Into<String>) -> Self {
        self.transition_kind = Some(kind.into());
        self
    }

    pub fn triggered_by(mut self, actor: Option<ActorId>) -> Self {
        self.triggered_by = actor;
        self
    }

    pub fn trigger_source(mut self, source: TriggerSource) -> Self {
        self.trigger_source = source;
        self
    }

    pub fn reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    pub fn metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Builds the record, returning None if required fields are missing.
    pub fn try_build(self) -> Option<TransitionRecord> {
        Some(TransitionRecord {
            id: Uuid::new_v4(),
            sequence: 0,
            aggregate_id: self.aggregate_id?,
            aggregate_type: self.aggregate_type?,
            from_status: self.from_status?,
            to_status: self.to_status?,
            transition_kind: self.transition_kind?,
            triggered_by: self.triggered_by,
            trigger_source: self.trigger_source,
            reason: self.reason,
            metadata: self.metadata,
            created_at: self.created_at.unwrap_or_else(Utc::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_from_state_starts_at_version_one() {
        let id = AggregateId::new();
        let owner = PartyId::new();
        let record = AggregateRecord::from_state(
            id,
            AggregateType::Order,
            "PENDING_PAYMENT",
            &serde_json::json!({"status": "PENDING_PAYMENT"}),
        )
        .unwrap()
        .with_owner(Some(owner))
        .with_reference_number(Some("ORD-2026-000001".into()));

        assert_eq!(record.version, 1);
        assert_eq!(record.status, "PENDING_PAYMENT");
        assert_eq!(record.owner_id, Some(owner));
        assert!(record.parent_id.is_none());
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn transition_builder_requires_core_fields() {
        assert!(TransitionRecord::builder().try_build().is_none());

        let record = TransitionRecord::builder()
            .aggregate(AggregateType::Rfq, AggregateId::new())
            .from_status("DRAFT")
            .to_status("PUBLISHED")
            .transition_kind("publish")
            .trigger_source(TriggerSource::System)
            .try_build()
            .unwrap();

        assert_eq!(record.sequence, 0);
        assert_eq!(record.trigger_source, TriggerSource::System);
        assert!(record.triggered_by.is_none());
        assert!(record.metadata.is_empty());
    }
}
