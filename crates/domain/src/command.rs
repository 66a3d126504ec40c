//! Transition requests and their outcomes.

use std::collections::HashMap;

use common::{ActorId, AggregateId, TriggerSource};
use store::EventId;

use crate::lifecycle::Lifecycle;

/// A request to apply one transition kind to one aggregate.
///
/// `K` is the aggregate's kind enum on the typed path and `String` on the
/// string-keyed path.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRequest<K> {
    pub aggregate_id: AggregateId,
    pub kind: K,
    pub actor_id: Option<ActorId>,
    pub trigger_source: TriggerSource,
    pub reason: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl<K> TransitionRequest<K> {
    /// A transition requested by a person.
    pub fn by_user(actor_id: ActorId, aggregate_id: AggregateId, kind: K) -> Self {
        Self {
            aggregate_id,
            kind,
            actor_id: Some(actor_id),
            trigger_source: TriggerSource::User,
            reason: None,
            metadata: HashMap::new(),
        }
    }

    /// A transition initiated by the platform.
    pub fn system(aggregate_id: AggregateId, kind: K) -> Self {
        Self {
            aggregate_id,
            kind,
            actor_id: None,
            trigger_source: TriggerSource::System,
            reason: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns the reason if it has non-whitespace content.
    pub fn non_empty_reason(&self) -> Option<&str> {
        self.reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }

    /// Replaces the kind, keeping everything else.
    pub fn with_kind<T>(self, kind: T) -> TransitionRequest<T> {
        TransitionRequest {
            aggregate_id: self.aggregate_id,
            kind,
            actor_id: self.actor_id,
            trigger_source: self.trigger_source,
            reason: self.reason,
            metadata: self.metadata,
        }
    }
}

/// What a committed transition did.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome<S> {
    pub aggregate_id: AggregateId,
    pub from: S,
    pub to: S,
    pub kind: &'static str,
    /// Store sequence of the audit record.
    pub sequence: i64,
    /// The outbox event written, if the kind emits one.
    pub event_id: Option<EventId>,
}

impl<S: Lifecycle> TransitionOutcome<S> {
    /// Converts the statuses to their wire names.
    pub fn named(self) -> TransitionOutcome<&'static str> {
        TransitionOutcome {
            aggregate_id: self.aggregate_id,
            from: self.from.as_str(),
            to: self.to.as_str(),
            kind: self.kind,
            sequence: self.sequence,
            event_id: self.event_id,
        }
    }
}
