use crate::{AggregateId, AggregateType, OutboxEvent, OutboxStatus};

/// Builder for constructing outbox queries.
///
/// Used by operators to inspect dead letters and by tests to assert on what
/// a transition emitted. Results are ordered by `created_at`.
#[derive(Debug, Clone, Default)]
pub struct OutboxQuery {
    /// Filter by delivery status.
    pub status: Option<OutboxStatus>,

    /// Filter by aggregate ID.
    pub aggregate_id: Option<AggregateId>,

    /// Filter by aggregate type.
    pub aggregate_type: Option<AggregateType>,

    /// Filter by event type.
    pub event_type: Option<String>,

    /// Maximum number of events to return.
    pub limit: Option<usize>,
}

impl OutboxQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for a specific aggregate.
    pub fn for_aggregate(aggregate_id: AggregateId) -> Self {
        Self {
            aggregate_id: Some(aggregate_id),
            ..Default::default()
        }
    }

    /// Creates a query for dead letters.
    pub fn dead_letters() -> Self {
        Self {
            status: Some(OutboxStatus::Failed),
            ..Default::default()
        }
    }

    pub fn status(mut self, status: OutboxStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    pub fn aggregate_type(mut self, aggregate_type: AggregateType) -> Self {
        self.aggregate_type = Some(aggregate_type);
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Limits the number of events returned.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if `event` passes every filter. Ignores `limit`.
    pub fn matches(&self, event: &OutboxEvent) -> bool {
        self.status.is_none_or(|s| event.status == s)
            && self.aggregate_id.is_none_or(|id| event.aggregate_id == id)
            && self
                .aggregate_type
                .is_none_or(|t| event.aggregate_type == t)
            && self
                .event_type
                .as_deref()
                .is_none_or(|t| event.event_type == t)
    }
}
