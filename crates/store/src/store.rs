use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    AggregateId, AggregateRecord, AggregateType, EventId, OutboxEvent, OutboxQuery, OutboxStatus,
    PartyId, ProcessedEvent, Result, TransitionRecord,
};

/// Entry point to the aggregate store.
///
/// Reads outside a transaction see committed data only. All writes go
/// through a [`StoreTransaction`] obtained from [`Store::begin`].
#[async_trait]
pub trait Store: Send + Sync {
    /// Opens an atomic unit of work.
    ///
    /// Dropping the returned transaction without calling
    /// [`StoreTransaction::commit`] discards every write made through it.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;

    /// Retrieves an aggregate by id.
    async fn get_aggregate(&self, id: AggregateId) -> Result<Option<AggregateRecord>>;

    /// Retrieves the aggregates of `aggregate_type` whose parent is
    /// `parent_id`, oldest first.
    async fn children(
        &self,
        aggregate_type: AggregateType,
        parent_id: AggregateId,
    ) -> Result<Vec<AggregateRecord>>;

    /// Retrieves the transition history of an aggregate in commit order.
    async fn transitions_for(&self, id: AggregateId) -> Result<Vec<TransitionRecord>>;
}

/// An open atomic unit of work.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Reads an aggregate and holds an exclusive lock on it until the
    /// transaction ends. Fails with `LockUnavailable` if the lock cannot be
    /// taken within the store's lock timeout.
    async fn lock_aggregate(&mut self, id: AggregateId) -> Result<Option<AggregateRecord>>;

    /// Reads an aggregate without locking it.
    async fn get_aggregate(&mut self, id: AggregateId) -> Result<Option<AggregateRecord>>;

    /// Reads the children of `parent_id` of one type, oldest first.
    async fn children(
        &mut self,
        aggregate_type: AggregateType,
        parent_id: AggregateId,
    ) -> Result<Vec<AggregateRecord>>;

    /// Counts aggregates of a type owned by `owner_id` whose status is one of
    /// `statuses`, across all parents.
    async fn count_owned(
        &mut self,
        aggregate_type: AggregateType,
        owner_id: PartyId,
        statuses: &[&str],
    ) -> Result<i64>;

    /// Serialises this transaction with every other one that locks the same
    /// `(aggregate_type, owner_id)` pair, until it ends. Take it before
    /// [`count_owned`](Self::count_owned) when the count gates a write.
    async fn lock_owner(&mut self, aggregate_type: AggregateType, owner_id: PartyId) -> Result<()>;

    /// Inserts a new aggregate. Fails with `DuplicateAggregate` if the id is
    /// taken.
    async fn insert_aggregate(&mut self, record: &AggregateRecord) -> Result<()>;

    /// Overwrites an aggregate if its stored version is `expected_version`.
    ///
    /// Returns the new version. Fails with `VersionConflict` when the stored
    /// version differs and `AggregateNotFound` when the row is missing.
    async fn update_aggregate(
        &mut self,
        record: &AggregateRecord,
        expected_version: i64,
    ) -> Result<i64>;

    /// Appends an audit record and returns its assigned sequence.
    async fn append_transition(&mut self, record: &TransitionRecord) -> Result<i64>;

    /// Appends an outbox event. Only the engine writes here.
    async fn append_outbox_event(&mut self, event: &OutboxEvent) -> Result<()>;

    /// Allocates the next value of the `(scope, year)` counter.
    async fn next_sequence(&mut self, scope: &str, year: i32) -> Result<i64>;

    /// Makes every write in this transaction visible.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discards every write in this transaction.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Relay-facing view of the outbox.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Atomically claims up to `limit` events for `worker_id`, oldest first.
    ///
    /// PENDING events are claimable, as are PROCESSING events whose claim is
    /// older than `lease`. No event is returned to two concurrent callers.
    async fn claim_batch(
        &self,
        worker_id: &str,
        limit: usize,
        lease: chrono::Duration,
    ) -> Result<Vec<OutboxEvent>>;

    /// Marks an event `worker_id` holds in PROCESSING as delivered.
    ///
    /// Fails with `ClaimLost` when another worker has taken the event over
    /// and with `OutboxStateConflict` when it is no longer PROCESSING.
    async fn mark_completed(&self, id: EventId, worker_id: &str) -> Result<()>;

    /// Records a failed delivery attempt by `worker_id` and returns the
    /// resulting status (PENDING to retry, FAILED when the retry budget is
    /// exhausted). Fails like [`mark_completed`](Self::mark_completed) when
    /// the worker no longer holds the claim.
    async fn mark_failed(&self, id: EventId, worker_id: &str, error: &str) -> Result<OutboxStatus>;

    /// Retrieves a single event.
    async fn get_event(&self, id: EventId) -> Result<Option<OutboxEvent>>;

    /// Retrieves events matching a query, oldest first.
    async fn query_events(&self, query: OutboxQuery) -> Result<Vec<OutboxEvent>>;

    /// Returns a FAILED event to PENDING with a reset retry count.
    async fn requeue_failed(&self, id: EventId) -> Result<()>;
}

/// Ledger backing idempotent consumers.
#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    /// Returns true if `handler_name` already processed `event_id`.
    async fn has_processed(&self, event_id: EventId, handler_name: &str) -> Result<bool>;

    /// Records a marker. Returns false if one already existed.
    async fn record_processed(&self, marker: &ProcessedEvent) -> Result<bool>;

    /// Deletes markers that expired at or before `now`; returns how many.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}
