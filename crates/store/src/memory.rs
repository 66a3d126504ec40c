use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    AggregateId, AggregateRecord, AggregateType, EventId, OutboxEvent, OutboxQuery, OutboxStatus,
    PartyId, ProcessedEvent, Result, StoreError, TransitionRecord,
    store::{OutboxStore, ProcessedEventStore, Store, StoreTransaction},
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    aggregates: HashMap<AggregateId, AggregateRecord>,
    transitions: Vec<TransitionRecord>,
    outbox: Vec<OutboxEvent>,
    processed: HashMap<(EventId, String), ProcessedEvent>,
    sequences: HashMap<(String, i32), i64>,
    last_transition_sequence: i64,
}

impl MemoryState {
    fn children(&self, aggregate_type: AggregateType, parent_id: AggregateId) -> Vec<AggregateRecord> {
        let mut children: Vec<_> = self
            .aggregates
            .values()
            .filter(|r| r.aggregate_type == aggregate_type && r.parent_id == Some(parent_id))
            .cloned()
            .collect();
        children.sort_by_key(|r| (r.created_at, r.id));
        children
    }

    fn outbox_event_mut(&mut self, id: EventId) -> Result<&mut OutboxEvent> {
        self.outbox
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(StoreError::OutboxEventNotFound(id))
    }
}

/// In-memory store implementation for testing.
///
/// Every transaction holds one store-wide async mutex from `begin` until it
/// commits or is dropped, so transactions are fully serialized. Writes go to
/// a staged copy of the state that replaces the shared state on commit.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    lock_timeout: Option<Duration>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails `begin` with `LockUnavailable` when another transaction holds
    /// the store for longer than `timeout`.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Returns the number of aggregates stored.
    pub async fn aggregate_count(&self) -> usize {
        self.state.lock().await.aggregates.len()
    }

    /// Returns the total number of transition records stored.
    pub async fn transition_count(&self) -> usize {
        self.state.lock().await.transitions.len()
    }

    /// Returns the total number of outbox events stored.
    pub async fn outbox_count(&self) -> usize {
        self.state.lock().await.outbox.len()
    }

    /// Overwrites a stored aggregate, bypassing the state machine.
    ///
    /// Lets tests place an aggregate in a status without walking the table.
    pub async fn force_put(&self, record: AggregateRecord) {
        self.state.lock().await.aggregates.insert(record.id, record);
    }

    /// Clears all data.
    pub async fn clear(&self) {
        *self.state.lock().await = MemoryState::default();
    }

    async fn acquire(&self) -> Result<OwnedMutexGuard<MemoryState>> {
        match self.lock_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.state.clone().lock_owned())
                .await
                .map_err(|_| {
                    StoreError::LockUnavailable(format!(
                        "in-memory store busy for more than {timeout:?}"
                    ))
                }),
            None => Ok(self.state.clone().lock_owned().await),
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let guard = self.acquire().await?;
        let staged = guard.clone();
        Ok(Box::new(InMemoryTransaction { guard, staged }))
    }

    async fn get_aggregate(&self, id: AggregateId) -> Result<Option<AggregateRecord>> {
        Ok(self.state.lock().await.aggregates.get(&id).cloned())
    }

    async fn children(
        &self,
        aggregate_type: AggregateType,
        parent_id: AggregateId,
    ) -> Result<Vec<AggregateRecord>> {
        Ok(self.state.lock().await.children(aggregate_type, parent_id))
    }

    async fn transitions_for(&self, id: AggregateId) -> Result<Vec<TransitionRecord>> {
        let state = self.state.lock().await;
        // Stored in sequence order already.
        Ok(state
            .transitions
            .iter()
            .filter(|t| t.aggregate_id == id)
            .cloned()
            .collect())
    }
}

struct InMemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn lock_aggregate(&mut self, id: AggregateId) -> Result<Option<AggregateRecord>> {
        // The whole store is already held exclusively.
        Ok(self.staged.aggregates.get(&id).cloned())
    }

    async fn get_aggregate(&mut self, id: AggregateId) -> Result<Option<AggregateRecord>> {
        Ok(self.staged.aggregates.get(&id).cloned())
    }

    async fn children(
        &mut self,
        aggregate_type: AggregateType,
        parent_id: AggregateId,
    ) -> Result<Vec<AggregateRecord>> {
        Ok(self.staged.children(aggregate_type, parent_id))
    }

    async fn count_owned(
        &mut self,
        aggregate_type: AggregateType,
        owner_id: PartyId,
        statuses: &[&str],
    ) -> Result<i64> {
        let count = self
            .staged
            .aggregates
            .values()
            .filter(|r| {
                r.aggregate_type == aggregate_type
                    && r.owner_id == Some(owner_id)
                    && statuses.contains(&r.status.as_str())
            })
            .count();
        Ok(count as i64)
    }

    /// Already exclusive: the transaction holds the whole store.
    async fn lock_owner(&mut self, _aggregate_type: AggregateType, _owner_id: PartyId) -> Result<()> {
        Ok(())
    }

    async fn insert_aggregate(&mut self, record: &AggregateRecord) -> Result<()> {
        if self.staged.aggregates.contains_key(&record.id) {
            return Err(StoreError::DuplicateAggregate(record.id));
        }
        self.staged.aggregates.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_aggregate(
        &mut self,
        record: &AggregateRecord,
        expected_version: i64,
    ) -> Result<i64> {
        let stored = self
            .staged
            .aggregates
            .get_mut(&record.id)
            .ok_or(StoreError::AggregateNotFound(record.id))?;

        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                aggregate_id: record.id,
                expected: expected_version,
                actual: stored.version,
            });
        }

        let created_at = stored.created_at;
        *stored = record.clone();
        stored.version = expected_version + 1;
        stored.created_at = created_at;
        stored.updated_at = Utc::now();
        Ok(stored.version)
    }

    async fn append_transition(&mut self, record: &TransitionRecord) -> Result<i64> {
        self.staged.last_transition_sequence += 1;
        let sequence = self.staged.last_transition_sequence;
        let mut record = record.clone();
        record.sequence = sequence;
        self.staged.transitions.push(record);
        Ok(sequence)
    }

    async fn append_outbox_event(&mut self, event: &OutboxEvent) -> Result<()> {
        self.staged.outbox.push(event.clone());
        Ok(())
    }

    async fn next_sequence(&mut self, scope: &str, year: i32) -> Result<i64> {
        let value = self
            .staged
            .sequences
            .entry((scope.to_string(), year))
            .or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryTransaction { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

fn check_claim(event: &OutboxEvent, worker_id: &str) -> Result<()> {
    if event.status != OutboxStatus::Processing {
        return Err(StoreError::OutboxStateConflict {
            id: event.id,
            status: event.status,
            expected: "PROCESSING",
        });
    }
    if event.claimed_by.as_deref() != Some(worker_id) {
        return Err(StoreError::ClaimLost {
            id: event.id,
            worker_id: worker_id.to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn claim_batch(
        &self,
        worker_id: &str,
        limit: usize,
        lease: chrono::Duration,
    ) -> Result<Vec<OutboxEvent>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let mut candidates: Vec<&mut OutboxEvent> = state
            .outbox
            .iter_mut()
            .filter(|e| e.is_claimable(now, lease))
            .collect();
        candidates.sort_by_key(|e| e.created_at);

        Ok(candidates
            .into_iter()
            .take(limit)
            .map(|event| {
                event.claim(worker_id, now);
                event.clone()
            })
            .collect())
    }

    async fn mark_completed(&self, id: EventId, worker_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let event = state.outbox_event_mut(id)?;
        check_claim(event, worker_id)?;
        event.complete(Utc::now());
        Ok(())
    }

    async fn mark_failed(&self, id: EventId, worker_id: &str, error: &str) -> Result<OutboxStatus> {
        let mut state = self.state.lock().await;
        let event = state.outbox_event_mut(id)?;
        check_claim(event, worker_id)?;
        Ok(event.record_failure(error))
    }

    async fn get_event(&self, id: EventId) -> Result<Option<OutboxEvent>> {
        let state = self.state.lock().await;
        Ok(state.outbox.iter().find(|e| e.id == id).cloned())
    }

    async fn query_events(&self, query: OutboxQuery) -> Result<Vec<OutboxEvent>> {
        let state = self.state.lock().await;
        let mut events: Vec<_> = state
            .outbox
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.created_at);
        if let Some(limit) = query.limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    async fn requeue_failed(&self, id: EventId) -> Result<()> {
        let mut state = self.state.lock().await;
        let event = state.outbox_event_mut(id)?;
        if event.status != OutboxStatus::Failed {
            return Err(StoreError::OutboxStateConflict {
                id,
                status: event.status,
                expected: "FAILED",
            });
        }
        event.requeue();
        Ok(())
    }
}

#[async_trait]
impl ProcessedEventStore for InMemoryStore {
    async fn has_processed(&self, event_id: EventId, handler_name: &str) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state
            .processed
            .contains_key(&(event_id, handler_name.to_string())))
    }

    async fn record_processed(&self, marker: &ProcessedEvent) -> Result<bool> {
        let mut state = self.state.lock().await;
        let key = (marker.event_id, marker.handler_name.clone());
        if state.processed.contains_key(&key) {
            return Ok(false);
        }
        state.processed.insert(key, marker.clone());
        Ok(true)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let before = state.processed.len();
        state.processed.retain(|_, marker| !marker.is_expired(now));
        Ok((before - state.processed.len()) as u64)
    }
}
