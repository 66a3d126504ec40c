use thiserror::Error;

use crate::{AggregateId, EventId, OutboxStatus};

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record changed underneath the writer.
    #[error(
        "Concurrency conflict for aggregate {aggregate_id}: expected version {expected}, found {actual}"
    )]
    VersionConflict {
        aggregate_id: AggregateId,
        expected: i64,
        actual: i64,
    },

    /// A row lock could not be obtained in time, or the database aborted the
    /// transaction to resolve contention.
    #[error("Lock unavailable: {0}")]
    LockUnavailable(String),

    /// An aggregate with this id already exists.
    #[error("Aggregate already exists: {0}")]
    DuplicateAggregate(AggregateId),

    /// The aggregate was not found.
    #[error("Aggregate not found: {0}")]
    AggregateNotFound(AggregateId),

    /// The outbox event was not found.
    #[error("Outbox event not found: {0}")]
    OutboxEventNotFound(EventId),

    /// The outbox event is not in a status that allows the requested change.
    #[error("Outbox event {id} is {status}, expected {expected}")]
    OutboxStateConflict {
        id: EventId,
        status: OutboxStatus,
        expected: &'static str,
    },

    /// The worker's claim on a PROCESSING event expired and another worker
    /// took the event over.
    #[error("Outbox event {id} is no longer claimed by {worker_id}")]
    ClaimLost { id: EventId, worker_id: String },

    /// A stored value could not be decoded into its domain type.
    #[error("Invalid stored value: {0}")]
    Decode(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true if the error means another writer won a race for the
    /// same rows, as opposed to an infrastructure failure.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            StoreError::VersionConflict { .. } | StoreError::LockUnavailable(_)
        )
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contention_errors_are_classified() {
        let conflict = StoreError::VersionConflict {
            aggregate_id: AggregateId::new(),
            expected: 2,
            actual: 3,
        };
        assert!(conflict.is_contention());
        assert!(StoreError::LockUnavailable("timeout".into()).is_contention());
        assert!(!StoreError::AggregateNotFound(AggregateId::new()).is_contention());
    }
}
