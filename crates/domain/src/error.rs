//! Domain error types.

use common::{AggregateId, AggregateType};
use store::StoreError;
use thiserror::Error;

use crate::lifecycle::ParseLifecycleError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The aggregate's table has no entry for the requested kind in its
    /// current status. Terminal statuses allow nothing.
    #[error(
        "Invalid transition: {aggregate_type} {aggregate_id} cannot '{kind}' from {from} (allowed: [{}])",
        .allowed.join(", ")
    )]
    InvalidTransition {
        aggregate_type: AggregateType,
        aggregate_id: AggregateId,
        from: String,
        kind: String,
        allowed: Vec<String>,
    },

    /// A guard rejected the transition.
    #[error("Guard {guard} failed: {reason}")]
    GuardFailed { guard: &'static str, reason: String },

    /// The aggregate, or an entity it references, does not exist.
    #[error("Aggregate not found: {aggregate_type} with id {aggregate_id}")]
    NotFound {
        aggregate_type: AggregateType,
        aggregate_id: AggregateId,
    },

    /// Another writer won the race for the same aggregate.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The request itself is malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The aggregate's fields cannot be edited in its current status.
    #[error("{aggregate_type} {aggregate_id} cannot be edited in status {status}")]
    NotEditable {
        aggregate_type: AggregateType,
        aggregate_id: AggregateId,
        status: String,
    },

    /// An external collaborator failed.
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// A stored status could not be parsed.
    #[error("Invalid stored status: {0}")]
    Decode(#[from] ParseLifecycleError),

    /// An error occurred in the store.
    #[error("Store error: {0}")]
    Store(StoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// Shorthand for a guard rejection.
    pub fn guard(guard: &'static str, reason: impl Into<String>) -> Self {
        DomainError::GuardFailed {
            guard,
            reason: reason.into(),
        }
    }

    pub fn not_found(aggregate_type: AggregateType, aggregate_id: AggregateId) -> Self {
        DomainError::NotFound {
            aggregate_type,
            aggregate_id,
        }
    }

    /// Returns true for the error kinds a caller may retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DomainError::Conflict(_))
    }
}

impl From<StoreError> for DomainError {
    fn from(e: StoreError) -> Self {
        if e.is_contention() {
            DomainError::Conflict(e.to_string())
        } else {
            DomainError::Store(e)
        }
    }
}
