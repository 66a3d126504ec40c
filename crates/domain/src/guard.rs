//! Transition guards.
//!
//! A guard is a named precondition on one `(aggregate type, kind)` pair.
//! Guards run inside the engine's transaction after the aggregate is locked
//! and before anything is written; the first failure aborts the transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, AggregateType};
use store::StoreTransaction;

use crate::aggregate::Aggregate;
use crate::command::TransitionRequest;
use crate::error::DomainError;
use crate::suppliers::SupplierDirectory;

/// Metadata key the engine sets on a coupled transition, naming the
/// aggregate whose transition requested it.
pub const COUPLED_FROM: &str = "coupled_from";

/// A precondition evaluated before a transition is applied.
#[async_trait]
pub trait Guard<A: Aggregate>: Send + Sync {
    /// Stable name reported in `GuardFailed`.
    fn name(&self) -> &'static str;

    async fn check(&self, ctx: &mut GuardContext<'_, A>) -> Result<(), DomainError>;
}

/// A precondition evaluated before a new aggregate is inserted.
#[async_trait]
pub trait CreationGuard<A: Aggregate>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self, tx: &mut dyn StoreTransaction, aggregate: &A) -> Result<(), DomainError>;
}

/// A transition on another aggregate that must commit together with the one
/// being guarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoupledTransition {
    pub aggregate_type: AggregateType,
    pub aggregate_id: AggregateId,
    pub kind: &'static str,
}

/// Everything a guard may read, plus the two things it may change: the
/// aggregate's non-status fields and the list of coupled transitions.
pub struct GuardContext<'a, A: Aggregate> {
    pub tx: &'a mut dyn StoreTransaction,
    pub aggregate: A,
    pub from: A::Status,
    pub request: &'a TransitionRequest<A::Kind>,
    pub suppliers: &'a dyn SupplierDirectory,
    pub now: DateTime<Utc>,
    coupled: Vec<CoupledTransition>,
}

impl<'a, A: Aggregate> GuardContext<'a, A> {
    pub(crate) fn new(
        tx: &'a mut dyn StoreTransaction,
        aggregate: A,
        request: &'a TransitionRequest<A::Kind>,
        suppliers: &'a dyn SupplierDirectory,
    ) -> Self {
        let from = aggregate.status();
        Self {
            tx,
            aggregate,
            from,
            request,
            suppliers,
            now: Utc::now(),
            coupled: Vec::new(),
        }
    }

    /// Asks the engine to apply `kind` to another aggregate in the same
    /// atomic unit, after this transition.
    pub fn couple(&mut self, aggregate_type: AggregateType, aggregate_id: AggregateId, kind: &'static str) {
        self.coupled.push(CoupledTransition {
            aggregate_type,
            aggregate_id,
            kind,
        });
    }

    pub(crate) fn into_parts(self) -> (A, Vec<CoupledTransition>) {
        (self.aggregate, self.coupled)
    }

    /// Loads a related aggregate and locks it until the transaction ends.
    pub async fn lock_related<R: Aggregate>(&mut self, id: AggregateId) -> Result<R, DomainError> {
        let record = self
            .tx
            .lock_aggregate(id)
            .await?
            .ok_or_else(|| DomainError::not_found(R::AGGREGATE_TYPE, id))?;
        R::from_record(record)
    }

    /// Loads a related aggregate without locking it.
    pub async fn read_related<R: Aggregate>(&mut self, id: AggregateId) -> Result<R, DomainError> {
        let record = self
            .tx
            .get_aggregate(id)
            .await?
            .ok_or_else(|| DomainError::not_found(R::AGGREGATE_TYPE, id))?;
        R::from_record(record)
    }

    /// Reads an aggregate id argument from the request metadata.
    pub fn metadata_id(&self, guard: &'static str, key: &str) -> Result<AggregateId, DomainError> {
        let value = self
            .request
            .metadata
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| DomainError::guard(guard, format!("missing '{key}' argument")))?;
        value
            .parse()
            .map_err(|_| DomainError::guard(guard, format!("'{key}' is not a valid id: {value}")))
    }
}

/// Rejects the transition unless the request carries a non-blank reason.
pub struct RequiresReason;

#[async_trait]
impl<A: Aggregate> Guard<A> for RequiresReason {
    fn name(&self) -> &'static str {
        "requires_reason"
    }

    async fn check(&self, ctx: &mut GuardContext<'_, A>) -> Result<(), DomainError> {
        match ctx.request.non_empty_reason() {
            Some(_) => Ok(()),
            None => Err(DomainError::guard(
                <Self as Guard<A>>::name(self),
                format!("'{}' requires a reason", ctx.request.kind),
            )),
        }
    }
}
