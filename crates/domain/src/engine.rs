//! The state machine engine.
//!
//! Every status change runs through [`StateMachineEngine`] in one store
//! transaction: lock, guard, mutate, audit, outbox, then any coupled and
//! rolled-up transitions the change causes. Either all of it commits or
//! none of it does.

use std::sync::Arc;

use chrono::Utc;
use common::{AggregateId, AggregateType, TriggerSource};
use futures_util::future::BoxFuture;
use store::{Store, StoreTransaction, TransitionRecord};
use tracing::{info, warn};

use crate::aggregate::Aggregate;
use crate::aggregates::{Delivery, Dispute, Fulfillment, Invoice, Order, Quote, Rfq, VendorOrder};
use crate::command::{TransitionOutcome, TransitionRequest};
use crate::error::DomainError;
use crate::guard::{COUPLED_FROM, GuardContext};
use crate::lifecycle::Lifecycle;
use crate::outbox::{self, SCHEMA_VERSION, TransitionEventPayload};
use crate::reference::next_reference;
use crate::suppliers::SupplierDirectory;
use crate::value_objects::FulfillmentLine;

/// A transition applied inside the current unit, reported once it commits.
#[derive(Debug, Clone)]
pub(crate) struct Applied {
    pub aggregate_type: AggregateType,
    pub aggregate_id: AggregateId,
    pub from: &'static str,
    pub to: &'static str,
    pub kind: &'static str,
    pub trigger_source: TriggerSource,
    /// The outbox event written for the transition, if its kind maps to one.
    pub event_type: Option<&'static str>,
}

/// Applies transitions to procurement aggregates.
pub struct StateMachineEngine<S: Store> {
    store: S,
    suppliers: Arc<dyn SupplierDirectory>,
}

impl<S: Store> StateMachineEngine<S> {
    pub fn new(store: S, suppliers: Arc<dyn SupplierDirectory>) -> Self {
        Self { store, suppliers }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Inserts a new aggregate in its initial status.
    ///
    /// Runs the type's creation guards and assigns a reference number when
    /// the type has one. Creation writes no audit record and no event.
    #[tracing::instrument(skip(self, aggregate), fields(aggregate_type = %A::AGGREGATE_TYPE, aggregate_id = %aggregate.id()))]
    pub async fn create<A: Aggregate>(&self, mut aggregate: A) -> Result<A, DomainError> {
        let initial = A::table().initial();
        if aggregate.status() != initial {
            return Err(DomainError::InvalidArgument(format!(
                "new {} must start in {initial}, not {}",
                A::AGGREGATE_TYPE,
                aggregate.status()
            )));
        }

        let mut tx = self.store.begin().await?;
        for guard in A::creation_guards() {
            if let Err(err) = guard.check(tx.as_mut(), &aggregate).await {
                record_rejection(A::AGGREGATE_TYPE, "create", &err);
                return Err(err);
            }
        }

        if let Some(prefix) = A::reference_prefix() {
            if aggregate.reference_number().is_none() {
                let reference = next_reference(tx.as_mut(), prefix, Utc::now()).await?;
                aggregate.set_reference_number(reference);
            }
        }

        tx.insert_aggregate(&aggregate.to_record()?).await?;
        tx.commit().await?;

        info!(
            reference_number = aggregate.reference_number(),
            "{} created",
            A::AGGREGATE_TYPE
        );
        Ok(aggregate)
    }

    /// Raises a fulfillment against a vendor order, checking the requested
    /// quantities against what remains unshipped.
    pub async fn create_fulfillment(
        &self,
        vendor_order_id: AggregateId,
        lines: Vec<FulfillmentLine>,
    ) -> Result<Fulfillment, DomainError> {
        self.create(Fulfillment::new(vendor_order_id, lines)).await
    }

    /// Edits an aggregate's non-status fields in its own atomic unit.
    ///
    /// Fails with `NotEditable` when the current status freezes the
    /// aggregate, and with `InvalidArgument` if `edit` touches the status.
    /// The edited aggregate must still pass the type's creation guards.
    #[tracing::instrument(skip(self, edit), fields(aggregate_type = %A::AGGREGATE_TYPE))]
    pub async fn modify<A, F>(&self, id: AggregateId, edit: F) -> Result<A, DomainError>
    where
        A: Aggregate,
        F: FnOnce(&mut A) -> Result<(), DomainError> + Send,
    {
        let mut tx = self.store.begin().await?;
        let mut record = tx
            .lock_aggregate(id)
            .await?
            .ok_or_else(|| DomainError::not_found(A::AGGREGATE_TYPE, id))?;
        let mut aggregate = A::from_record(record.clone())?;

        if !aggregate.is_editable() {
            return Err(DomainError::NotEditable {
                aggregate_type: A::AGGREGATE_TYPE,
                aggregate_id: id,
                status: aggregate.status().to_string(),
            });
        }

        let status = aggregate.status();
        let reference = aggregate.reference_number().map(str::to_string);
        edit(&mut aggregate)?;
        if aggregate.status() != status
            || aggregate.id() != id
            || aggregate.reference_number() != reference.as_deref()
        {
            return Err(DomainError::InvalidArgument(format!(
                "modify cannot change the status or identity of {} {id}",
                A::AGGREGATE_TYPE
            )));
        }

        for guard in A::creation_guards() {
            if let Err(err) = guard.check(tx.as_mut(), &aggregate).await {
                record_rejection(A::AGGREGATE_TYPE, "modify", &err);
                return Err(err);
            }
        }

        let expected_version = record.version;
        aggregate.write_into(&mut record)?;
        tx.update_aggregate(&record, expected_version).await?;
        tx.commit().await?;
        Ok(aggregate)
    }

    /// Loads an aggregate, failing with `NotFound` if it does not exist.
    pub async fn load<A: Aggregate>(&self, id: AggregateId) -> Result<A, DomainError> {
        self.find(id)
            .await?
            .ok_or_else(|| DomainError::not_found(A::AGGREGATE_TYPE, id))
    }

    /// Loads an aggregate if it exists and has type `A`.
    pub async fn find<A: Aggregate>(&self, id: AggregateId) -> Result<Option<A>, DomainError> {
        match self.store.get_aggregate(id).await? {
            Some(record) if record.aggregate_type == A::AGGREGATE_TYPE => {
                Ok(Some(A::from_record(record)?))
            }
            _ => Ok(None),
        }
    }

    /// Returns an aggregate's audit trail in commit order.
    pub async fn history(&self, id: AggregateId) -> Result<Vec<TransitionRecord>, DomainError> {
        Ok(self.store.transitions_for(id).await?)
    }

    /// Loads the aggregates of type `A` whose parent is `parent_id`.
    pub async fn children<A: Aggregate>(&self, parent_id: AggregateId) -> Result<Vec<A>, DomainError> {
        self.store
            .children(A::AGGREGATE_TYPE, parent_id)
            .await?
            .into_iter()
            .map(A::from_record)
            .collect()
    }

    /// Applies one transition, with everything it causes, atomically.
    #[tracing::instrument(
        skip(self, request),
        fields(
            aggregate_type = %A::AGGREGATE_TYPE,
            aggregate_id = %request.aggregate_id,
            kind = %request.kind,
        )
    )]
    pub async fn transition<A: Aggregate>(
        &self,
        request: TransitionRequest<A::Kind>,
    ) -> Result<TransitionOutcome<A::Status>, DomainError> {
        let mut tx = self.store.begin().await?;
        let mut journal = Vec::new();

        match self.apply::<A>(tx.as_mut(), &request, &mut journal).await {
            Ok(outcome) => {
                self.commit(tx, journal).await?;
                Ok(outcome)
            }
            Err(err) => Err(abort(tx, A::AGGREGATE_TYPE, request.kind.as_str(), err).await),
        }
    }

    /// Applies a transition named by strings, as received from outside the
    /// process. An unknown kind fails with `InvalidTransition`.
    #[tracing::instrument(
        skip(self, request),
        fields(aggregate_id = %request.aggregate_id, kind = %request.kind)
    )]
    pub async fn transition_named(
        &self,
        aggregate_type: AggregateType,
        request: TransitionRequest<String>,
    ) -> Result<TransitionOutcome<&'static str>, DomainError> {
        let mut tx = self.store.begin().await?;
        let mut journal = Vec::new();

        match self
            .apply_named(tx.as_mut(), aggregate_type, &request, &mut journal)
            .await
        {
            Ok(outcome) => {
                self.commit(tx, journal).await?;
                Ok(outcome)
            }
            Err(err) => Err(abort(tx, aggregate_type, &request.kind, err).await),
        }
    }

    async fn commit(&self, tx: Box<dyn StoreTransaction>, journal: Vec<Applied>) -> Result<(), DomainError> {
        tx.commit().await?;
        for applied in journal {
            metrics::counter!(
                "state_transitions_total",
                "aggregate_type" => applied.aggregate_type.as_str(),
                "kind" => applied.kind,
                "trigger_source" => applied.trigger_source.as_str(),
            )
            .increment(1);
            if let Some(event_type) = applied.event_type {
                metrics::counter!("outbox_events_written_total", "event_type" => event_type)
                    .increment(1);
            }
            info!(
                aggregate_type = %applied.aggregate_type,
                aggregate_id = %applied.aggregate_id,
                from = applied.from,
                to = applied.to,
                kind = applied.kind,
                trigger_source = %applied.trigger_source,
                "Transition committed"
            );
        }
        Ok(())
    }

    /// Applies one transition inside `tx`, then its coupled transitions and
    /// the rollup onto its parent.
    pub(crate) fn apply<'a, A: Aggregate>(
        &'a self,
        tx: &'a mut dyn StoreTransaction,
        request: &'a TransitionRequest<A::Kind>,
        journal: &'a mut Vec<Applied>,
    ) -> BoxFuture<'a, Result<TransitionOutcome<A::Status>, DomainError>> {
        Box::pin(async move {
            let id = request.aggregate_id;
            let kind = request.kind;
            let mut record = tx
                .lock_aggregate(id)
                .await?
                .filter(|r| r.aggregate_type == A::AGGREGATE_TYPE)
                .ok_or_else(|| DomainError::not_found(A::AGGREGATE_TYPE, id))?;
            let aggregate = A::from_record(record.clone())?;
            let from = aggregate.status();

            let table = A::table();
            let to = table.next(from, kind).ok_or_else(|| DomainError::InvalidTransition {
                aggregate_type: A::AGGREGATE_TYPE,
                aggregate_id: id,
                from: from.to_string(),
                kind: kind.to_string(),
                allowed: table
                    .allowed_kinds(from)
                    .iter()
                    .map(|k| k.to_string())
                    .collect(),
            })?;

            let mut ctx = GuardContext::new(&mut *tx, aggregate, request, self.suppliers.as_ref());
            for guard in A::guards(kind) {
                guard.check(&mut ctx).await?;
            }
            let now = ctx.now;
            let (mut aggregate, coupled) = ctx.into_parts();

            aggregate.set_status(to);
            let expected_version = record.version;
            aggregate.write_into(&mut record)?;
            tx.update_aggregate(&record, expected_version).await?;

            let audit = TransitionRecord::builder()
                .aggregate(A::AGGREGATE_TYPE, id)
                .from_status(from.as_str())
                .to_status(to.as_str())
                .transition_kind(kind.as_str())
                .triggered_by(request.actor_id)
                .trigger_source(request.trigger_source)
                .reason(request.non_empty_reason().map(str::to_string))
                .metadata(request.metadata.clone())
                .created_at(now)
                .try_build()
                .ok_or_else(|| DomainError::InvalidArgument("incomplete transition record".into()))?;
            let sequence = tx.append_transition(&audit).await?;

            let event_type = A::event_type(kind);
            let event_id = match event_type {
                Some(event_type) => {
                    let payload = TransitionEventPayload {
                        aggregate_id: id,
                        aggregate_type: A::AGGREGATE_TYPE,
                        reference_number: aggregate.reference_number().map(str::to_string),
                        from_status: from.to_string(),
                        to_status: to.to_string(),
                        transition_kind: kind.to_string(),
                        actor_id: request.actor_id,
                        trigger_source: request.trigger_source,
                        reason: audit.reason.clone(),
                        occurred_at: now,
                        data: aggregate.event_data(),
                    };
                    let event_id = outbox::append(
                        &mut *tx,
                        event_type,
                        A::AGGREGATE_TYPE,
                        id,
                        serde_json::to_value(&payload)?,
                        SCHEMA_VERSION,
                    )
                    .await?;
                    Some(event_id)
                }
                None => None,
            };

            journal.push(Applied {
                aggregate_type: A::AGGREGATE_TYPE,
                aggregate_id: id,
                from: from.as_str(),
                to: to.as_str(),
                kind: kind.as_str(),
                trigger_source: request.trigger_source,
                event_type,
            });

            for coupled in coupled {
                let coupled_request = TransitionRequest {
                    aggregate_id: coupled.aggregate_id,
                    kind: coupled.kind.to_string(),
                    actor_id: request.actor_id,
                    trigger_source: request.trigger_source,
                    reason: request.reason.clone(),
                    metadata: Default::default(),
                }
                .with_metadata(COUPLED_FROM, id.to_string());
                self.apply_named(&mut *tx, coupled.aggregate_type, &coupled_request, journal)
                    .await?;
            }

            if let Some(parent_id) = aggregate.rollup_parent() {
                self.propagate(&mut *tx, A::AGGREGATE_TYPE, parent_id, journal)
                    .await?;
            }

            Ok(TransitionOutcome {
                aggregate_id: id,
                from,
                to,
                kind: kind.as_str(),
                sequence,
                event_id,
            })
        })
    }

    /// Routes a string-keyed request to the typed path of its aggregate type.
    pub(crate) fn apply_named<'a>(
        &'a self,
        tx: &'a mut dyn StoreTransaction,
        aggregate_type: AggregateType,
        request: &'a TransitionRequest<String>,
        journal: &'a mut Vec<Applied>,
    ) -> BoxFuture<'a, Result<TransitionOutcome<&'static str>, DomainError>> {
        match aggregate_type {
            AggregateType::Rfq => self.apply_parsed::<Rfq>(tx, request, journal),
            AggregateType::Quote => self.apply_parsed::<Quote>(tx, request, journal),
            AggregateType::Order => self.apply_parsed::<Order>(tx, request, journal),
            AggregateType::VendorOrder => self.apply_parsed::<VendorOrder>(tx, request, journal),
            AggregateType::Fulfillment => self.apply_parsed::<Fulfillment>(tx, request, journal),
            AggregateType::Delivery => self.apply_parsed::<Delivery>(tx, request, journal),
            AggregateType::Dispute => self.apply_parsed::<Dispute>(tx, request, journal),
            AggregateType::Invoice => self.apply_parsed::<Invoice>(tx, request, journal),
        }
    }

    fn apply_parsed<'a, A: Aggregate>(
        &'a self,
        tx: &'a mut dyn StoreTransaction,
        request: &'a TransitionRequest<String>,
        journal: &'a mut Vec<Applied>,
    ) -> BoxFuture<'a, Result<TransitionOutcome<&'static str>, DomainError>> {
        Box::pin(async move {
            let kind = match request.kind.parse::<A::Kind>() {
                Ok(kind) => kind,
                Err(_) => return Err(unknown_kind::<A>(tx, request).await),
            };
            let typed = request.clone().with_kind(kind);
            let outcome = self.apply::<A>(tx, &typed, journal).await?;
            Ok(outcome.named())
        })
    }
}

/// Builds the error for a kind string that names no kind of `A`.
async fn unknown_kind<A: Aggregate>(
    tx: &mut dyn StoreTransaction,
    request: &TransitionRequest<String>,
) -> DomainError {
    let id = request.aggregate_id;
    let record = match tx.get_aggregate(id).await {
        Ok(Some(record)) if record.aggregate_type == A::AGGREGATE_TYPE => record,
        Ok(_) => return DomainError::not_found(A::AGGREGATE_TYPE, id),
        Err(err) => return err.into(),
    };
    let allowed = match record.status.parse::<A::Status>() {
        Ok(from) => A::table()
            .allowed_kinds(from)
            .iter()
            .map(|k| k.to_string())
            .collect(),
        Err(err) => return err.into(),
    };
    DomainError::InvalidTransition {
        aggregate_type: A::AGGREGATE_TYPE,
        aggregate_id: id,
        from: record.status,
        kind: request.kind.clone(),
        allowed,
    }
}

/// Rolls the unit back and reports the rejection.
async fn abort(
    tx: Box<dyn StoreTransaction>,
    aggregate_type: AggregateType,
    kind: &str,
    err: DomainError,
) -> DomainError {
    if let Err(rollback) = tx.rollback().await {
        warn!(error = %rollback, "Rollback failed");
    }
    record_rejection(aggregate_type, kind, &err);
    err
}

fn record_rejection(aggregate_type: AggregateType, kind: &str, err: &DomainError) {
    let reason = match err {
        DomainError::InvalidTransition { .. } => "invalid_transition",
        DomainError::GuardFailed { .. } => "guard_failed",
        DomainError::NotFound { .. } => "not_found",
        DomainError::Conflict(_) => "conflict",
        _ => "error",
    };
    metrics::counter!(
        "state_transition_rejections_total",
        "aggregate_type" => aggregate_type.as_str(),
        "kind" => kind.to_string(),
        "reason" => reason,
    )
    .increment(1);
    tracing::debug!(%aggregate_type, kind, error = %err, "Transition rejected");
}
