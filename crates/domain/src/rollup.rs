//! Derived statuses.
//!
//! A vendor order's status follows its fulfillments and an order's status
//! follows its vendor orders. After a child transition the engine recomputes
//! the parent's status and, when it moved, applies the matching parent
//! transition as a system transition in the same unit.

use common::{AggregateId, AggregateType};
use futures_util::future::BoxFuture;
use store::{Store, StoreTransaction};
use tracing::{debug, warn};

use crate::aggregate::Aggregate;
use crate::aggregates::{Fulfillment, FulfillmentStatus, Order, OrderStatus, VendorOrder, VendorOrderStatus};
use crate::command::TransitionRequest;
use crate::engine::{Applied, StateMachineEngine};
use crate::error::DomainError;
use crate::lifecycle::Lifecycle;

/// Metadata key naming the child type a rollup transition was derived from.
pub const ROLLUP_FROM: &str = "rollup_from";

/// Derives a vendor order's status from its fulfillments. `None` leaves it
/// unchanged. Cancelled fulfillments are ignored.
pub fn vendor_order_status(fulfillments: &[FulfillmentStatus]) -> Option<VendorOrderStatus> {
    let live: Vec<FulfillmentStatus> = fulfillments
        .iter()
        .copied()
        .filter(|s| *s != FulfillmentStatus::Cancelled)
        .collect();
    if live.is_empty() {
        return None;
    }

    if live.contains(&FulfillmentStatus::Rejected) {
        Some(VendorOrderStatus::Disputed)
    } else if live.iter().all(|s| *s == FulfillmentStatus::Accepted) {
        Some(VendorOrderStatus::Fulfilled)
    } else if live.contains(&FulfillmentStatus::Delivered) {
        Some(VendorOrderStatus::Delivered)
    } else if live.contains(&FulfillmentStatus::InTransit) {
        Some(VendorOrderStatus::InTransit)
    } else {
        None
    }
}

/// Derives an order's status from its vendor orders. `None` leaves it
/// unchanged. Cancelled vendor orders are ignored.
pub fn order_status(vendor_orders: &[VendorOrderStatus]) -> Option<OrderStatus> {
    let live: Vec<VendorOrderStatus> = vendor_orders
        .iter()
        .copied()
        .filter(|s| *s != VendorOrderStatus::Cancelled)
        .collect();
    if live.is_empty() {
        return None;
    }

    let arrived = live
        .iter()
        .filter(|s| matches!(s, VendorOrderStatus::Delivered | VendorOrderStatus::Fulfilled))
        .count();

    if live.iter().all(|s| *s == VendorOrderStatus::Fulfilled) {
        Some(OrderStatus::Fulfilled)
    } else if live.contains(&VendorOrderStatus::Disputed) {
        Some(OrderStatus::Disputed)
    } else if arrived > 0 && arrived < live.len() {
        Some(OrderStatus::PartiallyFulfilled)
    } else if live.contains(&VendorOrderStatus::InTransit) {
        Some(OrderStatus::Processing)
    } else {
        None
    }
}

impl<S: Store> StateMachineEngine<S> {
    /// Recomputes the status of `parent_id` after a transition on one of
    /// its `child_type` children.
    ///
    /// The parent row is locked before the children are read, so concurrent
    /// sibling transitions serialise on it and each sees the other's status.
    pub(crate) fn propagate<'a>(
        &'a self,
        tx: &'a mut dyn StoreTransaction,
        child_type: AggregateType,
        parent_id: AggregateId,
        journal: &'a mut Vec<Applied>,
    ) -> BoxFuture<'a, Result<(), DomainError>> {
        Box::pin(async move {
            match child_type {
                AggregateType::Fulfillment => {
                    self.roll_up::<VendorOrder, Fulfillment>(tx, parent_id, vendor_order_status, journal)
                        .await
                }
                AggregateType::VendorOrder => {
                    self.roll_up::<Order, VendorOrder>(tx, parent_id, order_status, journal)
                        .await
                }
                _ => Ok(()),
            }
        })
    }

    async fn roll_up<P: Aggregate, C: Aggregate>(
        &self,
        tx: &mut dyn StoreTransaction,
        parent_id: AggregateId,
        derive: fn(&[C::Status]) -> Option<P::Status>,
        journal: &mut Vec<Applied>,
    ) -> Result<(), DomainError> {
        let child_type = C::AGGREGATE_TYPE;
        let Some(record) = tx.lock_aggregate(parent_id).await? else {
            warn!(parent_type = %P::AGGREGATE_TYPE, %parent_id, "Rollup parent missing, skipped");
            return Ok(());
        };

        let statuses = child_statuses::<C>(&mut *tx, parent_id).await?;
        let Some(target) = derive(&statuses) else {
            return Ok(());
        };

        let current: P::Status = record.status.parse()?;
        if current == target {
            return Ok(());
        }

        let Some(kind) = P::table().kind_between(current, target) else {
            if P::table().is_terminal(current) {
                debug!(parent_type = %P::AGGREGATE_TYPE, %parent_id, %current, %target, "Rollup parent is terminal");
            } else {
                warn!(
                    parent_type = %P::AGGREGATE_TYPE,
                    %parent_id,
                    %current,
                    %target,
                    "No transition leads to the derived status, rollup skipped"
                );
            }
            return Ok(());
        };

        let request = TransitionRequest::system(parent_id, kind)
            .with_reason(format!("derived from {child_type} statuses"))
            .with_metadata(ROLLUP_FROM, child_type.as_str());
        self.apply::<P>(tx, &request, journal).await?;

        metrics::counter!(
            "rollups_applied_total",
            "aggregate_type" => P::AGGREGATE_TYPE.as_str(),
            "kind" => kind.as_str(),
        )
        .increment(1);
        Ok(())
    }
}

async fn child_statuses<C: Aggregate>(
    tx: &mut dyn StoreTransaction,
    parent_id: AggregateId,
) -> Result<Vec<C::Status>, DomainError> {
    tx.children(C::AGGREGATE_TYPE, parent_id)
        .await?
        .iter()
        .map(|record| record.status.parse::<C::Status>().map_err(DomainError::from))
        .collect()
}
