//! Shipments against a vendor order.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, AggregateType};
use serde::{Deserialize, Serialize};
use store::StoreTransaction;

use crate::aggregate::Aggregate;
use crate::error::DomainError;
use crate::guard::{CreationGuard, Guard, RequiresReason};
use crate::lifecycle::{Lifecycle, lifecycle_enum};
use crate::table::TransitionTable;
use crate::value_objects::FulfillmentLine;

use super::vendor_order::{VendorOrder, VendorOrderStatus};

lifecycle_enum! {
    pub enum FulfillmentStatus {
        Pending => "PENDING",
        Picking => "PICKING",
        Packed => "PACKED",
        Shipped => "SHIPPED",
        InTransit => "IN_TRANSIT",
        OutForDelivery => "OUT_FOR_DELIVERY",
        Delivered => "DELIVERED",
        Accepted => "ACCEPTED",
        Rejected => "REJECTED",
        PartiallyAccepted => "PARTIALLY_ACCEPTED",
        Cancelled => "CANCELLED",
    }
}

lifecycle_enum! {
    pub enum FulfillmentKind {
        Pick => "pick",
        Pack => "pack",
        Ship => "ship",
        Depart => "depart",
        OutForDelivery => "out_for_delivery",
        Deliver => "deliver",
        Accept => "accept",
        Reject => "reject",
        PartiallyAccept => "partially_accept",
        Cancel => "cancel",
    }
}

use FulfillmentKind as K;
use FulfillmentStatus as S;

static TABLE: TransitionTable<FulfillmentStatus, FulfillmentKind> = TransitionTable::new(
    S::Pending,
    &[S::Accepted, S::Rejected, S::PartiallyAccepted, S::Cancelled],
    &[
        (S::Pending, K::Pick, S::Picking),
        (S::Pending, K::Pack, S::Packed),
        (S::Pending, K::Ship, S::Shipped),
        (S::Picking, K::Pack, S::Packed),
        (S::Picking, K::Ship, S::Shipped),
        (S::Packed, K::Ship, S::Shipped),
        (S::Shipped, K::Depart, S::InTransit),
        (S::Shipped, K::Deliver, S::Delivered),
        (S::InTransit, K::OutForDelivery, S::OutForDelivery),
        (S::InTransit, K::Deliver, S::Delivered),
        (S::OutForDelivery, K::Deliver, S::Delivered),
        (S::Delivered, K::Accept, S::Accepted),
        (S::Delivered, K::Reject, S::Rejected),
        (S::Delivered, K::PartiallyAccept, S::PartiallyAccepted),
        (S::Pending, K::Cancel, S::Cancelled),
        (S::Picking, K::Cancel, S::Cancelled),
        (S::Packed, K::Cancel, S::Cancelled),
    ],
);

/// Vendor-order statuses in which new shipments may be raised.
const SHIPPABLE: [VendorOrderStatus; 4] = [
    VendorOrderStatus::Confirmed,
    VendorOrderStatus::Processing,
    VendorOrderStatus::InTransit,
    VendorOrderStatus::Delivered,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fulfillment {
    id: AggregateId,
    status: FulfillmentStatus,
    reference_number: Option<String>,
    pub vendor_order_id: AggregateId,
    pub lines: Vec<FulfillmentLine>,
    pub tracking_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Fulfillment {
    pub fn new(vendor_order_id: AggregateId, lines: Vec<FulfillmentLine>) -> Self {
        Self {
            id: AggregateId::new(),
            status: FulfillmentStatus::Pending,
            reference_number: None,
            vendor_order_id,
            lines,
            tracking_number: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_tracking_number(mut self, tracking_number: impl Into<String>) -> Self {
        self.tracking_number = Some(tracking_number.into());
        self
    }
}

impl Aggregate for Fulfillment {
    type Status = FulfillmentStatus;
    type Kind = FulfillmentKind;

    const AGGREGATE_TYPE: AggregateType = AggregateType::Fulfillment;

    fn id(&self) -> AggregateId {
        self.id
    }

    fn status(&self) -> FulfillmentStatus {
        self.status
    }

    fn set_status(&mut self, status: FulfillmentStatus) {
        self.status = status;
    }

    fn table() -> &'static TransitionTable<FulfillmentStatus, FulfillmentKind> {
        &TABLE
    }

    fn event_type(kind: FulfillmentKind) -> Option<&'static str> {
        match kind {
            K::Ship => Some("fulfillment.shipped"),
            K::Depart => Some("fulfillment.in_transit"),
            K::Deliver => Some("fulfillment.delivered"),
            K::Accept => Some("fulfillment.accepted"),
            K::Reject => Some("fulfillment.rejected"),
            K::PartiallyAccept => Some("fulfillment.partially_accepted"),
            K::Cancel => Some("fulfillment.cancelled"),
            K::Pick | K::Pack | K::OutForDelivery => None,
        }
    }

    fn guards(kind: FulfillmentKind) -> &'static [&'static dyn Guard<Self>] {
        match kind {
            K::Reject | K::PartiallyAccept => &[&RequiresReason],
            _ => &[],
        }
    }

    fn creation_guards() -> &'static [&'static dyn CreationGuard<Self>] {
        &[&QuantityWithinRemaining]
    }

    fn parent_id(&self) -> Option<AggregateId> {
        Some(self.vendor_order_id)
    }

    fn rollup_parent(&self) -> Option<AggregateId> {
        Some(self.vendor_order_id)
    }

    fn reference_prefix() -> Option<&'static str> {
        Some("FUL")
    }

    fn reference_number(&self) -> Option<&str> {
        self.reference_number.as_deref()
    }

    fn set_reference_number(&mut self, reference: String) {
        self.reference_number = Some(reference);
    }

    /// Lines can change until the goods leave the warehouse.
    fn is_editable(&self) -> bool {
        matches!(self.status, S::Pending | S::Picking | S::Packed)
    }

    fn event_data(&self) -> serde_json::Value {
        serde_json::json!({
            "vendor_order_id": self.vendor_order_id,
            "lines": self.lines,
            "tracking_number": self.tracking_number,
        })
    }
}

/// Each requested quantity must fit in what the vendor order has not yet
/// shipped. Cancelled fulfillments give their quantity back.
struct QuantityWithinRemaining;

#[async_trait]
impl CreationGuard<Fulfillment> for QuantityWithinRemaining {
    fn name(&self) -> &'static str {
        "quantity_within_remaining"
    }

    async fn check(
        &self,
        tx: &mut dyn StoreTransaction,
        fulfillment: &Fulfillment,
    ) -> Result<(), DomainError> {
        let vendor_order_id = fulfillment.vendor_order_id;
        let record = tx
            .lock_aggregate(vendor_order_id)
            .await?
            .ok_or_else(|| DomainError::not_found(AggregateType::VendorOrder, vendor_order_id))?;
        let vendor_order = VendorOrder::from_record(record)?;

        if !SHIPPABLE.contains(&vendor_order.status()) {
            return Err(DomainError::guard(
                self.name(),
                format!("vendor order is {}", vendor_order.status()),
            ));
        }
        if fulfillment.lines.is_empty() {
            return Err(DomainError::guard(self.name(), "fulfillment has no lines"));
        }

        let mut fulfilled: HashMap<String, u32> = HashMap::new();
        for record in tx
            .children(AggregateType::Fulfillment, vendor_order_id)
            .await?
        {
            if record.status == S::Cancelled.as_str() || record.id == fulfillment.id() {
                continue;
            }
            let sibling = Fulfillment::from_record(record)?;
            for line in sibling.lines {
                let total = fulfilled.entry(line.line_id).or_default();
                *total = total.saturating_add(line.quantity);
            }
        }

        // A line id may repeat within one request; compare the sum.
        let mut requested: Vec<(&str, u32)> = Vec::new();
        for line in &fulfillment.lines {
            if line.quantity == 0 {
                return Err(DomainError::guard(
                    self.name(),
                    format!("line {} has zero quantity", line.line_id),
                ));
            }
            match requested.iter_mut().find(|(id, _)| *id == line.line_id) {
                Some((_, total)) => {
                    *total = total.checked_add(line.quantity).ok_or_else(|| {
                        DomainError::guard(self.name(), format!("line {} quantity overflows", line.line_id))
                    })?;
                }
                None => requested.push((line.line_id.as_str(), line.quantity)),
            }
        }

        for (line_id, quantity) in requested {
            let ordered = vendor_order.line(line_id).ok_or_else(|| {
                DomainError::guard(
                    self.name(),
                    format!("line {line_id} is not on the vendor order"),
                )
            })?;
            let already = fulfilled.get(line_id).copied().unwrap_or(0);
            let remaining = ordered.quantity_ordered.saturating_sub(already);
            if quantity > remaining {
                return Err(DomainError::guard(
                    self.name(),
                    format!(
                        "line {line_id} requests {quantity}, only {remaining} of {} remain",
                        ordered.quantity_ordered
                    ),
                ));
            }
        }
        Ok(())
    }
}
