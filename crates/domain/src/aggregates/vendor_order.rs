//! The part of an order one supplier is responsible for.

use chrono::{DateTime, Utc};
use common::{AggregateId, AggregateType, PartyId};
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::guard::{Guard, RequiresReason};
use crate::lifecycle::lifecycle_enum;
use crate::table::TransitionTable;
use crate::value_objects::{Money, OrderLine};

lifecycle_enum! {
    pub enum VendorOrderStatus {
        Pending => "PENDING",
        Confirmed => "CONFIRMED",
        Processing => "PROCESSING",
        InTransit => "IN_TRANSIT",
        Delivered => "DELIVERED",
        Fulfilled => "FULFILLED",
        Disputed => "DISPUTED",
        Cancelled => "CANCELLED",
    }
}

lifecycle_enum! {
    pub enum VendorOrderKind {
        Confirm => "confirm",
        StartProcessing => "start_processing",
        Ship => "ship",
        Deliver => "deliver",
        Fulfill => "fulfill",
        Dispute => "dispute",
        Resume => "resume",
        Settle => "settle",
        Cancel => "cancel",
    }
}

use VendorOrderKind as K;
use VendorOrderStatus as S;

static TABLE: TransitionTable<VendorOrderStatus, VendorOrderKind> = TransitionTable::new(
    S::Pending,
    &[S::Fulfilled, S::Cancelled],
    &[
        (S::Pending, K::Confirm, S::Confirmed),
        (S::Confirmed, K::StartProcessing, S::Processing),
        (S::Confirmed, K::Ship, S::InTransit),
        (S::Processing, K::Ship, S::InTransit),
        (S::Confirmed, K::Deliver, S::Delivered),
        (S::Processing, K::Deliver, S::Delivered),
        (S::InTransit, K::Deliver, S::Delivered),
        (S::Processing, K::Fulfill, S::Fulfilled),
        (S::InTransit, K::Fulfill, S::Fulfilled),
        (S::Delivered, K::Fulfill, S::Fulfilled),
        (S::Confirmed, K::Dispute, S::Disputed),
        (S::Processing, K::Dispute, S::Disputed),
        (S::InTransit, K::Dispute, S::Disputed),
        (S::Delivered, K::Dispute, S::Disputed),
        (S::Disputed, K::Resume, S::Processing),
        (S::Disputed, K::Settle, S::Fulfilled),
        (S::Disputed, K::Cancel, S::Cancelled),
        (S::Pending, K::Cancel, S::Cancelled),
        (S::Confirmed, K::Cancel, S::Cancelled),
    ],
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorOrder {
    id: AggregateId,
    status: VendorOrderStatus,
    pub order_id: AggregateId,
    pub supplier_id: PartyId,
    pub lines: Vec<OrderLine>,
    pub created_at: DateTime<Utc>,
}

impl VendorOrder {
    pub fn new(order_id: AggregateId, supplier_id: PartyId) -> Self {
        Self {
            id: AggregateId::new(),
            status: VendorOrderStatus::Pending,
            order_id,
            supplier_id,
            lines: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_line(mut self, line: OrderLine) -> Self {
        self.lines.push(line);
        self
    }

    pub fn line(&self, line_id: &str) -> Option<&OrderLine> {
        self.lines.iter().find(|l| l.line_id == line_id)
    }

    pub fn total(&self) -> Money {
        self.lines
            .iter()
            .map(|l| l.unit_price.multiply(l.quantity_ordered))
            .sum()
    }
}

impl Aggregate for VendorOrder {
    type Status = VendorOrderStatus;
    type Kind = VendorOrderKind;

    const AGGREGATE_TYPE: AggregateType = AggregateType::VendorOrder;

    fn id(&self) -> AggregateId {
        self.id
    }

    fn status(&self) -> VendorOrderStatus {
        self.status
    }

    fn set_status(&mut self, status: VendorOrderStatus) {
        self.status = status;
    }

    fn table() -> &'static TransitionTable<VendorOrderStatus, VendorOrderKind> {
        &TABLE
    }

    fn event_type(kind: VendorOrderKind) -> Option<&'static str> {
        match kind {
            K::Confirm => Some("vendor_order.confirmed"),
            K::StartProcessing => None,
            K::Ship => Some("vendor_order.shipped"),
            K::Deliver => Some("vendor_order.delivered"),
            K::Fulfill => Some("vendor_order.fulfilled"),
            K::Dispute => Some("vendor_order.disputed"),
            K::Resume => Some("vendor_order.resumed"),
            K::Settle => Some("vendor_order.settled"),
            K::Cancel => Some("vendor_order.cancelled"),
        }
    }

    fn guards(kind: VendorOrderKind) -> &'static [&'static dyn Guard<Self>] {
        match kind {
            K::Dispute => &[&RequiresReason],
            _ => &[],
        }
    }

    fn parent_id(&self) -> Option<AggregateId> {
        Some(self.order_id)
    }

    fn owner_id(&self) -> Option<PartyId> {
        Some(self.supplier_id)
    }

    fn rollup_parent(&self) -> Option<AggregateId> {
        Some(self.order_id)
    }

    /// Lines are fixed once the supplier confirms.
    fn is_editable(&self) -> bool {
        self.status == VendorOrderStatus::Pending
    }

    fn event_data(&self) -> serde_json::Value {
        serde_json::json!({
            "order_id": self.order_id,
            "supplier_id": self.supplier_id,
            "total_cents": self.total().cents(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_uses_ordered_quantities() {
        let vendor_order = VendorOrder::new(AggregateId::new(), PartyId::new())
            .with_line(OrderLine::new("L1", "Bolts", 100, Money::from_cents(25)))
            .with_line(OrderLine::new("L2", "Nuts", 50, Money::from_cents(10)));
        assert_eq!(vendor_order.total().cents(), 3000);
        assert!(vendor_order.line("L2").is_some());
        assert!(vendor_order.line("L3").is_none());
    }

    #[test]
    fn settle_closes_a_dispute() {
        assert_eq!(
            TABLE.next(S::Disputed, K::Settle),
            Some(S::Fulfilled)
        );
        assert!(TABLE.is_terminal(S::Fulfilled));
        assert_eq!(TABLE.next(S::Pending, K::Ship), None);
    }
}
