//! Buyer purchase orders.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, AggregateType, PartyId};
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::error::DomainError;
use crate::guard::{Guard, GuardContext, RequiresReason};
use crate::lifecycle::lifecycle_enum;
use crate::table::TransitionTable;
use crate::value_objects::Money;

lifecycle_enum! {
    pub enum OrderStatus {
        PendingPayment => "PENDING_PAYMENT",
        Confirmed => "CONFIRMED",
        Processing => "PROCESSING",
        PartiallyFulfilled => "PARTIALLY_FULFILLED",
        Fulfilled => "FULFILLED",
        Disputed => "DISPUTED",
        Completed => "COMPLETED",
        Cancelled => "CANCELLED",
    }
}

lifecycle_enum! {
    pub enum OrderKind {
        Confirm => "confirm",
        StartProcessing => "start_processing",
        PartiallyFulfill => "partially_fulfill",
        Fulfill => "fulfill",
        Complete => "complete",
        Dispute => "dispute",
        Resume => "resume",
        Resolve => "resolve",
        Cancel => "cancel",
    }
}

static TABLE: TransitionTable<OrderStatus, OrderKind> = TransitionTable::new(
    OrderStatus::PendingPayment,
    &[OrderStatus::Completed, OrderStatus::Cancelled],
    &[
        (OrderStatus::PendingPayment, OrderKind::Confirm, OrderStatus::Confirmed),
        (OrderStatus::Confirmed, OrderKind::StartProcessing, OrderStatus::Processing),
        (OrderStatus::Processing, OrderKind::PartiallyFulfill, OrderStatus::PartiallyFulfilled),
        (OrderStatus::Processing, OrderKind::Fulfill, OrderStatus::Fulfilled),
        (OrderStatus::PartiallyFulfilled, OrderKind::Fulfill, OrderStatus::Fulfilled),
        (OrderStatus::Fulfilled, OrderKind::Complete, OrderStatus::Completed),
        (OrderStatus::Processing, OrderKind::Dispute, OrderStatus::Disputed),
        (OrderStatus::PartiallyFulfilled, OrderKind::Dispute, OrderStatus::Disputed),
        (OrderStatus::Fulfilled, OrderKind::Dispute, OrderStatus::Disputed),
        (OrderStatus::Disputed, OrderKind::Resume, OrderStatus::Processing),
        (OrderStatus::Disputed, OrderKind::Resolve, OrderStatus::Completed),
        (OrderStatus::Disputed, OrderKind::Cancel, OrderStatus::Cancelled),
        (OrderStatus::PendingPayment, OrderKind::Cancel, OrderStatus::Cancelled),
        (OrderStatus::Confirmed, OrderKind::Cancel, OrderStatus::Cancelled),
    ],
);

/// A buyer's order, split across one vendor order per supplier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    id: AggregateId,
    status: OrderStatus,
    reference_number: Option<String>,
    pub buyer_id: PartyId,
    pub rfq_id: Option<AggregateId>,
    pub total: Money,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(buyer_id: PartyId) -> Self {
        Self {
            id: AggregateId::new(),
            status: OrderStatus::PendingPayment,
            reference_number: None,
            buyer_id,
            rfq_id: None,
            total: Money::zero(),
            created_at: Utc::now(),
        }
    }

    /// Links the order to the RFQ it was placed from.
    pub fn with_rfq(mut self, rfq_id: AggregateId) -> Self {
        self.rfq_id = Some(rfq_id);
        self
    }

    pub fn with_total(mut self, total: Money) -> Self {
        self.total = total;
        self
    }
}

impl Aggregate for Order {
    type Status = OrderStatus;
    type Kind = OrderKind;

    const AGGREGATE_TYPE: AggregateType = AggregateType::Order;

    fn id(&self) -> AggregateId {
        self.id
    }

    fn status(&self) -> OrderStatus {
        self.status
    }

    fn set_status(&mut self, status: OrderStatus) {
        self.status = status;
    }

    fn table() -> &'static TransitionTable<OrderStatus, OrderKind> {
        &TABLE
    }

    fn event_type(kind: OrderKind) -> Option<&'static str> {
        Some(match kind {
            OrderKind::Confirm => "order.confirmed",
            OrderKind::StartProcessing => "order.processing",
            OrderKind::PartiallyFulfill => "order.partially_fulfilled",
            OrderKind::Fulfill => "order.fulfilled",
            OrderKind::Complete => "order.completed",
            OrderKind::Dispute => "order.disputed",
            OrderKind::Resume => "order.resumed",
            OrderKind::Resolve => "order.dispute_resolved",
            OrderKind::Cancel => "order.cancelled",
        })
    }

    fn guards(kind: OrderKind) -> &'static [&'static dyn Guard<Self>] {
        match kind {
            OrderKind::Dispute => &[&RequiresReason],
            OrderKind::Cancel => &[&ReasonWhenDisputed],
            _ => &[],
        }
    }

    fn owner_id(&self) -> Option<PartyId> {
        Some(self.buyer_id)
    }

    fn reference_prefix() -> Option<&'static str> {
        Some("ORD")
    }

    fn reference_number(&self) -> Option<&str> {
        self.reference_number.as_deref()
    }

    fn set_reference_number(&mut self, reference: String) {
        self.reference_number = Some(reference);
    }

    fn event_data(&self) -> serde_json::Value {
        serde_json::json!({
            "buyer_id": self.buyer_id,
            "rfq_id": self.rfq_id,
            "total_cents": self.total.cents(),
        })
    }
}

struct ReasonWhenDisputed;

#[async_trait]
impl Guard<Order> for ReasonWhenDisputed {
    fn name(&self) -> &'static str {
        "reason_when_disputed"
    }

    async fn check(&self, ctx: &mut GuardContext<'_, Order>) -> Result<(), DomainError> {
        if ctx.from == OrderStatus::Disputed {
            return Guard::<Order>::check(&RequiresReason, ctx).await;
        }
        Ok(())
    }
}
