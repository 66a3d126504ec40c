//! Disputes raised against an order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, AggregateType, PartyId};
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::error::DomainError;
use crate::guard::{Guard, GuardContext, RequiresReason};
use crate::lifecycle::lifecycle_enum;
use crate::table::TransitionTable;

lifecycle_enum! {
    /// Review may bounce between the parties any number of times:
    /// ```text
    /// OPEN ─► UNDER_REVIEW ◄─► AWAITING_SUPPLIER / AWAITING_BUYER
    ///              │
    ///              ├─► RESOLVED ─► CLOSED
    ///              └─► ESCALATED ─► RESOLVED | CLOSED
    /// ```
    pub enum DisputeStatus {
        Open => "OPEN",
        UnderReview => "UNDER_REVIEW",
        AwaitingSupplier => "AWAITING_SUPPLIER",
        AwaitingBuyer => "AWAITING_BUYER",
        Resolved => "RESOLVED",
        Escalated => "ESCALATED",
        Closed => "CLOSED",
    }
}

lifecycle_enum! {
    pub enum DisputeKind {
        StartReview => "start_review",
        RequestSupplierInfo => "request_supplier_info",
        RequestBuyerInfo => "request_buyer_info",
        SupplierResponded => "supplier_responded",
        BuyerResponded => "buyer_responded",
        Resolve => "resolve",
        Escalate => "escalate",
        Close => "close",
    }
}

use DisputeKind as K;
use DisputeStatus as S;

static TABLE: TransitionTable<DisputeStatus, DisputeKind> = TransitionTable::new(
    S::Open,
    &[S::Closed],
    &[
        (S::Open, K::StartReview, S::UnderReview),
        (S::UnderReview, K::RequestSupplierInfo, S::AwaitingSupplier),
        (S::UnderReview, K::RequestBuyerInfo, S::AwaitingBuyer),
        (S::UnderReview, K::Resolve, S::Resolved),
        (S::UnderReview, K::Escalate, S::Escalated),
        (S::AwaitingSupplier, K::SupplierResponded, S::UnderReview),
        (S::AwaitingBuyer, K::BuyerResponded, S::UnderReview),
        (S::Resolved, K::Close, S::Closed),
        (S::Escalated, K::Resolve, S::Resolved),
        (S::Escalated, K::Close, S::Closed),
    ],
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispute {
    id: AggregateId,
    status: DisputeStatus,
    reference_number: Option<String>,
    pub order_id: AggregateId,
    pub raised_by: PartyId,
    pub subject: String,
    pub resolution: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Dispute {
    pub fn new(order_id: AggregateId, raised_by: PartyId, subject: impl Into<String>) -> Self {
        Self {
            id: AggregateId::new(),
            status: DisputeStatus::Open,
            reference_number: None,
            order_id,
            raised_by,
            subject: subject.into(),
            resolution: None,
            resolved_at: None,
            created_at: Utc::now(),
        }
    }
}

impl Aggregate for Dispute {
    type Status = DisputeStatus;
    type Kind = DisputeKind;

    const AGGREGATE_TYPE: AggregateType = AggregateType::Dispute;

    fn id(&self) -> AggregateId {
        self.id
    }

    fn status(&self) -> DisputeStatus {
        self.status
    }

    fn set_status(&mut self, status: DisputeStatus) {
        self.status = status;
    }

    fn table() -> &'static TransitionTable<DisputeStatus, DisputeKind> {
        &TABLE
    }

    fn event_type(kind: DisputeKind) -> Option<&'static str> {
        match kind {
            K::StartReview => Some("dispute.review_started"),
            K::RequestSupplierInfo => Some("dispute.supplier_info_requested"),
            K::RequestBuyerInfo => Some("dispute.buyer_info_requested"),
            K::Resolve => Some("dispute.resolved"),
            K::Escalate => Some("dispute.escalated"),
            K::Close => Some("dispute.closed"),
            K::SupplierResponded | K::BuyerResponded => None,
        }
    }

    fn guards(kind: DisputeKind) -> &'static [&'static dyn Guard<Self>] {
        match kind {
            K::Escalate => &[&RequiresReason],
            K::Resolve => &[&StampResolution],
            _ => &[],
        }
    }

    fn parent_id(&self) -> Option<AggregateId> {
        Some(self.order_id)
    }

    fn reference_prefix() -> Option<&'static str> {
        Some("DSP")
    }

    fn reference_number(&self) -> Option<&str> {
        self.reference_number.as_deref()
    }

    fn set_reference_number(&mut self, reference: String) {
        self.reference_number = Some(reference);
    }

    fn event_data(&self) -> serde_json::Value {
        serde_json::json!({
            "order_id": self.order_id,
            "raised_by": self.raised_by,
            "subject": self.subject,
            "resolution": self.resolution,
        })
    }
}

/// A resolution must be explained; the explanation becomes the dispute's
/// recorded resolution.
struct StampResolution;

#[async_trait]
impl Guard<Dispute> for StampResolution {
    fn name(&self) -> &'static str {
        "stamp_resolution"
    }

    async fn check(&self, ctx: &mut GuardContext<'_, Dispute>) -> Result<(), DomainError> {
        let resolution = ctx
            .request
            .non_empty_reason()
            .ok_or_else(|| DomainError::guard(self.name(), "a resolution is required"))?
            .to_string();
        ctx.aggregate.resolution = Some(resolution);
        ctx.aggregate.resolved_at = Some(ctx.now);
        Ok(())
    }
}
