//! Request for quote.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, AggregateType, PartyId};
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::error::DomainError;
use crate::guard::{Guard, GuardContext, RequiresReason};
use crate::lifecycle::{Lifecycle, lifecycle_enum};
use crate::table::TransitionTable;
use crate::value_objects::LineItem;

use super::quote::{Quote, QuoteKind, QuoteStatus};

lifecycle_enum! {
    /// RFQ lifecycle:
    /// ```text
    /// DRAFT ─► PUBLISHED ─► BIDDING_OPEN ─► BIDDING_CLOSED ─► EVALUATION ─► AWARDED ─► COMPLETED
    ///   └──────────┴─────────────┴───────────────┴──────────────┴────────────┴──► CANCELLED
    /// ```
    pub enum RfqStatus {
        Draft => "DRAFT",
        Published => "PUBLISHED",
        BiddingOpen => "BIDDING_OPEN",
        BiddingClosed => "BIDDING_CLOSED",
        Evaluation => "EVALUATION",
        Awarded => "AWARDED",
        Completed => "COMPLETED",
        Cancelled => "CANCELLED",
    }
}

lifecycle_enum! {
    pub enum RfqKind {
        Publish => "publish",
        OpenBidding => "open_bidding",
        CloseBidding => "close_bidding",
        StartEvaluation => "start_evaluation",
        Award => "award",
        Complete => "complete",
        Cancel => "cancel",
    }
}

static TABLE: TransitionTable<RfqStatus, RfqKind> = TransitionTable::new(
    RfqStatus::Draft,
    &[RfqStatus::Completed, RfqStatus::Cancelled],
    &[
        (RfqStatus::Draft, RfqKind::Publish, RfqStatus::Published),
        (RfqStatus::Published, RfqKind::OpenBidding, RfqStatus::BiddingOpen),
        (RfqStatus::BiddingOpen, RfqKind::CloseBidding, RfqStatus::BiddingClosed),
        (RfqStatus::BiddingClosed, RfqKind::StartEvaluation, RfqStatus::Evaluation),
        (RfqStatus::Evaluation, RfqKind::Award, RfqStatus::Awarded),
        (RfqStatus::Awarded, RfqKind::Complete, RfqStatus::Completed),
        (RfqStatus::Draft, RfqKind::Cancel, RfqStatus::Cancelled),
        (RfqStatus::Published, RfqKind::Cancel, RfqStatus::Cancelled),
        (RfqStatus::BiddingOpen, RfqKind::Cancel, RfqStatus::Cancelled),
        (RfqStatus::BiddingClosed, RfqKind::Cancel, RfqStatus::Cancelled),
        (RfqStatus::Evaluation, RfqKind::Cancel, RfqStatus::Cancelled),
        (RfqStatus::Awarded, RfqKind::Cancel, RfqStatus::Cancelled),
    ],
);

/// Response state of a supplier invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierInvitation {
    pub supplier_id: PartyId,
    pub status: InvitationStatus,
    pub invited_at: DateTime<Utc>,
}

/// A buyer's request for suppliers to quote on a set of lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rfq {
    id: AggregateId,
    status: RfqStatus,
    pub buyer_id: PartyId,
    pub title: String,
    pub line_items: Vec<LineItem>,
    pub bidding_deadline: Option<DateTime<Utc>>,
    pub invitations: Vec<SupplierInvitation>,
    pub awarded_quote_id: Option<AggregateId>,
    pub awarded_supplier_id: Option<PartyId>,
    pub awarded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Rfq {
    /// Creates a DRAFT RFQ.
    pub fn new(buyer_id: PartyId, title: impl Into<String>) -> Self {
        Self {
            id: AggregateId::new(),
            status: RfqStatus::Draft,
            buyer_id,
            title: title.into(),
            line_items: Vec::new(),
            bidding_deadline: None,
            invitations: Vec::new(),
            awarded_quote_id: None,
            awarded_supplier_id: None,
            awarded_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_line_item(mut self, item: LineItem) -> Self {
        self.line_items.push(item);
        self
    }

    pub fn with_bidding_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.bidding_deadline = Some(deadline);
        self
    }

    pub fn with_invitation(mut self, supplier_id: PartyId) -> Self {
        self.invite(supplier_id);
        self
    }

    /// Invites a supplier. Inviting twice is a no-op.
    pub fn invite(&mut self, supplier_id: PartyId) {
        if self.invitation(supplier_id).is_none() {
            self.invitations.push(SupplierInvitation {
                supplier_id,
                status: InvitationStatus::Pending,
                invited_at: Utc::now(),
            });
        }
    }

    /// Records a supplier's answer to its invitation.
    pub fn respond_to_invitation(&mut self, supplier_id: PartyId, accept: bool) -> Result<(), DomainError> {
        let invitation = self
            .invitations
            .iter_mut()
            .find(|i| i.supplier_id == supplier_id)
            .ok_or_else(|| {
                DomainError::InvalidArgument(format!("supplier {supplier_id} was not invited"))
            })?;
        invitation.status = if accept {
            InvitationStatus::Accepted
        } else {
            InvitationStatus::Declined
        };
        Ok(())
    }

    pub fn invitation(&self, supplier_id: PartyId) -> Option<&SupplierInvitation> {
        self.invitations.iter().find(|i| i.supplier_id == supplier_id)
    }
}

impl Aggregate for Rfq {
    type Status = RfqStatus;
    type Kind = RfqKind;

    const AGGREGATE_TYPE: AggregateType = AggregateType::Rfq;

    fn id(&self) -> AggregateId {
        self.id
    }

    fn status(&self) -> RfqStatus {
        self.status
    }

    fn set_status(&mut self, status: RfqStatus) {
        self.status = status;
    }

    fn table() -> &'static TransitionTable<RfqStatus, RfqKind> {
        &TABLE
    }

    fn event_type(kind: RfqKind) -> Option<&'static str> {
        match kind {
            RfqKind::Publish => Some("rfq.published"),
            RfqKind::OpenBidding => Some("rfq.bidding_opened"),
            RfqKind::CloseBidding => Some("rfq.bidding_closed"),
            RfqKind::StartEvaluation => None,
            RfqKind::Award => Some("rfq.awarded"),
            RfqKind::Complete => Some("rfq.completed"),
            RfqKind::Cancel => Some("rfq.cancelled"),
        }
    }

    fn guards(kind: RfqKind) -> &'static [&'static dyn Guard<Self>] {
        match kind {
            RfqKind::Publish => PUBLISH_GUARDS,
            RfqKind::OpenBidding => &[&BiddingDeadlineInFuture],
            RfqKind::Award => &[&AwardQuote],
            RfqKind::Cancel => &[&ReasonWhenAwarded],
            _ => &[],
        }
    }

    fn owner_id(&self) -> Option<PartyId> {
        Some(self.buyer_id)
    }

    /// Lines, deadline and invitations stay editable until bidding closes.
    fn is_editable(&self) -> bool {
        matches!(
            self.status,
            RfqStatus::Draft | RfqStatus::Published | RfqStatus::BiddingOpen
        )
    }

    fn event_data(&self) -> serde_json::Value {
        serde_json::json!({
            "buyer_id": self.buyer_id,
            "title": self.title,
            "awarded_quote_id": self.awarded_quote_id,
            "awarded_supplier_id": self.awarded_supplier_id,
        })
    }
}

const PUBLISH_GUARDS: &[&dyn Guard<Rfq>] =
    &[&HasLineItems, &BiddingDeadlineInFuture, &HasSupplierInvitations];

struct HasLineItems;

#[async_trait]
impl Guard<Rfq> for HasLineItems {
    fn name(&self) -> &'static str {
        "has_line_items"
    }

    async fn check(&self, ctx: &mut GuardContext<'_, Rfq>) -> Result<(), DomainError> {
        if ctx.aggregate.line_items.is_empty() {
            return Err(DomainError::guard(self.name(), "RFQ has no line items"));
        }
        Ok(())
    }
}

struct BiddingDeadlineInFuture;

#[async_trait]
impl Guard<Rfq> for BiddingDeadlineInFuture {
    fn name(&self) -> &'static str {
        "bidding_deadline_in_future"
    }

    async fn check(&self, ctx: &mut GuardContext<'_, Rfq>) -> Result<(), DomainError> {
        match ctx.aggregate.bidding_deadline {
            Some(deadline) if deadline > ctx.now => Ok(()),
            Some(deadline) => Err(DomainError::guard(
                self.name(),
                format!("bidding deadline {deadline} has passed"),
            )),
            None => Err(DomainError::guard(self.name(), "no bidding deadline set")),
        }
    }
}

struct HasSupplierInvitations;

#[async_trait]
impl Guard<Rfq> for HasSupplierInvitations {
    fn name(&self) -> &'static str {
        "has_supplier_invitations"
    }

    async fn check(&self, ctx: &mut GuardContext<'_, Rfq>) -> Result<(), DomainError> {
        if ctx.aggregate.invitations.is_empty() {
            return Err(DomainError::guard(self.name(), "no suppliers invited"));
        }
        Ok(())
    }
}

/// Checks the `quote_id` argument, stamps the award on the RFQ and moves the
/// quote to AWARDED in the same unit.
struct AwardQuote;

#[async_trait]
impl Guard<Rfq> for AwardQuote {
    fn name(&self) -> &'static str {
        "award_quote"
    }

    async fn check(&self, ctx: &mut GuardContext<'_, Rfq>) -> Result<(), DomainError> {
        let quote_id = ctx.metadata_id(self.name(), "quote_id")?;
        let quote: Quote = ctx.lock_related(quote_id).await?;

        if quote.rfq_id != ctx.aggregate.id() {
            return Err(DomainError::guard(
                self.name(),
                format!("quote {quote_id} belongs to another RFQ"),
            ));
        }
        if quote.status() != QuoteStatus::Submitted {
            return Err(DomainError::guard(
                self.name(),
                format!("quote {quote_id} is {}, expected SUBMITTED", quote.status()),
            ));
        }

        ctx.aggregate.awarded_quote_id = Some(quote_id);
        ctx.aggregate.awarded_supplier_id = Some(quote.supplier_id);
        ctx.aggregate.awarded_at = Some(ctx.now);
        ctx.couple(AggregateType::Quote, quote_id, QuoteKind::Award.as_str());
        Ok(())
    }
}

struct ReasonWhenAwarded;

#[async_trait]
impl Guard<Rfq> for ReasonWhenAwarded {
    fn name(&self) -> &'static str {
        "reason_when_awarded"
    }

    async fn check(&self, ctx: &mut GuardContext<'_, Rfq>) -> Result<(), DomainError> {
        if ctx.from == RfqStatus::Awarded {
            return Guard::<Rfq>::check(&RequiresReason, ctx).await;
        }
        Ok(())
    }
}
