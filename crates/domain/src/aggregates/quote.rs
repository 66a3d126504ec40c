//! Supplier quotes against an RFQ.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, AggregateType, PartyId};
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::error::DomainError;
use crate::guard::{COUPLED_FROM, Guard, GuardContext};
use crate::lifecycle::{Lifecycle, lifecycle_enum};
use crate::suppliers::{SupplierDirectory, SupplierTier};
use crate::table::TransitionTable;
use crate::value_objects::{Money, PricedLine};

use super::rfq::{InvitationStatus, Rfq, RfqStatus};

lifecycle_enum! {
    pub enum QuoteStatus {
        Draft => "DRAFT",
        Submitted => "SUBMITTED",
        Awarded => "AWARDED",
        Rejected => "REJECTED",
        Withdrawn => "WITHDRAWN",
        Expired => "EXPIRED",
    }
}

lifecycle_enum! {
    pub enum QuoteKind {
        Submit => "submit",
        Withdraw => "withdraw",
        Award => "award",
        Reject => "reject",
        Expire => "expire",
    }
}

static TABLE: TransitionTable<QuoteStatus, QuoteKind> = TransitionTable::new(
    QuoteStatus::Draft,
    &[
        QuoteStatus::Awarded,
        QuoteStatus::Rejected,
        QuoteStatus::Withdrawn,
        QuoteStatus::Expired,
    ],
    &[
        (QuoteStatus::Draft, QuoteKind::Submit, QuoteStatus::Submitted),
        (QuoteStatus::Draft, QuoteKind::Withdraw, QuoteStatus::Withdrawn),
        (QuoteStatus::Submitted, QuoteKind::Withdraw, QuoteStatus::Withdrawn),
        (QuoteStatus::Submitted, QuoteKind::Award, QuoteStatus::Awarded),
        (QuoteStatus::Submitted, QuoteKind::Reject, QuoteStatus::Rejected),
        (QuoteStatus::Submitted, QuoteKind::Expire, QuoteStatus::Expired),
    ],
);

/// A supplier's priced response to an RFQ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    id: AggregateId,
    status: QuoteStatus,
    pub rfq_id: AggregateId,
    pub supplier_id: PartyId,
    pub lines: Vec<PricedLine>,
    pub valid_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Quote {
    /// Creates a DRAFT quote.
    pub fn new(rfq_id: AggregateId, supplier_id: PartyId) -> Self {
        Self {
            id: AggregateId::new(),
            status: QuoteStatus::Draft,
            rfq_id,
            supplier_id,
            lines: Vec::new(),
            valid_until: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_line(mut self, line: PricedLine) -> Self {
        self.lines.push(line);
        self
    }

    pub fn total(&self) -> Money {
        self.lines.iter().map(PricedLine::total_price).sum()
    }
}

impl Aggregate for Quote {
    type Status = QuoteStatus;
    type Kind = QuoteKind;

    const AGGREGATE_TYPE: AggregateType = AggregateType::Quote;

    fn id(&self) -> AggregateId {
        self.id
    }

    fn status(&self) -> QuoteStatus {
        self.status
    }

    fn set_status(&mut self, status: QuoteStatus) {
        self.status = status;
    }

    fn table() -> &'static TransitionTable<QuoteStatus, QuoteKind> {
        &TABLE
    }

    fn event_type(kind: QuoteKind) -> Option<&'static str> {
        match kind {
            QuoteKind::Submit => Some("quote.submitted"),
            QuoteKind::Award => Some("quote.awarded"),
            QuoteKind::Reject => Some("quote.rejected"),
            QuoteKind::Withdraw => Some("quote.withdrawn"),
            QuoteKind::Expire => None,
        }
    }

    fn guards(kind: QuoteKind) -> &'static [&'static dyn Guard<Self>] {
        match kind {
            QuoteKind::Submit => SUBMIT_GUARDS,
            QuoteKind::Award => &[&AwardedThroughRfq],
            _ => &[],
        }
    }

    fn parent_id(&self) -> Option<AggregateId> {
        Some(self.rfq_id)
    }

    fn owner_id(&self) -> Option<PartyId> {
        Some(self.supplier_id)
    }

    fn is_editable(&self) -> bool {
        self.status == QuoteStatus::Draft
    }

    fn event_data(&self) -> serde_json::Value {
        serde_json::json!({
            "rfq_id": self.rfq_id,
            "supplier_id": self.supplier_id,
            "total_cents": self.total().cents(),
        })
    }
}

const SUBMIT_GUARDS: &[&dyn Guard<Quote>] = &[
    &HasPricedLines,
    &RfqAcceptingBids,
    &InvitationAccepted,
    &TierPermitsBidding,
    &ActiveQuoteCap,
];

struct HasPricedLines;

#[async_trait]
impl Guard<Quote> for HasPricedLines {
    fn name(&self) -> &'static str {
        "has_priced_lines"
    }

    async fn check(&self, ctx: &mut GuardContext<'_, Quote>) -> Result<(), DomainError> {
        if ctx.aggregate.lines.is_empty() {
            return Err(DomainError::guard(self.name(), "quote has no lines"));
        }
        if let Some(line) = ctx.aggregate.lines.iter().find(|l| !l.unit_price.is_positive()) {
            return Err(DomainError::guard(
                self.name(),
                format!("line {} has no price", line.line_id),
            ));
        }
        Ok(())
    }
}

struct RfqAcceptingBids;

#[async_trait]
impl Guard<Quote> for RfqAcceptingBids {
    fn name(&self) -> &'static str {
        "rfq_accepting_bids"
    }

    async fn check(&self, ctx: &mut GuardContext<'_, Quote>) -> Result<(), DomainError> {
        let rfq: Rfq = ctx.read_related(ctx.aggregate.rfq_id).await?;
        if rfq.status() != RfqStatus::BiddingOpen {
            return Err(DomainError::guard(
                self.name(),
                format!("RFQ is {}, expected BIDDING_OPEN", rfq.status()),
            ));
        }
        Ok(())
    }
}

struct InvitationAccepted;

#[async_trait]
impl Guard<Quote> for InvitationAccepted {
    fn name(&self) -> &'static str {
        "invitation_accepted"
    }

    async fn check(&self, ctx: &mut GuardContext<'_, Quote>) -> Result<(), DomainError> {
        let supplier_id = ctx.aggregate.supplier_id;
        let rfq: Rfq = ctx.read_related(ctx.aggregate.rfq_id).await?;
        match rfq.invitation(supplier_id).map(|i| i.status) {
            Some(InvitationStatus::Accepted) => Ok(()),
            Some(status) => Err(DomainError::guard(
                self.name(),
                format!("invitation is {status:?}"),
            )),
            None => Err(DomainError::guard(self.name(), "supplier was not invited")),
        }
    }
}

async fn tier(
    suppliers: &dyn SupplierDirectory,
    supplier_id: PartyId,
    guard: &'static str,
) -> Result<SupplierTier, DomainError> {
    suppliers
        .supplier_tier(supplier_id)
        .await?
        .ok_or_else(|| DomainError::guard(guard, format!("supplier {supplier_id} is not registered")))
}

struct TierPermitsBidding;

#[async_trait]
impl Guard<Quote> for TierPermitsBidding {
    fn name(&self) -> &'static str {
        "tier_permits_bidding"
    }

    async fn check(&self, ctx: &mut GuardContext<'_, Quote>) -> Result<(), DomainError> {
        let tier = tier(ctx.suppliers, ctx.aggregate.supplier_id, self.name()).await?;
        if !tier.can_bid() {
            return Err(DomainError::guard(
                self.name(),
                format!("supplier tier {tier:?} cannot bid"),
            ));
        }
        Ok(())
    }
}

/// Caps the supplier's SUBMITTED quotes across every RFQ on the platform.
struct ActiveQuoteCap;

#[async_trait]
impl Guard<Quote> for ActiveQuoteCap {
    fn name(&self) -> &'static str {
        "active_quote_cap"
    }

    async fn check(&self, ctx: &mut GuardContext<'_, Quote>) -> Result<(), DomainError> {
        let tier = tier(ctx.suppliers, ctx.aggregate.supplier_id, self.name()).await?;
        let Some(cap) = tier.max_active_quotes() else {
            return Ok(());
        };

        // Concurrent submits by one supplier must not all see the old count.
        ctx.tx
            .lock_owner(AggregateType::Quote, ctx.aggregate.supplier_id)
            .await?;
        let active = ctx
            .tx
            .count_owned(
                AggregateType::Quote,
                ctx.aggregate.supplier_id,
                &[QuoteStatus::Submitted.as_str()],
            )
            .await?;
        if active >= cap {
            return Err(DomainError::guard(
                self.name(),
                format!("supplier has {active} active quotes, tier {tier:?} allows {cap}"),
            ));
        }
        Ok(())
    }
}

/// A quote is awarded only as the coupled half of its own RFQ's award.
struct AwardedThroughRfq;

#[async_trait]
impl Guard<Quote> for AwardedThroughRfq {
    fn name(&self) -> &'static str {
        "awarded_through_rfq"
    }

    async fn check(&self, ctx: &mut GuardContext<'_, Quote>) -> Result<(), DomainError> {
        let coupled_from = ctx
            .request
            .metadata
            .get(COUPLED_FROM)
            .and_then(|v| v.as_str());
        if coupled_from != Some(ctx.aggregate.rfq_id.to_string().as_str()) {
            return Err(DomainError::guard(
                self.name(),
                "quotes are awarded through their RFQ",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_sums_lines() {
        let quote = Quote::new(AggregateId::new(), PartyId::new())
            .with_line(PricedLine::new("L1", 2, Money::from_cents(500)))
            .with_line(PricedLine::new("L2", 1, Money::from_cents(250)));
        assert_eq!(quote.total().cents(), 1250);
    }

    #[test]
    fn withdraw_allowed_before_decision() {
        assert_eq!(
            TABLE.next(QuoteStatus::Draft, QuoteKind::Withdraw),
            Some(QuoteStatus::Withdrawn)
        );
        assert_eq!(
            TABLE.next(QuoteStatus::Submitted, QuoteKind::Withdraw),
            Some(QuoteStatus::Withdrawn)
        );
        assert_eq!(TABLE.next(QuoteStatus::Draft, QuoteKind::Award), None);
    }
}
