//! Supplier invoices.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, AggregateType, PartyId};
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::error::DomainError;
use crate::guard::{Guard, GuardContext, RequiresReason};
use crate::lifecycle::lifecycle_enum;
use crate::table::TransitionTable;
use crate::value_objects::{Money, PricedLine};

lifecycle_enum! {
    pub enum InvoiceStatus {
        Draft => "DRAFT",
        Ready => "READY",
        Sent => "SENT",
        Acknowledged => "ACKNOWLEDGED",
        Disputed => "DISPUTED",
        Paid => "PAID",
        Cancelled => "CANCELLED",
        CreditNote => "CREDIT_NOTE",
    }
}

lifecycle_enum! {
    pub enum InvoiceKind {
        Finalize => "finalize",
        Send => "send",
        Acknowledge => "acknowledge",
        Dispute => "dispute",
        Pay => "pay",
        IssueCreditNote => "issue_credit_note",
        Cancel => "cancel",
    }
}

use InvoiceKind as K;
use InvoiceStatus as S;

static TABLE: TransitionTable<InvoiceStatus, InvoiceKind> = TransitionTable::new(
    S::Draft,
    &[S::Paid, S::Cancelled, S::CreditNote],
    &[
        (S::Draft, K::Finalize, S::Ready),
        (S::Ready, K::Send, S::Sent),
        (S::Sent, K::Acknowledge, S::Acknowledged),
        (S::Sent, K::Dispute, S::Disputed),
        (S::Sent, K::Cancel, S::Cancelled),
        (S::Acknowledged, K::Pay, S::Paid),
        (S::Acknowledged, K::Dispute, S::Disputed),
        (S::Disputed, K::Acknowledge, S::Acknowledged),
        (S::Disputed, K::IssueCreditNote, S::CreditNote),
        (S::Disputed, K::Cancel, S::Cancelled),
    ],
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    id: AggregateId,
    status: InvoiceStatus,
    reference_number: Option<String>,
    pub order_id: AggregateId,
    pub supplier_id: PartyId,
    pub lines: Vec<PricedLine>,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    pub fn new(order_id: AggregateId, supplier_id: PartyId) -> Self {
        Self {
            id: AggregateId::new(),
            status: InvoiceStatus::Draft,
            reference_number: None,
            order_id,
            supplier_id,
            lines: Vec::new(),
            due_date: None,
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

impl Aggregate for Invoice {
    type Status = InvoiceStatus;
    type Kind = InvoiceKind;

    const AGGREGATE_TYPE: AggregateType = AggregateType::Invoice;

    fn id(&self) -> AggregateId {
        self.id
    }

    fn status(&self) -> InvoiceStatus {
        self.status
    }

    fn set_status(&mut self, status: InvoiceStatus) {
        self.status = status;
    }

    fn table() -> &'static TransitionTable<InvoiceStatus, InvoiceKind> {
        &TABLE
    }

    fn event_type(kind: InvoiceKind) -> Option<&'static str> {
        match kind {
            K::Finalize => None,
            K::Send => Some("invoice.sent"),
            K::Acknowledge => Some("invoice.acknowledged"),
            K::Dispute => Some("invoice.disputed"),
            K::Pay => Some("invoice.paid"),
            K::IssueCreditNote => Some("invoice.credit_note_issued"),
            K::Cancel => Some("invoice.cancelled"),
        }
    }

    fn guards(kind: InvoiceKind) -> &'static [&'static dyn Guard<Self>] {
        match kind {
            K::Finalize => &[&HasPositiveTotal],
            K::Dispute | K::IssueCreditNote | K::Cancel => &[&RequiresReason],
            _ => &[],
        }
    }

    fn parent_id(&self) -> Option<AggregateId> {
        Some(self.order_id)
    }

    fn owner_id(&self) -> Option<PartyId> {
        Some(self.supplier_id)
    }

    fn reference_prefix() -> Option<&'static str> {
        Some("INV")
    }

    fn reference_number(&self) -> Option<&str> {
        self.reference_number.as_deref()
    }

    fn set_reference_number(&mut self, reference: String) {
        self.reference_number = Some(reference);
    }

    fn is_editable(&self) -> bool {
        self.status == S::Draft
    }

    fn event_data(&self) -> serde_json::Value {
        serde_json::json!({
            "order_id": self.order_id,
            "supplier_id": self.supplier_id,
            "total_cents": self.total().cents(),
            "due_date": self.due_date,
        })
    }
}

struct HasPositiveTotal;

#[async_trait]
impl Guard<Invoice> for HasPositiveTotal {
    fn name(&self) -> &'static str {
        "has_positive_total"
    }

    async fn check(&self, ctx: &mut GuardContext<'_, Invoice>) -> Result<(), DomainError> {
        if ctx.aggregate.lines.is_empty() {
            return Err(DomainError::guard(self.name(), "invoice has no lines"));
        }
        let total = ctx.aggregate.total();
        if !total.is_positive() {
            return Err(DomainError::guard(
                self.name(),
                format!("invoice total {total} is not positive"),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credit_note_only_from_dispute() {
        assert_eq!(TABLE.next(S::Disputed, K::IssueCreditNote), Some(S::CreditNote));
        assert_eq!(TABLE.next(S::Sent, K::IssueCreditNote), None);
        assert_eq!(TABLE.next(S::Ready, K::Cancel), None);
    }

    #[test]
    fn finalize_emits_nothing() {
        assert_eq!(Invoice::event_type(K::Finalize), None);
        assert_eq!(Invoice::event_type(K::Pay), Some("invoice.paid"));
    }
}
