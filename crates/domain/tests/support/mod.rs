//! Fixtures shared by the domain integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{ActorId, AggregateId, PartyId};
use domain::{
    Aggregate, InMemorySupplierDirectory, LineItem, Money, Order, OrderKind, OrderLine, PricedLine,
    Quote, QuoteKind, Rfq, RfqKind, StateMachineEngine, SupplierTier, TransitionRequest,
    VendorOrder, VendorOrderKind,
};
use store::InMemoryStore;

pub struct Harness {
    pub engine: Arc<StateMachineEngine<InMemoryStore>>,
    pub store: InMemoryStore,
    pub suppliers: InMemorySupplierDirectory,
    pub actor: ActorId,
}

pub fn harness() -> Harness {
    let store = InMemoryStore::new();
    let suppliers = InMemorySupplierDirectory::new();
    let engine = StateMachineEngine::new(store.clone(), Arc::new(suppliers.clone()));
    Harness {
        engine: Arc::new(engine),
        store,
        suppliers,
        actor: ActorId::new(),
    }
}

impl Harness {
    pub fn request<K>(&self, id: AggregateId, kind: K) -> TransitionRequest<K> {
        TransitionRequest::by_user(self.actor, id, kind)
    }

    /// Registers a supplier at `tier`.
    pub async fn supplier(&self, tier: SupplierTier) -> PartyId {
        let supplier = PartyId::new();
        self.suppliers.set_tier(supplier, tier).await;
        supplier
    }

    /// An RFQ in BIDDING_OPEN whose every supplier accepted its invitation.
    pub async fn open_rfq(&self, suppliers: &[PartyId]) -> Rfq {
        let mut rfq = Rfq::new(PartyId::new(), "Structural steel")
            .with_line_item(LineItem::new("L1", "I-beam 6m", 40))
            .with_bidding_deadline(Utc::now() + Duration::days(7));
        for supplier in suppliers {
            rfq.invite(*supplier);
        }
        let rfq = self.engine.create(rfq).await.unwrap();

        let accepted = suppliers.to_vec();
        self.engine
            .modify::<Rfq, _>(rfq.id(), move |rfq| {
                for supplier in accepted {
                    rfq.respond_to_invitation(supplier, true)?;
                }
                Ok(())
            })
            .await
            .unwrap();

        for kind in [RfqKind::Publish, RfqKind::OpenBidding] {
            self.engine
                .transition::<Rfq>(self.request(rfq.id(), kind))
                .await
                .unwrap();
        }
        self.engine.load(rfq.id()).await.unwrap()
    }

    pub async fn draft_quote(&self, rfq_id: AggregateId, supplier: PartyId) -> Quote {
        let quote = Quote::new(rfq_id, supplier).with_line(PricedLine::new("L1", 40, Money::from_dollars(310)));
        self.engine.create(quote).await.unwrap()
    }

    pub async fn submitted_quote(&self, rfq_id: AggregateId, supplier: PartyId) -> Quote {
        let quote = self.draft_quote(rfq_id, supplier).await;
        self.engine
            .transition::<Quote>(self.request(quote.id(), QuoteKind::Submit))
            .await
            .unwrap();
        self.engine.load(quote.id()).await.unwrap()
    }

    /// Moves an open RFQ to EVALUATION.
    pub async fn close_bidding(&self, rfq_id: AggregateId) {
        for kind in [RfqKind::CloseBidding, RfqKind::StartEvaluation] {
            self.engine
                .transition::<Rfq>(self.request(rfq_id, kind))
                .await
                .unwrap();
        }
    }

    /// An order in PROCESSING.
    pub async fn processing_order(&self) -> Order {
        let order = self
            .engine
            .create(Order::new(PartyId::new()).with_total(Money::from_dollars(12_400)))
            .await
            .unwrap();
        for kind in [OrderKind::Confirm, OrderKind::StartProcessing] {
            self.engine
                .transition::<Order>(self.request(order.id(), kind))
                .await
                .unwrap();
        }
        self.engine.load(order.id()).await.unwrap()
    }

    /// A CONFIRMED vendor order with two lines: 10 x L1 and 4 x L2.
    pub async fn confirmed_vendor_order(&self, order_id: AggregateId) -> VendorOrder {
        let vendor_order = VendorOrder::new(order_id, PartyId::new())
            .with_line(OrderLine::new("L1", "Anchor bolts", 10, Money::from_cents(450)))
            .with_line(OrderLine::new("L2", "Base plates", 4, Money::from_dollars(85)));
        let vendor_order = self.engine.create(vendor_order).await.unwrap();
        self.engine
            .transition::<VendorOrder>(self.request(vendor_order.id(), VendorOrderKind::Confirm))
            .await
            .unwrap();
        self.engine.load(vendor_order.id()).await.unwrap()
    }
}
