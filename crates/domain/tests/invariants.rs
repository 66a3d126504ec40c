//! Engine invariants checked across every aggregate type.

mod support;

use std::sync::Arc;
use std::time::Duration;

use common::{AggregateId, AggregateType, PartyId};
use domain::{
    Aggregate, Delivery, DeliveryKind, Dispute, DisputeKind, DisputeStatus, DomainError,
    Fulfillment, FulfillmentLine, InMemorySupplierDirectory, Invoice, InvoiceKind, InvoiceStatus,
    Lifecycle, LineItem, Money, Order, PricedLine, Quote, Rfq, StateMachineEngine,
    TransitionEventPayload, TransitionRequest, VendorOrder, format_reference,
};
use store::{InMemoryStore, OutboxQuery, OutboxStatus, OutboxStore};
use support::harness;

/// For every `(status, kind)` pair missing from `A`'s table, places an
/// aggregate in that status and checks the transition is refused without
/// writes.
async fn assert_absent_pairs_rejected<A: Aggregate>(make: impl Fn() -> A) {
    let store = InMemoryStore::new();
    let engine = StateMachineEngine::new(store.clone(), Arc::new(InMemorySupplierDirectory::new()));

    for status in <A::Status as Lifecycle>::ALL {
        for kind in <A::Kind as Lifecycle>::ALL {
            if A::table().next(*status, *kind).is_some() {
                continue;
            }

            let mut aggregate = make();
            aggregate.set_status(*status);
            store.force_put(aggregate.to_record().unwrap()).await;
            let transitions = store.transition_count().await;
            let events = store.outbox_count().await;

            let request = TransitionRequest::system(aggregate.id(), *kind)
                .with_reason("checking the table")
                .with_metadata("quote_id", AggregateId::new().to_string());
            let err = engine.transition::<A>(request).await.unwrap_err();
            assert!(
                matches!(err, DomainError::InvalidTransition { .. }),
                "{} {status} -{kind}-> gave {err}",
                A::AGGREGATE_TYPE
            );

            let stored: A = engine.load(aggregate.id()).await.unwrap();
            assert_eq!(stored.status(), *status);
            assert_eq!(store.transition_count().await, transitions);
            assert_eq!(store.outbox_count().await, events);
        }
    }
}

mod tables {
    use super::*;

    #[tokio::test]
    async fn absent_pairs_are_invalid_for_every_type() {
        assert_absent_pairs_rejected(|| Rfq::new(PartyId::new(), "RFQ")).await;
        assert_absent_pairs_rejected(|| Quote::new(AggregateId::new(), PartyId::new())).await;
        assert_absent_pairs_rejected(|| Order::new(PartyId::new())).await;
        assert_absent_pairs_rejected(|| VendorOrder::new(AggregateId::new(), PartyId::new())).await;
        assert_absent_pairs_rejected(|| {
            Fulfillment::new(AggregateId::new(), vec![FulfillmentLine::new("L1", 1)])
        })
        .await;
        assert_absent_pairs_rejected(|| Delivery::new(AggregateId::new())).await;
        assert_absent_pairs_rejected(|| Dispute::new(AggregateId::new(), PartyId::new(), "late"))
            .await;
        assert_absent_pairs_rejected(|| Invoice::new(AggregateId::new(), PartyId::new())).await;
    }

    #[tokio::test]
    async fn terminal_invoice_accepts_nothing() {
        let h = harness();
        let invoice = h
            .engine
            .create(
                Invoice::new(AggregateId::new(), PartyId::new())
                    .with_line(PricedLine::new("L1", 2, Money::from_dollars(50))),
            )
            .await
            .unwrap();
        for kind in [
            InvoiceKind::Finalize,
            InvoiceKind::Send,
            InvoiceKind::Acknowledge,
            InvoiceKind::Pay,
        ] {
            h.engine
                .transition::<Invoice>(h.request(invoice.id(), kind))
                .await
                .unwrap();
        }

        for kind in InvoiceKind::ALL {
            let err = h
                .engine
                .transition::<Invoice>(h.request(invoice.id(), *kind).with_reason("late"))
                .await
                .unwrap_err();
            match err {
                DomainError::InvalidTransition { from, allowed, .. } => {
                    assert_eq!(from, "PAID");
                    assert!(allowed.is_empty());
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[tokio::test]
    async fn missing_aggregate_is_not_found() {
        let h = harness();
        let err = h
            .engine
            .transition::<Order>(h.request(AggregateId::new(), domain::OrderKind::Confirm))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound { aggregate_type: AggregateType::Order, .. }));
    }
}

mod audit_and_outbox {
    use super::*;

    #[tokio::test]
    async fn one_event_per_mapped_kind() {
        let h = harness();
        let dispute = h
            .engine
            .create(Dispute::new(AggregateId::new(), PartyId::new(), "Short shipment"))
            .await
            .unwrap();

        let path = [
            DisputeKind::StartReview,
            DisputeKind::RequestSupplierInfo,
            DisputeKind::SupplierResponded,
            DisputeKind::Escalate,
            DisputeKind::Resolve,
            DisputeKind::Close,
        ];
        for kind in path {
            let before = h.store.outbox_count().await;
            let outcome = h
                .engine
                .transition::<Dispute>(h.request(dispute.id(), kind).with_reason("per review"))
                .await
                .unwrap();
            let written = h.store.outbox_count().await - before;

            match Dispute::event_type(kind) {
                Some(event_type) => {
                    assert_eq!(written, 1, "{kind}");
                    let event_id = outcome.event_id.unwrap();
                    let event = h.store.get_event(event_id).await.unwrap().unwrap();
                    assert_eq!(event.event_type, event_type);
                    assert_eq!(event.aggregate_id, dispute.id());
                    assert_eq!(event.aggregate_type, AggregateType::Dispute);
                    assert_eq!(event.status, OutboxStatus::Pending);
                    assert_eq!(event.schema_version, 1);
                }
                None => {
                    assert_eq!(written, 0, "{kind}");
                    assert!(outcome.event_id.is_none());
                }
            }
        }

        let history = h.engine.history(dispute.id()).await.unwrap();
        assert_eq!(history.len(), path.len());
    }

    #[tokio::test]
    async fn payload_snapshots_the_transition() {
        let h = harness();
        let delivery = h
            .engine
            .create(Delivery::new(AggregateId::new()).with_carrier("Maersk", "MSKU1234567"))
            .await
            .unwrap();
        h.engine
            .transition::<Delivery>(h.request(delivery.id(), DeliveryKind::Dispatch))
            .await
            .unwrap();

        let events = h
            .store
            .query_events(OutboxQuery::for_aggregate(delivery.id()))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        let payload: TransitionEventPayload = serde_json::from_value(events[0].payload.clone()).unwrap();
        assert_eq!(payload.from_status, "PENDING");
        assert_eq!(payload.to_status, "DISPATCHED");
        assert_eq!(payload.transition_kind, "dispatch");
        assert_eq!(payload.actor_id, Some(h.actor));
        assert_eq!(payload.reference_number.as_deref(), delivery.reference_number());
        assert_eq!(payload.data["tracking_number"], "MSKU1234567");
    }

    #[tokio::test]
    async fn history_chains_statuses_in_sequence_order() {
        let h = harness();
        let delivery = h.engine.create(Delivery::new(AggregateId::new())).await.unwrap();
        for kind in [
            DeliveryKind::Dispatch,
            DeliveryKind::Depart,
            DeliveryKind::Arrive,
            DeliveryKind::Deliver,
            DeliveryKind::Accept,
        ] {
            h.engine
                .transition::<Delivery>(h.request(delivery.id(), kind))
                .await
                .unwrap();
        }

        let history = h.engine.history(delivery.id()).await.unwrap();
        assert_eq!(history.first().unwrap().from_status, "PENDING");
        assert_eq!(history.last().unwrap().to_status, "ACCEPTED");
        for pair in history.windows(2) {
            assert_eq!(pair[0].to_status, pair[1].from_status);
            assert!(pair[0].sequence < pair[1].sequence);
        }
    }

    #[tokio::test]
    async fn dispute_resolution_is_stamped() {
        let h = harness();
        let dispute = h
            .engine
            .create(Dispute::new(AggregateId::new(), PartyId::new(), "Wrong grade"))
            .await
            .unwrap();
        h.engine
            .transition::<Dispute>(h.request(dispute.id(), DisputeKind::StartReview))
            .await
            .unwrap();

        let err = h
            .engine
            .transition::<Dispute>(h.request(dispute.id(), DisputeKind::Resolve))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::GuardFailed { guard: "stamp_resolution", .. }));

        h.engine
            .transition::<Dispute>(
                h.request(dispute.id(), DisputeKind::Resolve).with_reason("supplier replaces batch"),
            )
            .await
            .unwrap();
        let dispute: Dispute = h.engine.load(dispute.id()).await.unwrap();
        assert_eq!(dispute.status(), DisputeStatus::Resolved);
        assert_eq!(dispute.resolution.as_deref(), Some("supplier replaces batch"));
        assert!(dispute.resolved_at.is_some());
    }
}

mod creation_and_edits {
    use super::*;

    #[tokio::test]
    async fn reference_numbers_count_up_per_prefix() {
        let h = harness();
        let year = chrono::Datelike::year(&chrono::Utc::now());

        let first = h.engine.create(Order::new(PartyId::new())).await.unwrap();
        let second = h.engine.create(Order::new(PartyId::new())).await.unwrap();
        let invoice = h
            .engine
            .create(Invoice::new(first.id(), PartyId::new()))
            .await
            .unwrap();

        assert_eq!(first.reference_number(), Some(format_reference("ORD", year, 1).as_str()));
        assert_eq!(second.reference_number(), Some(format_reference("ORD", year, 2).as_str()));
        assert_eq!(invoice.reference_number(), Some(format_reference("INV", year, 1).as_str()));
    }

    #[tokio::test]
    async fn creation_must_start_in_the_initial_status() {
        let h = harness();
        let mut order = Order::new(PartyId::new());
        order.set_status(domain::OrderStatus::Confirmed);

        let err = h.engine.create(order).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument(_)));
        assert_eq!(h.store.aggregate_count().await, 0);
    }

    #[tokio::test]
    async fn creation_emits_no_event() {
        let h = harness();
        h.engine.create(Order::new(PartyId::new())).await.unwrap();
        assert_eq!(h.store.outbox_count().await, 0);
        assert_eq!(h.store.transition_count().await, 0);
    }

    #[tokio::test]
    async fn modify_edits_fields_until_frozen() {
        let h = harness();
        let invoice = h
            .engine
            .create(Invoice::new(AggregateId::new(), PartyId::new()))
            .await
            .unwrap();

        let err = h
            .engine
            .transition::<Invoice>(h.request(invoice.id(), InvoiceKind::Finalize))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::GuardFailed { guard: "has_positive_total", .. }));

        let edited = h
            .engine
            .modify::<Invoice, _>(invoice.id(), |invoice| {
                invoice.lines.push(PricedLine::new("L1", 3, Money::from_dollars(20)));
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(edited.total().cents(), 6000);

        h.engine
            .transition::<Invoice>(h.request(invoice.id(), InvoiceKind::Finalize))
            .await
            .unwrap();

        let err = h
            .engine
            .modify::<Invoice, _>(invoice.id(), |invoice| {
                invoice.lines.clear();
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotEditable { .. }));

        let invoice: Invoice = h.engine.load(invoice.id()).await.unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Ready);
        assert_eq!(invoice.lines.len(), 1);
    }

    #[tokio::test]
    async fn modify_cannot_change_status() {
        let h = harness();
        let rfq = h
            .engine
            .create(Rfq::new(PartyId::new(), "Gravel").with_line_item(LineItem::new("L1", "Gravel", 9)))
            .await
            .unwrap();

        let err = h
            .engine
            .modify::<Rfq, _>(rfq.id(), |rfq| {
                rfq.set_status(domain::RfqStatus::Completed);
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument(_)));

        let rfq: Rfq = h.engine.load(rfq.id()).await.unwrap();
        assert_eq!(rfq.status(), domain::RfqStatus::Draft);
    }
}

mod contention {
    use super::*;

    #[tokio::test]
    async fn lock_timeout_surfaces_as_conflict() {
        let store = InMemoryStore::new().with_lock_timeout(Duration::from_millis(20));
        let engine = StateMachineEngine::new(store.clone(), Arc::new(InMemorySupplierDirectory::new()));
        let order = engine.create(Order::new(PartyId::new())).await.unwrap();

        let held = store_begin(&store).await;
        let err = engine
            .transition::<Order>(TransitionRequest::system(order.id(), domain::OrderKind::Confirm))
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "{err}");
        drop(held);

        engine
            .transition::<Order>(TransitionRequest::system(order.id(), domain::OrderKind::Confirm))
            .await
            .unwrap();
    }

    async fn store_begin(store: &InMemoryStore) -> Box<dyn store::StoreTransaction> {
        store::Store::begin(store).await.unwrap()
    }
}
