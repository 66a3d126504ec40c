use std::sync::Arc;

use common::{AggregateId, AggregateType, PartyId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{
    Aggregate, Delivery, DeliveryKind, FulfillmentLine, FulfillmentStatus, InMemorySupplierDirectory,
    Money, Order, OrderKind, OrderLine, OrderStatus, StateMachineEngine, TransitionRequest,
    VendorOrder, VendorOrderKind, describe, vendor_order_status,
};
use store::InMemoryStore;

fn engine() -> StateMachineEngine<InMemoryStore> {
    StateMachineEngine::new(InMemoryStore::new(), Arc::new(InMemorySupplierDirectory::new()))
}

fn bench_table_lookup(c: &mut Criterion) {
    c.bench_function("domain/table_lookup", |b| {
        b.iter(|| Order::table().next(OrderStatus::Processing, OrderKind::PartiallyFulfill));
    });

    c.bench_function("domain/describe_all_tables", |b| {
        b.iter(|| {
            for aggregate_type in AggregateType::ALL {
                describe(aggregate_type);
            }
        });
    });
}

fn bench_rollup_derivation(c: &mut Criterion) {
    let statuses: Vec<FulfillmentStatus> = (0..50)
        .map(|i| {
            if i % 7 == 0 {
                FulfillmentStatus::Cancelled
            } else {
                FulfillmentStatus::Accepted
            }
        })
        .collect();

    c.bench_function("domain/derive_vendor_order_status_50", |b| {
        b.iter(|| vendor_order_status(&statuses));
    });
}

fn bench_create(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = engine();

    c.bench_function("domain/create_order", |b| {
        b.iter(|| {
            rt.block_on(async {
                engine.create(Order::new(PartyId::new())).await.unwrap();
            });
        });
    });
}

fn bench_delivery_lifecycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = engine();

    c.bench_function("domain/delivery_full_lifecycle", |b| {
        b.iter(|| {
            rt.block_on(async {
                let delivery = engine.create(Delivery::new(AggregateId::new())).await.unwrap();
                for kind in [
                    DeliveryKind::Dispatch,
                    DeliveryKind::Depart,
                    DeliveryKind::Arrive,
                    DeliveryKind::Deliver,
                    DeliveryKind::Accept,
                ] {
                    engine
                        .transition::<Delivery>(TransitionRequest::system(delivery.id(), kind))
                        .await
                        .unwrap();
                }
            });
        });
    });
}

fn bench_fulfillment_with_rollup(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = engine();

    c.bench_function("domain/fulfillment_accept_with_rollup", |b| {
        b.iter(|| {
            rt.block_on(async {
                let order = engine.create(Order::new(PartyId::new())).await.unwrap();
                for kind in [OrderKind::Confirm, OrderKind::StartProcessing] {
                    engine
                        .transition::<Order>(TransitionRequest::system(order.id(), kind))
                        .await
                        .unwrap();
                }

                let vendor_order = engine
                    .create(
                        VendorOrder::new(order.id(), PartyId::new())
                            .with_line(OrderLine::new("L1", "Cement", 20, Money::from_dollars(9))),
                    )
                    .await
                    .unwrap();
                engine
                    .transition::<VendorOrder>(TransitionRequest::system(
                        vendor_order.id(),
                        VendorOrderKind::Confirm,
                    ))
                    .await
                    .unwrap();

                let fulfillment = engine
                    .create_fulfillment(vendor_order.id(), vec![FulfillmentLine::new("L1", 20)])
                    .await
                    .unwrap();
                for kind in ["ship", "deliver", "accept"] {
                    engine
                        .transition_named(
                            AggregateType::Fulfillment,
                            TransitionRequest::system(fulfillment.id(), kind.to_string()),
                        )
                        .await
                        .unwrap();
                }
            });
        });
    });
}

criterion_group!(
    benches,
    bench_table_lookup,
    bench_rollup_derivation,
    bench_create,
    bench_delivery_lifecycle,
    bench_fulfillment_with_rollup,
);
criterion_main!(benches);
