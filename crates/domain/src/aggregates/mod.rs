//! The eight procurement aggregates and the table registry.

pub mod delivery;
pub mod dispute;
pub mod fulfillment;
pub mod invoice;
pub mod order;
pub mod quote;
pub mod rfq;
pub mod vendor_order;

use common::AggregateType;

pub use delivery::{Delivery, DeliveryKind, DeliveryStatus};
pub use dispute::{Dispute, DisputeKind, DisputeStatus};
pub use fulfillment::{Fulfillment, FulfillmentKind, FulfillmentStatus};
pub use invoice::{Invoice, InvoiceKind, InvoiceStatus};
pub use order::{Order, OrderKind, OrderStatus};
pub use quote::{Quote, QuoteKind, QuoteStatus};
pub use rfq::{InvitationStatus, Rfq, RfqKind, RfqStatus, SupplierInvitation};
pub use vendor_order::{VendorOrder, VendorOrderKind, VendorOrderStatus};

use crate::aggregate::Aggregate;
use crate::table::TableDescription;

/// Returns the transition table of an aggregate type in string form.
pub fn describe(aggregate_type: AggregateType) -> TableDescription {
    match aggregate_type {
        AggregateType::Rfq => Rfq::table().describe(aggregate_type),
        AggregateType::Quote => Quote::table().describe(aggregate_type),
        AggregateType::Order => Order::table().describe(aggregate_type),
        AggregateType::VendorOrder => VendorOrder::table().describe(aggregate_type),
        AggregateType::Fulfillment => Fulfillment::table().describe(aggregate_type),
        AggregateType::Delivery => Delivery::table().describe(aggregate_type),
        AggregateType::Dispute => Dispute::table().describe(aggregate_type),
        AggregateType::Invoice => Invoice::table().describe(aggregate_type),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Lifecycle;

    fn check_table<A: Aggregate>() {
        let table = A::table();
        let reachable = table.reachable();
        for status in <A::Status as Lifecycle>::ALL {
            assert!(
                reachable.contains(status),
                "{}: {status} is unreachable",
                A::AGGREGATE_TYPE
            );
            if table.is_terminal(*status) {
                assert!(
                    table.allowed_kinds(*status).is_empty(),
                    "{}: terminal {status} has outgoing transitions",
                    A::AGGREGATE_TYPE
                );
            } else {
                assert!(
                    !table.allowed_kinds(*status).is_empty(),
                    "{}: {status} is a dead end",
                    A::AGGREGATE_TYPE
                );
            }
        }
        for kind in <A::Kind as Lifecycle>::ALL {
            let used = <A::Status as Lifecycle>::ALL
                .iter()
                .any(|s| table.next(*s, *kind).is_some());
            assert!(used, "{}: kind {kind} is never accepted", A::AGGREGATE_TYPE);
        }
    }

    #[test]
    fn tables_are_well_formed() {
        check_table::<Rfq>();
        check_table::<Quote>();
        check_table::<Order>();
        check_table::<VendorOrder>();
        check_table::<Fulfillment>();
        check_table::<Delivery>();
        check_table::<Dispute>();
        check_table::<Invoice>();
    }

    #[test]
    fn registry_covers_every_type() {
        for aggregate_type in AggregateType::ALL {
            let description = describe(aggregate_type);
            assert_eq!(description.aggregate_type, aggregate_type);
            assert!(!description.terminal.is_empty());
        }
        assert_eq!(
            describe(AggregateType::Order).next("PENDING_PAYMENT", "confirm"),
            Some("CONFIRMED")
        );
    }
}
