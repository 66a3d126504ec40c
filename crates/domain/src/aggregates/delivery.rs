//! Carrier deliveries for a vendor order.

use chrono::{DateTime, Utc};
use common::{AggregateId, AggregateType};
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::guard::{Guard, RequiresReason};
use crate::lifecycle::lifecycle_enum;
use crate::table::TransitionTable;

lifecycle_enum! {
    pub enum DeliveryStatus {
        Pending => "PENDING",
        Dispatched => "DISPATCHED",
        InTransit => "IN_TRANSIT",
        Arrived => "ARRIVED",
        Delivered => "DELIVERED",
        Accepted => "ACCEPTED",
        Disputed => "DISPUTED",
        Cancelled => "CANCELLED",
    }
}

lifecycle_enum! {
    pub enum DeliveryKind {
        Dispatch => "dispatch",
        Depart => "depart",
        Arrive => "arrive",
        Deliver => "deliver",
        Accept => "accept",
        Dispute => "dispute",
        Cancel => "cancel",
    }
}

use DeliveryKind as K;
use DeliveryStatus as S;

static TABLE: TransitionTable<DeliveryStatus, DeliveryKind> = TransitionTable::new(
    S::Pending,
    &[S::Accepted, S::Disputed, S::Cancelled],
    &[
        (S::Pending, K::Dispatch, S::Dispatched),
        (S::Dispatched, K::Depart, S::InTransit),
        (S::InTransit, K::Arrive, S::Arrived),
        (S::Arrived, K::Deliver, S::Delivered),
        (S::Delivered, K::Accept, S::Accepted),
        (S::Delivered, K::Dispute, S::Disputed),
        (S::Pending, K::Cancel, S::Cancelled),
        (S::Dispatched, K::Cancel, S::Cancelled),
        (S::InTransit, K::Cancel, S::Cancelled),
        (S::Arrived, K::Cancel, S::Cancelled),
        (S::Delivered, K::Cancel, S::Cancelled),
    ],
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    id: AggregateId,
    status: DeliveryStatus,
    reference_number: Option<String>,
    pub vendor_order_id: AggregateId,
    pub carrier: Option<String>,
    pub tracking_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Delivery {
    pub fn new(vendor_order_id: AggregateId) -> Self {
        Self {
            id: AggregateId::new(),
            status: DeliveryStatus::Pending,
            reference_number: None,
            vendor_order_id,
            carrier: None,
            tracking_number: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_carrier(mut self, carrier: impl Into<String>, tracking_number: impl Into<String>) -> Self {
        self.carrier = Some(carrier.into());
        self.tracking_number = Some(tracking_number.into());
        self
    }
}

impl Aggregate for Delivery {
    type Status = DeliveryStatus;
    type Kind = DeliveryKind;

    const AGGREGATE_TYPE: AggregateType = AggregateType::Delivery;

    fn id(&self) -> AggregateId {
        self.id
    }

    fn status(&self) -> DeliveryStatus {
        self.status
    }

    fn set_status(&mut self, status: DeliveryStatus) {
        self.status = status;
    }

    fn table() -> &'static TransitionTable<DeliveryStatus, DeliveryKind> {
        &TABLE
    }

    fn event_type(kind: DeliveryKind) -> Option<&'static str> {
        match kind {
            K::Dispatch => Some("delivery.dispatched"),
            K::Depart => None,
            K::Arrive => Some("delivery.arrived"),
            K::Deliver => Some("delivery.delivered"),
            K::Accept => Some("delivery.accepted"),
            K::Dispute => Some("delivery.disputed"),
            K::Cancel => Some("delivery.cancelled"),
        }
    }

    fn guards(kind: DeliveryKind) -> &'static [&'static dyn Guard<Self>] {
        match kind {
            K::Dispute => &[&RequiresReason],
            _ => &[],
        }
    }

    fn parent_id(&self) -> Option<AggregateId> {
        Some(self.vendor_order_id)
    }

    fn reference_prefix() -> Option<&'static str> {
        Some("DLV")
    }

    fn reference_number(&self) -> Option<&str> {
        self.reference_number.as_deref()
    }

    fn set_reference_number(&mut self, reference: String) {
        self.reference_number = Some(reference);
    }

    fn event_data(&self) -> serde_json::Value {
        serde_json::json!({
            "vendor_order_id": self.vendor_order_id,
            "carrier": self.carrier,
            "tracking_number": self.tracking_number,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Lifecycle;

    #[test]
    fn every_non_terminal_status_can_cancel() {
        for status in DeliveryStatus::ALL {
            let can_cancel = TABLE.next(*status, K::Cancel).is_some();
            assert_eq!(can_cancel, !TABLE.is_terminal(*status), "{status}");
        }
    }
}
