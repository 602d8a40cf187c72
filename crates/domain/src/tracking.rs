//! Fulfillment tracking: fine-grained shipment states and their history.

use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};

use crate::OrderStatus;
use crate::error::ParseEnumError;

/// Fine-grained fulfillment state reported by the warehouse or carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    OrderPlaced,
    Processing,
    ReadyToShip,
    Shipped,
    InTransit,
    OutForDelivery,
    Delivered,
    FailedDelivery,
    Returned,
}

impl TrackingStatus {
    pub const ALL: [TrackingStatus; 9] = [
        TrackingStatus::OrderPlaced,
        TrackingStatus::Processing,
        TrackingStatus::ReadyToShip,
        TrackingStatus::Shipped,
        TrackingStatus::InTransit,
        TrackingStatus::OutForDelivery,
        TrackingStatus::Delivered,
        TrackingStatus::FailedDelivery,
        TrackingStatus::Returned,
    ];

    /// The coarser order status this tracking status is reflected as.
    pub fn order_status(&self) -> OrderStatus {
        match self {
            TrackingStatus::OrderPlaced => OrderStatus::Confirmed,
            TrackingStatus::Processing | TrackingStatus::ReadyToShip => OrderStatus::Processing,
            TrackingStatus::Shipped
            | TrackingStatus::InTransit
            | TrackingStatus::OutForDelivery
            | TrackingStatus::FailedDelivery => OrderStatus::Shipped,
            TrackingStatus::Delivered => OrderStatus::Delivered,
            TrackingStatus::Returned => OrderStatus::Cancelled,
        }
    }

    /// Notification template sent to the customer when this status is reached.
    pub fn template(&self) -> &'static str {
        match self {
            TrackingStatus::OrderPlaced => "order_placed",
            TrackingStatus::Processing => "order_processing",
            TrackingStatus::ReadyToShip => "order_ready_to_ship",
            TrackingStatus::Shipped => "order_shipped",
            TrackingStatus::InTransit => "order_in_transit",
            TrackingStatus::OutForDelivery => "order_out_for_delivery",
            TrackingStatus::Delivered => "order_delivered",
            TrackingStatus::FailedDelivery => "order_delivery_failed",
            TrackingStatus::Returned => "order_returned",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingStatus::OrderPlaced => "order_placed",
            TrackingStatus::Processing => "processing",
            TrackingStatus::ReadyToShip => "ready_to_ship",
            TrackingStatus::Shipped => "shipped",
            TrackingStatus::InTransit => "in_transit",
            TrackingStatus::OutForDelivery => "out_for_delivery",
            TrackingStatus::Delivered => "delivered",
            TrackingStatus::FailedDelivery => "failed_delivery",
            TrackingStatus::Returned => "returned",
        }
    }
}

impl std::fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TrackingStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TrackingStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("tracking status", s))
    }
}

/// One entry of a tracking history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEntry {
    pub status: TrackingStatus,
    pub timestamp: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Outcome of recording a status on a [`TrackingDetail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The status changed; a history entry was appended.
    Applied { previous: TrackingStatus },
    /// The status was already current; nothing was recorded.
    Unchanged,
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

/// The tracking record of one order.
///
/// `status_history` only ever grows, and its last entry always carries the
/// current `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingDetail {
    pub order_id: OrderId,
    pub status: TrackingStatus,
    pub status_history: Vec<TrackingEntry>,
    pub carrier: Option<String>,
    pub tracking_number: Option<String>,
    pub last_updated_at: DateTime<Utc>,
}

impl TrackingDetail {
    /// Creates the initial record with a single `order_placed` entry.
    pub fn new(order_id: OrderId, now: DateTime<Utc>) -> Self {
        Self {
            order_id,
            status: TrackingStatus::OrderPlaced,
            status_history: vec![TrackingEntry {
                status: TrackingStatus::OrderPlaced,
                timestamp: now,
                notes: Some("Order placed".to_string()),
            }],
            carrier: None,
            tracking_number: None,
            last_updated_at: now,
        }
    }

    /// Records `status`, appending to the history if it differs from the
    /// current one. Re-recording the current status is a no-op.
    pub fn record(
        &mut self,
        status: TrackingStatus,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Transition {
        if status == self.status {
            return Transition::Unchanged;
        }
        let previous = self.status;
        self.status_history.push(TrackingEntry {
            status,
            timestamp: now,
            notes,
        });
        self.status = status;
        self.last_updated_at = now;
        Transition::Applied { previous }
    }

    /// Updates carrier metadata. `None` leaves a field as it is.
    pub fn set_carrier(&mut self, carrier: Option<String>, tracking_number: Option<String>) {
        if carrier.is_some() {
            self.carrier = carrier;
        }
        if tracking_number.is_some() {
            self.tracking_number = tracking_number;
        }
    }
}
