//! Order, payment status and payment method enums.

use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Confirmed ──► Processing ──► Shipped ──► Delivered
///    │            │             │             │
///    └────────────┴─────────────┴─────────────┴──► Cancelled | Refunded
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Order recorded, not yet confirmed.
    #[default]
    Pending,

    /// Order committed and accepted for fulfillment.
    Confirmed,

    /// Order is being picked and packed.
    Processing,

    /// Order has left the warehouse.
    Shipped,

    /// Order reached the customer (terminal).
    Delivered,

    /// Order was cancelled or returned (terminal).
    Cancelled,

    /// Order was refunded (terminal).
    Refunded,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
    ];

    /// Returns true if the order can still be cancelled.
    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending
                | OrderStatus::Confirmed
                | OrderStatus::Processing
                | OrderStatus::Shipped
        )
    }

    /// Returns true if this is a terminal state for cancellation purposes.
    pub fn is_terminal(&self) -> bool {
        !self.can_cancel()
    }

    /// Returns true if the goods are still in the warehouse, so cancelling
    /// puts them back into stock.
    pub fn restocks_on_cancel(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Confirmed | OrderStatus::Processing
        )
    }

    /// Returns true if the fulfillment pipeline may still report progress.
    pub fn accepts_tracking_updates(&self) -> bool {
        !matches!(self, OrderStatus::Cancelled | OrderStatus::Refunded)
    }

    /// Returns true if a tracking update may move the order from this status
    /// to `next`.
    ///
    /// Fulfillment only moves forward. A return (`Cancelled`) is the one
    /// exit from every open status, including `Shipped` and `Delivered`.
    pub fn can_track_to(&self, next: OrderStatus) -> bool {
        if !self.accepts_tracking_updates() {
            return false;
        }
        match (self.fulfillment_stage(), next.fulfillment_stage()) {
            (Some(current), Some(next)) => next >= current,
            _ => next == OrderStatus::Cancelled,
        }
    }

    /// Statuses from which tracking may move an order to `next`.
    pub fn tracked_from(next: OrderStatus) -> Vec<OrderStatus> {
        OrderStatus::ALL
            .into_iter()
            .filter(|status| status.can_track_to(next))
            .collect()
    }

    fn fulfillment_stage(&self) -> Option<u8> {
        match self {
            OrderStatus::Pending => Some(0),
            OrderStatus::Confirmed => Some(1),
            OrderStatus::Processing => Some(2),
            OrderStatus::Shipped => Some(3),
            OrderStatus::Delivered => Some(4),
            OrderStatus::Cancelled | OrderStatus::Refunded => None,
        }
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "refunded" => Ok(OrderStatus::Refunded),
            other => Err(ParseEnumError::new("order status", other)),
        }
    }
}

/// Settlement state of an order's payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Money not yet collected (cash on delivery).
    #[default]
    Pending,
    /// Payment settled and verified with the gateway.
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(ParseEnumError::new("payment status", other)),
        }
    }
}

/// How the customer pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CashOnDelivery,
    Card,
    Upi,
    Wallet,
}

impl PaymentMethod {
    /// Returns true if a settled external payment must be verified before
    /// stock is committed.
    pub fn requires_verification(&self) -> bool {
        match self {
            PaymentMethod::CashOnDelivery => false,
            PaymentMethod::Card | PaymentMethod::Upi | PaymentMethod::Wallet => true,
        }
    }

    /// Payment status recorded on a freshly committed order.
    pub fn initial_payment_status(&self) -> PaymentStatus {
        if self.requires_verification() {
            PaymentStatus::Completed
        } else {
            PaymentStatus::Pending
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CashOnDelivery => "cash_on_delivery",
            PaymentMethod::Card => "card",
            PaymentMethod::Upi => "upi",
            PaymentMethod::Wallet => "wallet",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash_on_delivery" => Ok(PaymentMethod::CashOnDelivery),
            "card" => Ok(PaymentMethod::Card),
            "upi" => Ok(PaymentMethod::Upi),
            "wallet" => Ok(PaymentMethod::Wallet),
            other => Err(ParseEnumError::new("payment method", other)),
        }
    }
}
