//! Orders: status enums, the order record and its line items.

mod record;
mod status;

pub use record::{Order, OrderItem, OrderNumber, PlaceOrder};
pub use status::{OrderStatus, PaymentMethod, PaymentStatus};

use thiserror::Error;

use crate::Money;

/// Errors that can occur during order operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// Order is not in a state that allows the action.
    #[error("Invalid state transition: cannot {action} an order that is {current}")]
    InvalidTransition {
        current: OrderStatus,
        action: &'static str,
    },

    /// Invalid quantity.
    #[error("Invalid quantity: {quantity} (must be at least 1)")]
    InvalidQuantity { quantity: u32 },

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// The totals handed to the order do not add up.
    #[error("Order total {actual} does not match its components ({expected})")]
    TotalMismatch { expected: Money, actual: Money },
}
