use common::{CouponId, CustomerId, OrderId};
use domain::{CartLineTarget, ParseEnumError};
use thiserror::Error;

/// Errors that can occur when reading or writing the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The conditional stock decrement matched no row.
    #[error("Insufficient stock for {target}: requested {requested}, available {available}")]
    InsufficientStock {
        target: CartLineTarget,
        requested: u32,
        available: u32,
    },

    /// The coupon's global usage limit is exhausted.
    #[error("Coupon {coupon_id} has reached its usage limit")]
    CouponLimitReached { coupon_id: CouponId },

    /// The customer has used the coupon as often as allowed.
    #[error("Customer {customer_id} has used coupon {coupon_id} {limit} time(s) already")]
    CouponPerPersonLimitReached {
        coupon_id: CouponId,
        customer_id: CustomerId,
        limit: u32,
    },

    /// Another order was already paid with this gateway reference.
    #[error("Payment reference {reference} is already attached to an order")]
    PaymentReferenceUsed { reference: String },

    /// The order does not exist.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The order or its tracking record changed since it was read.
    #[error("Order {0} was modified concurrently")]
    ConcurrentModification(OrderId),

    /// The backend refused the operation.
    #[error("Store unavailable during {operation}")]
    Unavailable { operation: &'static str },

    /// A stored tag did not parse back into its enum.
    #[error("Invalid stored value: {0}")]
    InvalidData(#[from] ParseEnumError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Postgres SQLSTATE codes for a serialization failure and a detected deadlock.
const RETRYABLE_SQLSTATES: [&str; 2] = ["40001", "40P01"];

/// Unique constraint over generated order numbers.
const ORDER_NUMBER_CONSTRAINT: &str = "unique_order_number";

impl StoreError {
    /// Returns true if the failed unit of work can be retried as a whole.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable { .. } => true,
            StoreError::Database(sqlx::Error::PoolTimedOut) => true,
            StoreError::Database(sqlx::Error::Database(db)) => {
                db.code()
                    .is_some_and(|code| RETRYABLE_SQLSTATES.contains(&code.as_ref()))
                    || db.constraint() == Some(ORDER_NUMBER_CONSTRAINT)
            }
            _ => false,
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
