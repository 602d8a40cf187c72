//! Engine error types.

use common::{AddressId, OrderId, ProductId, VariationId};
use domain::{CartLineTarget, CouponError, Money, OrderError, OrderStatus};
use store::StoreError;
use thiserror::Error;

/// Broad classes of failure, used to decide how a caller should react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is malformed.
    Validation,
    /// A referenced record does not exist.
    NotFound,
    /// A business rule rejected the request.
    Conflict,
    /// An external dependency failed or refused.
    ExternalDependency,
    /// Retrying the whole operation may succeed.
    Transient,
    /// Unexpected storage or programming failure.
    Internal,
}

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid quantity: {quantity} (must be at least 1)")]
    InvalidQuantity { quantity: u32 },

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Payment method {method} requires a payment reference")]
    MissingPaymentReference { method: domain::PaymentMethod },

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Variation not found: {0}")]
    VariationNotFound(VariationId),

    #[error("Coupon not found: {0}")]
    CouponNotFound(String),

    #[error("Address not found: {0}")]
    AddressNotFound(AddressId),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Insufficient stock for {target}: requested {requested}, available {available}")]
    InsufficientStock {
        target: CartLineTarget,
        requested: u32,
        available: u32,
    },

    #[error(transparent)]
    Coupon(#[from] CouponError),

    #[error("Coupon '{name}' has reached its usage limit")]
    CouponLimitReached { name: String },

    #[error("Coupon '{name}' may only be used {limit} time(s) per customer")]
    CouponPerPersonLimitReached { name: String, limit: u32 },

    #[error("Not currently deliverable to postal code {postal_code}")]
    Undeliverable { postal_code: String },

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error("Order {order_id} is {status} and no longer accepts tracking updates")]
    TrackingClosed {
        order_id: OrderId,
        status: OrderStatus,
    },

    #[error(
        "Payment {reference} is not completed (invoice {invoice_status}, transaction {transaction_status})"
    )]
    PaymentNotCompleted {
        reference: String,
        invoice_status: String,
        transaction_status: String,
    },

    #[error(
        "Payment {reference} does not match the order: expected {expected} {expected_currency}, paid {paid} {paid_currency}"
    )]
    PaymentMismatch {
        reference: String,
        expected: Money,
        expected_currency: String,
        paid: Money,
        paid_currency: String,
    },

    #[error("Payment verification failed for {reference}: {reason}")]
    PaymentVerificationFailed { reference: String, reason: String },

    #[error("Payment {reference} has already been used for another order")]
    PaymentReferenceUsed { reference: String },

    #[error(
        "Order {order_id} is {current}; tracking status {requested} would move it back to {target}"
    )]
    TrackingRegression {
        order_id: OrderId,
        current: OrderStatus,
        requested: domain::TrackingStatus,
        target: OrderStatus,
    },

    #[error("Order {0} was modified concurrently, retry the request")]
    ConcurrentModification(OrderId),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl EngineError {
    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidQuantity { .. }
            | EngineError::EmptyCart
            | EngineError::MissingPaymentReference { .. } => ErrorKind::Validation,

            EngineError::ProductNotFound(_)
            | EngineError::VariationNotFound(_)
            | EngineError::CouponNotFound(_)
            | EngineError::AddressNotFound(_)
            | EngineError::OrderNotFound(_) => ErrorKind::NotFound,

            EngineError::InsufficientStock { .. }
            | EngineError::Coupon(_)
            | EngineError::CouponLimitReached { .. }
            | EngineError::CouponPerPersonLimitReached { .. }
            | EngineError::Undeliverable { .. }
            | EngineError::TrackingClosed { .. }
            | EngineError::TrackingRegression { .. }
            | EngineError::PaymentReferenceUsed { .. } => ErrorKind::Conflict,

            EngineError::Order(err) => match err {
                OrderError::InvalidTransition { .. } => ErrorKind::Conflict,
                OrderError::InvalidQuantity { .. } | OrderError::NoItems => ErrorKind::Validation,
                OrderError::TotalMismatch { .. } => ErrorKind::Internal,
            },

            EngineError::PaymentNotCompleted { .. }
            | EngineError::PaymentMismatch { .. }
            | EngineError::PaymentVerificationFailed { .. } => ErrorKind::ExternalDependency,

            EngineError::ConcurrentModification(_) => ErrorKind::Transient,

            EngineError::Store(err) if err.is_transient() => ErrorKind::Transient,
            EngineError::Store(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if repeating the whole operation, starting from pricing,
    /// may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
            || matches!(self, EngineError::InsufficientStock { .. })
    }

    /// Short machine-readable code, used for metrics labels and API bodies.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidQuantity { .. } => "invalid_quantity",
            EngineError::EmptyCart => "empty_cart",
            EngineError::MissingPaymentReference { .. } => "missing_payment_reference",
            EngineError::ProductNotFound(_) => "product_not_found",
            EngineError::VariationNotFound(_) => "variation_not_found",
            EngineError::CouponNotFound(_) => "invalid_coupon",
            EngineError::AddressNotFound(_) => "address_not_found",
            EngineError::OrderNotFound(_) => "order_not_found",
            EngineError::InsufficientStock { .. } => "insufficient_stock",
            EngineError::Coupon(CouponError::Expired { .. }) => "coupon_expired",
            EngineError::Coupon(CouponError::NotYetValid { .. }) => "coupon_not_yet_valid",
            EngineError::Coupon(CouponError::MinimumNotMet { .. }) => "coupon_minimum_not_met",
            EngineError::CouponLimitReached { .. } => "coupon_limit_reached",
            EngineError::CouponPerPersonLimitReached { .. } => "coupon_per_person_limit_reached",
            EngineError::Undeliverable { .. } => "undeliverable",
            EngineError::Order(OrderError::InvalidTransition { .. }) => "invalid_transition",
            EngineError::Order(_) => "invalid_order",
            EngineError::TrackingClosed { .. } => "tracking_closed",
            EngineError::TrackingRegression { .. } => "tracking_regression",
            EngineError::PaymentReferenceUsed { .. } => "payment_reference_used",
            EngineError::PaymentNotCompleted { .. } => "payment_not_completed",
            EngineError::PaymentMismatch { .. } => "payment_mismatch",
            EngineError::PaymentVerificationFailed { .. } => "payment_verification_failed",
            EngineError::ConcurrentModification(_) => "concurrent_modification",
            EngineError::Store(_) => "store_error",
        }
    }

    /// Maps a store error raised while committing with coupon `coupon_name`.
    pub(crate) fn from_commit(err: StoreError, coupon_name: Option<&str>) -> Self {
        let name = coupon_name.unwrap_or_default().to_string();
        match err {
            StoreError::CouponLimitReached { .. } => EngineError::CouponLimitReached { name },
            StoreError::CouponPerPersonLimitReached { limit, .. } => {
                EngineError::CouponPerPersonLimitReached { name, limit }
            }
            other => other.into(),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientStock {
                target,
                requested,
                available,
            } => EngineError::InsufficientStock {
                target,
                requested,
                available,
            },
            StoreError::OrderNotFound(order_id) => EngineError::OrderNotFound(order_id),
            StoreError::PaymentReferenceUsed { reference } => {
                EngineError::PaymentReferenceUsed { reference }
            }
            StoreError::ConcurrentModification(order_id) => {
                EngineError::ConcurrentModification(order_id)
            }
            other => EngineError::Store(other),
        }
    }
}

/// Convenience type alias for engine results.
pub type Result<T> = std::result::Result<T, EngineError>;
