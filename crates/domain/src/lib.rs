//! Domain layer for the order lifecycle engine.
//!
//! This crate holds the pure rules of the engine, with no I/O:
//! - [`Money`] arithmetic in minor currency units
//! - Order, payment and tracking status enums with their state machines
//! - Order and tracking records with their invariants
//! - Coupon validity and discount rules
//! - Checkout totals (subtotal, discount, shipping, tax)

pub mod catalog;
pub mod coupon;
pub mod error;
pub mod money;
pub mod order;
pub mod pricing;
pub mod tracking;

pub use catalog::{Address, CartLine, CartLineTarget, Product, Variation};
pub use coupon::{Coupon, CouponError, DiscountKind};
pub use error::{DomainError, ParseEnumError};
pub use money::Money;
pub use order::{
    Order, OrderError, OrderItem, OrderNumber, OrderStatus, PaymentMethod, PaymentStatus,
    PlaceOrder,
};
pub use pricing::{CheckoutTotals, subtotal_of};
pub use tracking::{TrackingDetail, TrackingEntry, TrackingStatus, Transition};
