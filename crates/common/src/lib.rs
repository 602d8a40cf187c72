//! Shared types for the order lifecycle engine.

pub mod types;

pub use types::{AddressId, CouponId, CustomerId, OrderId, ProductId, VariationId};
