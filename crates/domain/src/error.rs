//! Domain error types.

use thiserror::Error;

use crate::coupon::CouponError;
use crate::order::OrderError;

/// Errors raised by the pure domain rules.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An order rule was violated.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// A coupon could not be applied.
    #[error("Coupon error: {0}")]
    Coupon(#[from] CouponError),

    /// A status or method tag could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseEnumError),
}

/// Returned when a string tag does not name a known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    /// The enum being parsed, e.g. `"tracking status"`.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
