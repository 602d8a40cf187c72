//! HTTP route handlers.

pub mod checkout;
pub mod health;
pub mod metrics;
pub mod orders;

use common::{CustomerId, OrderId};

use crate::error::ApiError;

pub(crate) fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid order id: {e}")))
}

pub(crate) fn parse_customer_id(id: &str) -> Result<CustomerId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid customer id: {e}")))
}
