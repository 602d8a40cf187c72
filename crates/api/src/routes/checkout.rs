//! Checkout endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use domain::Order;
use engine::CheckoutRequest;
use store::Store;

use crate::AppState;
use crate::error::ApiError;

/// POST /checkout — price, verify and commit an order.
#[tracing::instrument(skip(state, request), fields(customer_id = %request.customer_id))]
pub async fn create<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let order = state.engine.checkout(request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}
