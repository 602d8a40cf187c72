//! Order lookup, tracking and cancellation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use domain::{Order, TrackingDetail, TrackingStatus};
use engine::{Actor, TrackingUpdate};
use serde::Deserialize;
use store::Store;

use super::{parse_customer_id, parse_order_id};
use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct TrackingRequest {
    pub status: TrackingStatus,
    #[serde(flatten)]
    pub update: TrackingUpdate,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub actor: Actor,
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    Ok(Json(state.engine.get_order(order_id).await?))
}

/// GET /customers/{id}/orders — newest first.
#[tracing::instrument(skip(state))]
pub async fn list_for_customer<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Order>>, ApiError> {
    let customer_id = parse_customer_id(&id)?;
    Ok(Json(state.engine.list_orders(customer_id).await?))
}

/// GET /orders/{id}/tracking
#[tracing::instrument(skip(state))]
pub async fn tracking<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<TrackingDetail>, ApiError> {
    let order_id = parse_order_id(&id)?;
    Ok(Json(state.engine.get_tracking(order_id).await?))
}

/// POST /orders/{id}/tracking — record a fulfillment status.
#[tracing::instrument(skip(state, request))]
pub async fn update_tracking<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(request): Json<TrackingRequest>,
) -> Result<Json<TrackingDetail>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let detail = state
        .engine
        .update_tracking_status(order_id, request.status, request.update)
        .await?;
    Ok(Json(detail))
}

/// POST /orders/{id}/cancel
#[tracing::instrument(skip(state, request))]
pub async fn cancel<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    Ok(Json(state.engine.cancel_order(order_id, request.actor).await?))
}
