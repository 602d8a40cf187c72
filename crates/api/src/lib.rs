//! HTTP API server for the order lifecycle engine.
//!
//! Exposes checkout, order lookup, tracking and cancellation endpoints,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use engine::{
    CheckoutSettings, GatewayError, HttpPaymentGateway, InMemoryPaymentGateway, LoggingNotifier,
    Notifier, OrderEngine, PaymentGateway,
};
use metrics_exporter_prometheus::PrometheusHandle;
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// The engine as served over HTTP, with its services chosen at start-up.
pub type ApiEngine<S> = OrderEngine<S, Arc<dyn PaymentGateway>, Arc<dyn Notifier>>;

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store> {
    pub engine: ApiEngine<S>,
}

impl<S: Store> AppState<S> {
    pub fn new(
        store: S,
        payments: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            engine: OrderEngine::new(store, payments, notifier, settings),
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/checkout", post(routes::checkout::create::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route(
            "/orders/{id}/tracking",
            get(routes::orders::tracking::<S>).post(routes::orders::update_tracking::<S>),
        )
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route(
            "/customers/{id}/orders",
            get(routes::orders::list_for_customer::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state from configuration.
///
/// Uses the HTTP payment gateway when `PAYMENT_GATEWAY_URL` is set. Without
/// it every online payment fails verification, so only cash on delivery can
/// be checked out.
pub fn create_default_state<S: Store + 'static>(
    store: S,
    config: &Config,
) -> Result<Arc<AppState<S>>, GatewayError> {
    let payments: Arc<dyn PaymentGateway> = match &config.payment_gateway_url {
        Some(url) => Arc::new(HttpPaymentGateway::new(
            url.clone(),
            config.payment_gateway_api_key.clone(),
            config.payment_verify_timeout,
        )?),
        None => {
            tracing::warn!("PAYMENT_GATEWAY_URL not set, online payments will be rejected");
            Arc::new(InMemoryPaymentGateway::new())
        }
    };

    Ok(Arc::new(AppState::new(
        store,
        payments,
        Arc::new(LoggingNotifier),
        config.checkout_settings(),
    )))
}
