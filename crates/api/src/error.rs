//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use engine::{EngineError, ErrorKind};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed path or body.
    BadRequest(String),
    /// Engine operation failed.
    Engine(EngineError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": msg, "code": "bad_request", "retryable": false }),
            ),
            ApiError::Engine(err) => {
                let status = engine_error_status(&err);
                metrics::counter!("api_errors_total", "code" => err.code()).increment(1);
                if status.is_server_error() {
                    tracing::error!(error = %err, code = err.code(), "request failed");
                }
                (
                    status,
                    serde_json::json!({
                        "error": err.to_string(),
                        "code": err.code(),
                        "retryable": err.is_retryable(),
                    }),
                )
            }
        };

        (status, axum::Json(body)).into_response()
    }
}

fn engine_error_status(err: &EngineError) -> StatusCode {
    match err.kind() {
        ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::ExternalDependency => match err {
            EngineError::PaymentNotCompleted { .. } | EngineError::PaymentMismatch { .. } => {
                StatusCode::PAYMENT_REQUIRED
            }
            _ => StatusCode::BAD_GATEWAY,
        },
        ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError::Engine(err)
    }
}

#[cfg(test)]
mod tests {
    use common::OrderId;
    use store::StoreError;

    use super::*;

    #[test]
    fn test_status_follows_error_kind() {
        let cases = [
            (EngineError::EmptyCart, StatusCode::UNPROCESSABLE_ENTITY),
            (
                EngineError::OrderNotFound(OrderId::new()),
                StatusCode::NOT_FOUND,
            ),
            (
                EngineError::Undeliverable {
                    postal_code: "000000".to_string(),
                },
                StatusCode::CONFLICT,
            ),
            (
                EngineError::PaymentVerificationFailed {
                    reference: "pay_1".to_string(),
                    reason: "timeout".to_string(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                EngineError::PaymentNotCompleted {
                    reference: "pay_1".to_string(),
                    invoice_status: "pending".to_string(),
                    transaction_status: "pending".to_string(),
                },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                EngineError::from(StoreError::Unavailable {
                    operation: "order insert",
                }),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(engine_error_status(&err), expected, "{err}");
        }
    }
}
