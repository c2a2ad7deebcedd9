//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cart_store::StoreError;
use reconciler::EngineError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Cart engine error.
    Engine(EngineError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = serde_json::json!({});
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Engine(err) => {
                if let EngineError::OutOfStock { book_ids } = &err {
                    body["book_ids"] = serde_json::json!(book_ids);
                }
                engine_error_to_response(err)
            }
        };

        body["error"] = serde_json::Value::String(message);
        (status, axum::Json(body)).into_response()
    }
}

fn engine_error_to_response(err: EngineError) -> (StatusCode, String) {
    let status = match &err {
        EngineError::Cart(_) => StatusCode::BAD_REQUEST,
        EngineError::OutOfStock { .. } => StatusCode::CONFLICT,
        EngineError::CartNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::Storage(StoreError::LockTimeout) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Storage(_) | EngineError::Interrupted(_) => {
            tracing::error!(error = %err, "internal server error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError::Engine(err)
    }
}
