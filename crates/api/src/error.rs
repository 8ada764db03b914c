//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use seckill::SeckillError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Flash-sale pipeline error.
    Seckill(SeckillError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Seckill(err) => seckill_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn seckill_error_to_response(err: SeckillError) -> (StatusCode, String) {
    match &err {
        SeckillError::UnknownVoucher(_) => (StatusCode::NOT_FOUND, err.to_string()),
        // Admission correctness depends on the cache store and queue being
        // reachable: infrastructure failures fail the call outright.
        SeckillError::CacheStore(_)
        | SeckillError::Cache(_)
        | SeckillError::Database(_)
        | SeckillError::Storage(_)
        | SeckillError::QueueClosed => {
            tracing::error!(error = %err, "infrastructure failure");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
        SeckillError::DuplicateOrder { .. } | SeckillError::StockDepleted(_) => {
            (StatusCode::CONFLICT, err.to_string())
        }
        SeckillError::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

impl From<SeckillError> for ApiError {
    fn from(err: SeckillError) -> Self {
        ApiError::Seckill(err)
    }
}
