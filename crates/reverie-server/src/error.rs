//! Error taxonomy and the wire envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use reverie_core::StoreError;
use reverie_memory::MemoryError;

/// API error, one variant per kind in the error taxonomy.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Input failed shape or range checks.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No such vector, persona, or conversation.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Buffer full or persona over cap; retryable after eviction.
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    /// Vector length does not match the store's dimensionality.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Missing API key.
    #[error("Missing API key")]
    MissingKey,

    /// Unknown, expired, or revoked API key.
    #[error("Invalid API key")]
    InvalidKey,

    /// Key lacks the needed scope.
    #[error("Insufficient permission: {0}")]
    Permission(String),

    /// Quota exhausted.
    #[error("Rate limit exceeded")]
    RateLimited {
        /// Seconds the client should wait before retrying.
        retry_after: u64,
    },

    /// Embedding provider or metadata store failed after retries.
    #[error("Dependency failure: {0}")]
    Dependency(String),

    /// Operation exceeded its deadline.
    #[error("Operation timed out")]
    Timeout,

    /// Invariant violation or unknown failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            ApiError::DimensionMismatch(_) => (StatusCode::BAD_REQUEST, "dimension_mismatch"),
            ApiError::MissingKey => (StatusCode::UNAUTHORIZED, "missing_key"),
            ApiError::InvalidKey => (StatusCode::UNAUTHORIZED, "invalid_key"),
            ApiError::Permission(_) => (StatusCode::FORBIDDEN, "permission"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            ApiError::Capacity(_) => (StatusCode::CONFLICT, "capacity"),
            ApiError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            ApiError::Dependency(_) => (StatusCode::BAD_GATEWAY, "dependency"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl From<MemoryError> for ApiError {
    fn from(e: MemoryError) -> Self {
        match e {
            MemoryError::Validation(msg) => ApiError::Validation(msg),
            MemoryError::NotFound(msg) => ApiError::NotFound(msg),
            MemoryError::Capacity(msg) => ApiError::Capacity(msg),
            MemoryError::Dependency(msg) => ApiError::Dependency(msg),
            MemoryError::Store(store) => store.into(),
            MemoryError::Database(e) => ApiError::Dependency(format!("metadata store: {}", e)),
            MemoryError::Serialization(e) => ApiError::Internal(format!("serialization: {}", e)),
            MemoryError::Migration(msg) => ApiError::Internal(format!("migration: {}", msg)),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Validation(msg) => ApiError::Validation(msg),
            StoreError::NotFound(id) => ApiError::NotFound(format!("vector {}", id)),
            StoreError::BufferFull { capacity } => {
                ApiError::Capacity(format!("vector buffer full (capacity {})", capacity))
            }
            StoreError::DimensionMismatch { expected, actual } => ApiError::DimensionMismatch(
                format!("expected {} dimensions, got {}", expected, actual),
            ),
            StoreError::DeadlineExceeded => ApiError::Timeout,
            StoreError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────────────────

/// The uniform response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl<T: Serialize> ApiResponse<T> {
    /// A success envelope wrapping `data`.
    pub fn success(data: T) -> Json<Self> {
        Json(Self {
            status: "success",
            data: Some(data),
            error: None,
            message: None,
            meta: None,
        })
    }

    /// A success envelope with request metadata attached.
    pub fn success_with_meta(data: T, meta: serde_json::Value) -> Json<Self> {
        Json(Self {
            status: "success",
            data: Some(data),
            error: None,
            message: None,
            meta: Some(meta),
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(status = %status, code, error = %message, "request failed");
        } else {
            tracing::warn!(status = %status, code, error = %message, "request rejected");
        }

        let body = ApiResponse::<()> {
            status: "error",
            data: None,
            error: Some(code.to_string()),
            message: Some(message),
            meta: None,
        };

        let mut response = (status, Json(body)).into_response();
        if let ApiError::RateLimited { retry_after } = self {
            if let Ok(value) = retry_after.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::Validation("x".into()).status_and_code().0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::MissingKey.status_and_code().0,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Permission("x".into()).status_and_code().0,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::NotFound("x".into()).status_and_code().0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::RateLimited { retry_after: 1 }.status_and_code().0,
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::Internal("x".into()).status_and_code().0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_memory_error_conversion() {
        let err: ApiError = MemoryError::NotFound("persona x".into()).into();
        assert!(matches!(err, ApiError::NotFound(_)));

        let err: ApiError = MemoryError::Store(StoreError::DimensionMismatch {
            expected: 4,
            actual: 2,
        })
        .into();
        assert!(matches!(err, ApiError::DimensionMismatch(_)));

        let err: ApiError = MemoryError::Store(StoreError::DeadlineExceeded).into();
        assert!(matches!(err, ApiError::Timeout));
    }

    #[test]
    fn test_envelope_shape() {
        let envelope = ApiResponse::success(serde_json::json!({"k": 1}));
        let text = serde_json::to_string(&envelope.0).unwrap();
        assert!(text.contains("\"status\":\"success\""));
        assert!(!text.contains("\"error\""));
    }
}
