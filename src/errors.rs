use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Error envelope returned to API clients.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

/// Unified error type for the settlement core.
///
/// Variants map one-to-one onto the business failure modes: stock and wallet
/// rejections, coupon revalidation failures, payment-integrity failures, and
/// lost updates on the hot shared documents (stock, wallet, order header).
#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Insufficient wallet balance")]
    InsufficientBalance,

    #[error("Invalid coupon: {0}")]
    InvalidCoupon(String),

    #[error("Payment signature mismatch")]
    SignatureMismatch,

    #[error("Concurrent modification of {0}")]
    ConcurrencyConflict(Uuid),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ServiceError {
    /// Helper to wrap database errors with uniform logging at call sites.
    pub fn db_error(err: DbErr) -> Self {
        ServiceError::DatabaseError(err)
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            ServiceError::InsufficientStock(_) => StatusCode::CONFLICT,
            ServiceError::InsufficientBalance => StatusCode::PAYMENT_REQUIRED,
            ServiceError::InvalidCoupon(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::SignatureMismatch => StatusCode::BAD_REQUEST,
            ServiceError::ConcurrencyConflict(_) => StatusCode::CONFLICT,
            ServiceError::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            ServiceError::DatabaseError(_)
            | ServiceError::EventError(_)
            | ServiceError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to expose to API clients. Internal failures are masked.
    pub fn response_message(&self) -> String {
        match self {
            ServiceError::DatabaseError(_)
            | ServiceError::InternalError(_)
            | ServiceError::EventError(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_rejections_map_to_client_errors() {
        assert_eq!(
            ServiceError::InsufficientStock("sku OUT-1".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::InsufficientBalance.status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            ServiceError::SignatureMismatch.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::InvalidCoupon("expired".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn internal_details_are_masked() {
        let err = ServiceError::InternalError("connection pool exhausted".into());
        assert_eq!(err.response_message(), "Internal server error");

        let err = ServiceError::ConcurrencyConflict(Uuid::nil());
        assert!(err.response_message().contains("Concurrent modification"));
    }
}
