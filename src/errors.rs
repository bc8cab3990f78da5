use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Standard error body returned by every endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Not Found",
    "message": "Payment with transaction id txn-9f2a not found",
    "details": null,
    "request_id": "req-abc123xyz",
    "timestamp": "2025-11-02T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    #[schema(example = "Not Found")]
    pub error: String,
    /// Human-readable error description
    #[schema(example = "Payment with transaction id txn-9f2a not found")]
    pub message: String,
    /// Additional error details (validation errors, audit values)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "req-abc123xyz")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The verified gateway amount disagrees with the recomputed cart total
    /// beyond the configured tolerance. Never trusted, always audited.
    #[error("Amount discrepancy: expected {expected}, received {received}")]
    AmountDiscrepancy { expected: Decimal, received: Decimal },

    /// The checkout snapshot's TTL elapsed (or it never existed). The client
    /// must restart checkout rather than retry the same session.
    #[error("Checkout session expired: {0}")]
    CheckoutExpired(String),

    /// Terminal gateway rejection for this payment attempt.
    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    /// Gateway transport failure or timeout. Retryable: the payment record
    /// stays non-terminal and reconciliation may be re-invoked.
    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Coupon rejected: {0}")]
    CouponRejected(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<crate::cache::CacheError> for ServiceError {
    fn from(err: crate::cache::CacheError) -> Self {
        ServiceError::CacheError(err.to_string())
    }
}

impl From<crate::services::pricing::PricingError> for ServiceError {
    fn from(err: crate::services::pricing::PricingError) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_)
            | Self::CacheError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::InvalidOperation(_)
            | Self::BadRequest(_)
            | Self::CouponRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::AmountDiscrepancy { .. } | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::CheckoutExpired(_) => StatusCode::GONE,
            Self::PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
            Self::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidSignature | Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }

    /// Machine-readable error code included in payment responses so clients
    /// can distinguish "retry is safe" from "do not retry, contact support".
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_)
            | Self::CacheError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_)
            | Self::Other(_) => "internal_error",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) | Self::BadRequest(_) => "validation_error",
            Self::InvalidOperation(_) => "invalid_operation",
            Self::CouponRejected(_) => "coupon_rejected",
            Self::AmountDiscrepancy { .. } => "amount_discrepancy",
            Self::Conflict(_) => "conflict",
            Self::CheckoutExpired(_) => "checkout_expired",
            Self::PaymentFailed(_) => "payment_failed",
            Self::GatewayUnavailable(_) => "gateway_unavailable",
            Self::InvalidSignature => "invalid_signature",
            Self::Unauthorized(_) => "unauthorized",
        }
    }

    /// True when re-invoking the failed operation with the same inputs may
    /// succeed (transport-level trouble rather than a business rejection).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::GatewayUnavailable(_) | Self::DatabaseError(_) | Self::CacheError(_)
        )
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::CacheError(_) | Self::SerializationError(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Supplementary details exposed to the client, if safe to share.
    fn response_details(&self) -> Option<String> {
        match self {
            Self::AmountDiscrepancy { expected, received } => Some(format!(
                "expected {} but the gateway reported {}; refresh the cart and retry checkout",
                expected, received
            )),
            Self::CheckoutExpired(_) => Some(
                "restart checkout; if you were already charged, contact support with your \
                 transaction id"
                    .to_string(),
            ),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: self.response_details(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn discrepancy_maps_to_conflict_with_both_values() {
        let err = ServiceError::AmountDiscrepancy {
            expected: dec!(107.30),
            received: dec!(99.99),
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.error_code(), "amount_discrepancy");
        assert!(err.response_details().unwrap().contains("107.30"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn gateway_timeouts_are_retryable() {
        let err = ServiceError::GatewayUnavailable("request timed out".into());
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn expiry_is_distinct_from_not_found() {
        let expired = ServiceError::CheckoutExpired("session sess-1".into());
        let missing = ServiceError::NotFound("payment txn-1".into());
        assert_eq!(expired.status_code(), StatusCode::GONE);
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
        assert_ne!(expired.error_code(), missing.error_code());
    }
}
