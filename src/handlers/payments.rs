use axum::{
    extract::{Json, Path, State},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::payment::PaymentStatus,
    errors::ServiceError,
    services::gateway::PaymentConfirmation,
    ApiResponse, AppState,
};

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[schema(example = json!({
    "transaction_id": "txn-b9c7d2f8a1e34c59",
    "resource_path": "/v1/checkouts/8a82944a/payment",
    "session_id": "8b0dbb5c-6a1e-4f58-8a3c-2fb1a0a4f7d2"
}))]
pub struct VerifyPaymentRequest {
    /// Transaction id issued at gateway checkout creation
    #[validate(length(min = 1))]
    pub transaction_id: String,
    /// Resource path returned by the gateway redirect
    pub resource_path: Option<String>,
    /// Checkout session correlation key, when the client still has it
    #[serde(default)]
    pub session_id: Option<String>,
    /// Test-only: bypass the gateway with a simulated confirmation.
    /// The field does not exist in production builds.
    #[cfg(feature = "simulated-payments")]
    #[serde(default)]
    pub simulate_success: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VerifyPaymentResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "178.88")]
    pub total: Option<Decimal>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PaymentStatusResponse {
    pub transaction_id: String,
    pub status: PaymentStatus,
    #[schema(example = "178.88")]
    pub amount: Decimal,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Verify a payment after the user returns from the gateway redirect.
/// Idempotent: re-verifying a completed payment returns the existing order.
#[utoipa::path(
    post,
    path = "/api/v1/payments/verify",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Verification outcome", body = crate::ApiResponse<VerifyPaymentResponse>),
        (status = 404, description = "Unknown transaction id", body = crate::errors::ErrorResponse),
        (status = 409, description = "Amount discrepancy", body = crate::errors::ErrorResponse),
        (status = 410, description = "Checkout session expired", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    Json(request): Json<VerifyPaymentRequest>,
) -> Result<Json<ApiResponse<VerifyPaymentResponse>>, ServiceError> {
    request.validate()?;

    let confirmation = build_confirmation(&state, &request).await?;

    let verification = state.services.gateway.verify(&confirmation).await?;
    let outcome = state
        .services
        .reconciler
        .reconcile(&verification, request.session_id.as_deref())
        .await?;

    let response = VerifyPaymentResponse {
        success: outcome.success,
        order_id: outcome.order.as_ref().map(|o| o.order_id),
        order_number: outcome.order.as_ref().map(|o| o.order_number.clone()),
        total: outcome.order.as_ref().map(|o| o.total),
        message: outcome.message,
        error_code: outcome.error_code,
    };

    Ok(Json(ApiResponse::success(response)))
}

#[cfg(not(feature = "simulated-payments"))]
async fn build_confirmation(
    _state: &AppState,
    request: &VerifyPaymentRequest,
) -> Result<PaymentConfirmation, ServiceError> {
    let resource_path = request.resource_path.clone().ok_or_else(|| {
        ServiceError::ValidationError("resource_path is required".to_string())
    })?;
    Ok(PaymentConfirmation::RedirectReturn {
        transaction_id: request.transaction_id.clone(),
        resource_path,
    })
}

#[cfg(feature = "simulated-payments")]
async fn build_confirmation(
    state: &AppState,
    request: &VerifyPaymentRequest,
) -> Result<PaymentConfirmation, ServiceError> {
    if let Some(successful) = request.simulate_success {
        let record = state
            .services
            .payments
            .find_by_transaction_id(&request.transaction_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "payment with transaction id {}",
                    request.transaction_id
                ))
            })?;
        return Ok(PaymentConfirmation::Simulated {
            transaction_id: request.transaction_id.clone(),
            amount: record.amount,
            successful,
        });
    }

    let resource_path = request.resource_path.clone().ok_or_else(|| {
        ServiceError::ValidationError("resource_path is required".to_string())
    })?;
    Ok(PaymentConfirmation::RedirectReturn {
        transaction_id: request.transaction_id.clone(),
        resource_path,
    })
}

/// Current payment status. Read-only; never creates or mutates state.
#[utoipa::path(
    get,
    path = "/api/v1/payments/:transaction_id",
    params(
        ("transaction_id" = String, Path, description = "Transaction id")
    ),
    responses(
        (status = 200, description = "Payment status", body = crate::ApiResponse<PaymentStatusResponse>),
        (status = 404, description = "Unknown transaction id", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn get_payment_status(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<ApiResponse<PaymentStatusResponse>>, ServiceError> {
    let record = state
        .services
        .payments
        .find_by_transaction_id(&transaction_id)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("payment with transaction id {}", transaction_id))
        })?;

    let response = PaymentStatusResponse {
        transaction_id: record.transaction_id,
        status: record.status,
        amount: record.amount,
        currency: record.currency,
        order_id: record.order_id,
        error_code: record.error_code,
        error_message: record.error_message,
        created_at: record.created_at,
        updated_at: record.updated_at,
    };

    Ok(Json(ApiResponse::success(response)))
}

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/verify", post(verify_payment))
        .route("/webhook", post(super::payment_webhooks::payment_webhook))
        .route("/:transaction_id", get(get_payment_status))
}
