use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::post,
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    errors::ServiceError,
    services::{checkout::CheckoutSource, pricing::CartLineItem},
    ApiResponse, AppState,
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckoutItemRequest {
    pub product_id: Uuid,
    pub seller_id: Uuid,
    /// Must be at least 1; zero-quantity lines are rejected before pricing.
    #[schema(example = 2, minimum = 1)]
    pub quantity: u32,
    /// Unit base price in currency units
    #[schema(example = "49.99")]
    pub unit_price: Decimal,
    /// Seller discount percentage (0-100)
    #[serde(default)]
    #[schema(example = "10")]
    pub seller_discount_pct: Decimal,
    /// Opaque item attributes (size, color); never affect pricing
    #[serde(default)]
    pub attributes: serde_json::Value,
}

impl From<CheckoutItemRequest> for CartLineItem {
    fn from(req: CheckoutItemRequest) -> Self {
        CartLineItem {
            product_id: req.product_id,
            seller_id: req.seller_id,
            quantity: req.quantity,
            unit_price: req.unit_price,
            seller_discount_pct: req.seller_discount_pct,
            attributes: req.attributes,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[schema(example = json!({
    "user_id": "550e8400-e29b-41d4-a716-446655440000",
    "items": [{
        "product_id": "9b2cdd2e-3f3e-4a52-9a30-5a3f0f0c7f11",
        "seller_id": "1c1dc2a4-8f62-4b0e-96a8-77f6f7bb6b10",
        "quantity": 2,
        "unit_price": "49.99",
        "seller_discount_pct": "10"
    }],
    "shipping_address": {"line1": "123 Test Street", "city": "Test City"},
    "discount_code": "SAVE10"
}))]
pub struct CreateCheckoutRequest {
    /// Cart owner
    pub user_id: Uuid,
    /// Validated cart lines handed over by the cart collaborator
    #[validate(length(min = 1, message = "cart is empty"))]
    pub items: Vec<CheckoutItemRequest>,
    /// Shipping payload, opaque to pricing
    pub shipping_address: serde_json::Value,
    /// Billing payload; defaults to the shipping payload
    #[serde(default)]
    pub billing_address: Option<serde_json::Value>,
    /// Client-supplied correlation key; generated server-side when absent
    #[serde(default)]
    pub session_id: Option<String>,
    /// Feedback or coupon discount code
    #[serde(default)]
    pub discount_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckoutIntentResponse {
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
    #[schema(example = "178.88")]
    pub final_total: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[schema(example = json!({
    "session_id": "8b0dbb5c-6a1e-4f58-8a3c-2fb1a0a4f7d2",
    "customer_email": "buyer@example.com"
}))]
pub struct CreateGatewayCheckoutRequest {
    /// Checkout session returned by intent creation
    #[validate(length(min = 1))]
    pub session_id: String,
    /// Customer identity forwarded to the gateway
    #[validate(email)]
    pub customer_email: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GatewayCheckoutResponse {
    pub transaction_id: String,
    pub checkout_id: String,
    pub redirect_url: String,
    #[schema(example = "178.88")]
    pub amount: Decimal,
}

/// Create a checkout intent: recompute the cart's totals from authoritative
/// data and snapshot them with a bounded lifetime.
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = CreateCheckoutRequest,
    responses(
        (status = 201, description = "Checkout intent created", body = crate::ApiResponse<CheckoutIntentResponse>),
        (status = 422, description = "Validation failure", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn create_checkout(
    State(state): State<AppState>,
    Json(request): Json<CreateCheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutIntentResponse>>), ServiceError> {
    request.validate()?;

    let billing = request
        .billing_address
        .unwrap_or_else(|| request.shipping_address.clone());
    let items: Vec<CartLineItem> = request.items.into_iter().map(Into::into).collect();

    let intent = state
        .services
        .checkout
        .create_intent(
            request.user_id,
            CheckoutSource::FromCart(items),
            request.shipping_address,
            billing,
            request.session_id,
            request.discount_code,
        )
        .await?;

    let response = CheckoutIntentResponse {
        session_id: intent.session_id,
        expires_at: intent.expires_at,
        final_total: intent.final_total,
    };

    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))))
}

/// Register a gateway checkout for a snapshotted intent; persists the
/// `pending` payment record the confirmation paths will reconcile against.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/payment",
    request_body = CreateGatewayCheckoutRequest,
    responses(
        (status = 201, description = "Gateway checkout created", body = crate::ApiResponse<GatewayCheckoutResponse>),
        (status = 410, description = "Checkout session expired", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn create_gateway_checkout(
    State(state): State<AppState>,
    Json(request): Json<CreateGatewayCheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<GatewayCheckoutResponse>>), ServiceError> {
    request.validate()?;

    let handle = state
        .services
        .checkout
        .create_gateway_checkout(&request.session_id, &request.customer_email)
        .await?;

    let response = GatewayCheckoutResponse {
        transaction_id: handle.transaction_id,
        checkout_id: handle.checkout_id,
        redirect_url: handle.redirect_url,
        amount: handle.amount,
    };

    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))))
}

pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_checkout))
        .route("/payment", post(create_gateway_checkout))
}
