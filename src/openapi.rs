use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Marketplace Checkout API",
        version = "1.0.0",
        description = r#"
Checkout pricing and payment reconciliation for the marketplace platform.

- **Checkout intents**: server-side recomputation of cart totals (seller,
  volume and coupon discounts, IVA, shipping split) snapshotted with a
  bounded lifetime
- **Gateway checkouts**: payment registration with the gateway and a
  `pending` payment record per attempt
- **Payment verification**: idempotent reconciliation of redirect-return,
  webhook and manual confirmations into at most one order per payment
- **Status queries**: read-only payment state for polling UIs
"#
    ),
    paths(
        crate::handlers::checkout::create_checkout,
        crate::handlers::checkout::create_gateway_checkout,
        crate::handlers::payments::verify_payment,
        crate::handlers::payments::get_payment_status,
        crate::handlers::payment_webhooks::payment_webhook,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::handlers::checkout::CheckoutItemRequest,
        crate::handlers::checkout::CreateCheckoutRequest,
        crate::handlers::checkout::CheckoutIntentResponse,
        crate::handlers::checkout::CreateGatewayCheckoutRequest,
        crate::handlers::checkout::GatewayCheckoutResponse,
        crate::handlers::payments::VerifyPaymentRequest,
        crate::handlers::payments::VerifyPaymentResponse,
        crate::handlers::payments::PaymentStatusResponse,
        crate::handlers::payment_webhooks::WebhookAck,
    )),
    tags(
        (name = "Checkout", description = "Checkout intent and gateway checkout creation"),
        (name = "Payments", description = "Payment verification, webhooks and status")
    )
)]
pub struct ApiDoc;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi())
}
