use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        checkout_snapshot::{CheckoutData, CheckoutSnapshotStore},
        discount_codes::DiscountCodeService,
        gateway::{GatewayCheckoutRequest, PaymentGatewayAdapter},
        payments::PaymentRecordService,
        pricing::{CartLineItem, CouponDiscount, PricingEngine},
    },
};

/// Where the items being priced came from. Resolved once at entry; the
/// pricing engine operates uniformly on the resulting item list regardless
/// of source.
#[derive(Debug, Clone)]
pub enum CheckoutSource {
    /// A previously validated, time-bounded checkout snapshot.
    FromSnapshot(CheckoutData),
    /// A cart payload handed over by the cart collaborator.
    FromCart(Vec<CartLineItem>),
}

impl CheckoutSource {
    pub fn line_items(&self) -> &[CartLineItem] {
        match self {
            CheckoutSource::FromSnapshot(snapshot) => &snapshot.items,
            CheckoutSource::FromCart(items) => items,
        }
    }
}

/// Result of checkout-intent creation, echoed back to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutIntent {
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
    pub final_total: Decimal,
}

/// Handle the client uses to reach the gateway's payment page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayCheckoutHandle {
    pub transaction_id: String,
    pub checkout_id: String,
    pub redirect_url: String,
    pub amount: Decimal,
}

/// Orchestrates checkout: validates the cart, prices it, snapshots the
/// intent, and registers payment attempts with the gateway.
pub struct CheckoutService {
    snapshots: Arc<CheckoutSnapshotStore>,
    discount_codes: Arc<DiscountCodeService>,
    pricing: Arc<PricingEngine>,
    payments: Arc<PaymentRecordService>,
    gateway: Arc<dyn PaymentGatewayAdapter>,
    events: EventSender,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        snapshots: Arc<CheckoutSnapshotStore>,
        discount_codes: Arc<DiscountCodeService>,
        pricing: Arc<PricingEngine>,
        payments: Arc<PaymentRecordService>,
        gateway: Arc<dyn PaymentGatewayAdapter>,
        events: EventSender,
        currency: String,
    ) -> Self {
        Self {
            snapshots,
            discount_codes,
            pricing,
            payments,
            gateway,
            events,
            currency,
        }
    }

    /// Validate and price a cart, then snapshot the checkout intent with a
    /// bounded lifetime. The returned total is the only one the gateway will
    /// later be checked against.
    #[instrument(skip(self, source, shipping_details, billing_details))]
    pub async fn create_intent(
        &self,
        user_id: Uuid,
        source: CheckoutSource,
        shipping_details: serde_json::Value,
        billing_details: serde_json::Value,
        session_id: Option<String>,
        coupon_code: Option<String>,
    ) -> Result<CheckoutIntent, ServiceError> {
        let items = source.line_items();
        if items.is_empty() {
            return Err(ServiceError::InvalidOperation("cart is empty".to_string()));
        }

        let coupon = match &coupon_code {
            Some(code) => Some(self.discount_codes.resolve(code, user_id, items).await?),
            None => None,
        };

        let pricing = self.pricing.compute_totals(items, coupon.as_ref())?;

        let session_id = session_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let created_at = Utc::now();
        let expires_at = created_at
            + ChronoDuration::from_std(self.snapshots.ttl())
                .map_err(|e| ServiceError::InternalError(e.to_string()))?;

        let final_total = pricing.final_total;
        let snapshot = CheckoutData {
            session_id: session_id.clone(),
            user_id,
            items: items.to_vec(),
            shipping_details,
            billing_details,
            pricing,
            coupon_code: coupon.map(|c| c.code),
            created_at,
            expires_at,
        };

        self.snapshots.store(&snapshot).await?;

        self.events
            .send(Event::CheckoutStarted {
                session_id: session_id.clone(),
                user_id,
                final_total,
            })
            .await;

        info!(%session_id, %user_id, %final_total, "checkout intent created");

        Ok(CheckoutIntent {
            session_id,
            expires_at,
            final_total,
        })
    }

    /// Register a gateway checkout for a snapshotted intent and persist the
    /// matching `pending` payment record.
    #[instrument(skip(self))]
    pub async fn create_gateway_checkout(
        &self,
        session_id: &str,
        customer_email: &str,
    ) -> Result<GatewayCheckoutHandle, ServiceError> {
        let snapshot = self
            .snapshots
            .retrieve(session_id)
            .await?
            .ok_or_else(|| ServiceError::CheckoutExpired(format!("session {}", session_id)))?;

        let transaction_id = format!("txn-{}", Uuid::new_v4().simple());
        let amount = snapshot.pricing.final_total;

        let checkout = self
            .gateway
            .prepare_checkout(&GatewayCheckoutRequest {
                transaction_id: transaction_id.clone(),
                amount,
                currency: self.currency.clone(),
                customer_email: customer_email.to_string(),
            })
            .await?;

        self.payments
            .create_pending(
                &transaction_id,
                snapshot.user_id,
                amount,
                &self.currency,
                Some(checkout.checkout_id.clone()),
                Some(session_id.to_string()),
            )
            .await?;

        self.events
            .send(Event::GatewayCheckoutCreated {
                transaction_id: transaction_id.clone(),
                session_id: session_id.to_string(),
                amount,
            })
            .await;

        Ok(GatewayCheckoutHandle {
            transaction_id,
            checkout_id: checkout.checkout_id,
            redirect_url: checkout.redirect_url,
            amount,
        })
    }

    /// Re-derive the authoritative total for a snapshot, the same way the
    /// intent was priced. Used by the reconciler to validate the gateway's
    /// amount.
    pub fn recompute_snapshot_total(
        pricing: &PricingEngine,
        snapshot: &CheckoutData,
    ) -> Result<Decimal, ServiceError> {
        let source = CheckoutSource::FromSnapshot(snapshot.clone());
        let coupon = snapshot.coupon_code.as_ref().map(|code| CouponDiscount {
            code: code.clone(),
            pct: snapshot.pricing.coupon_discount_pct,
        });
        let result = pricing.compute_totals(source.line_items(), coupon.as_ref())?;
        Ok(result.final_total)
    }
}
