pub mod checkout;
pub mod payment_webhooks;
pub mod payments;

use std::sync::Arc;

use axum::Router;
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;

use crate::{
    cache::CacheBackend,
    config::AppConfig,
    errors::ServiceError,
    events::EventSender,
    services::{
        checkout::CheckoutService,
        checkout_snapshot::CheckoutSnapshotStore,
        discount_codes::DiscountCodeService,
        gateway::{hyperpay::HyperPayAdapter, PaymentGatewayAdapter},
        orders::OrderService,
        payments::PaymentRecordService,
        pricing::{PricingConfig, PricingEngine},
        reconciler::PaymentReconciler,
    },
    AppState,
};

/// Aggregated services used by the HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<CheckoutService>,
    pub payments: Arc<PaymentRecordService>,
    pub orders: Arc<OrderService>,
    pub discount_codes: Arc<DiscountCodeService>,
    pub reconciler: Arc<PaymentReconciler>,
    pub gateway: Arc<dyn PaymentGatewayAdapter>,
    pub snapshots: Arc<CheckoutSnapshotStore>,
}

impl AppServices {
    /// Wire the service graph from its leaf collaborators. Also used by the
    /// integration tests, with a mock gateway in place of HyperPay.
    pub fn build(
        db: Arc<DatabaseConnection>,
        config: &AppConfig,
        cache: Arc<dyn CacheBackend>,
        gateway: Arc<dyn PaymentGatewayAdapter>,
        event_sender: EventSender,
    ) -> Result<Self, ServiceError> {
        let pricing_config = PricingConfig::from_settings(&config.pricing)?;
        let pricing = Arc::new(PricingEngine::new(pricing_config));

        let snapshots = Arc::new(CheckoutSnapshotStore::new(
            cache,
            std::time::Duration::from_secs(config.checkout.snapshot_ttl_secs),
            config.checkout.session_index_cap,
        ));

        let discount_codes = Arc::new(DiscountCodeService::new(db.clone()));
        let payments = Arc::new(PaymentRecordService::new(db.clone()));
        let orders = Arc::new(OrderService::new(db.clone()));

        let amount_tolerance = Decimal::try_from(config.amount_tolerance)
            .map_err(|e| ServiceError::InternalError(format!("amount_tolerance: {}", e)))?;

        let reconciler = Arc::new(PaymentReconciler::new(
            db,
            payments.clone(),
            orders.clone(),
            discount_codes.clone(),
            snapshots.clone(),
            pricing.clone(),
            event_sender.clone(),
            amount_tolerance,
        ));

        let checkout = Arc::new(CheckoutService::new(
            snapshots.clone(),
            discount_codes.clone(),
            pricing,
            payments.clone(),
            gateway.clone(),
            event_sender,
            config.gateway.currency.clone(),
        ));

        Ok(Self {
            checkout,
            payments,
            orders,
            discount_codes,
            reconciler,
            gateway,
            snapshots,
        })
    }

    /// Production wiring with the HyperPay adapter.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: &AppConfig,
        cache: Arc<dyn CacheBackend>,
        event_sender: EventSender,
    ) -> Result<Self, ServiceError> {
        let gateway: Arc<dyn PaymentGatewayAdapter> = Arc::new(
            HyperPayAdapter::new(config.gateway.clone())
                .map_err(|e| ServiceError::InternalError(e.to_string()))?,
        );
        Self::build(db, config, cache, gateway, event_sender)
    }
}

/// Versioned API surface.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/checkout", checkout::checkout_routes())
        .nest("/payments", payments::payment_routes())
}
