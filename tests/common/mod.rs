#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use tokio::sync::mpsc;
use uuid::Uuid;

use marketplace_checkout_api::{
    cache::InMemoryCache,
    config::{
        AppConfig, CacheConfig, CheckoutConfig, GatewayConfig, PricingSettings,
    },
    db,
    entities::discount_code,
    events::{Event, EventSender},
    handlers::AppServices,
    services::gateway::{
        GatewayCheckout, GatewayCheckoutRequest, GatewayError, PaymentConfirmation,
        PaymentGatewayAdapter, PaymentVerificationResult,
    },
    services::pricing::CartLineItem,
};

/// Gateway double: registers checkouts locally and never performs I/O.
/// Verification results are constructed directly by the tests.
pub struct MockGateway;

#[async_trait]
impl PaymentGatewayAdapter for MockGateway {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn prepare_checkout(
        &self,
        request: &GatewayCheckoutRequest,
    ) -> Result<GatewayCheckout, GatewayError> {
        Ok(GatewayCheckout {
            checkout_id: format!("chk-{}", request.transaction_id),
            redirect_url: format!("https://gateway.test/pay/{}", request.transaction_id),
        })
    }

    async fn verify(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<PaymentVerificationResult, GatewayError> {
        match confirmation {
            PaymentConfirmation::RedirectReturn { transaction_id, .. } => {
                Ok(successful_verification(transaction_id, Decimal::ZERO))
            }
            PaymentConfirmation::Webhook { .. } => Err(GatewayError::MalformedPayload(
                "mock gateway handles redirect returns only".to_string(),
            )),
            #[cfg(feature = "simulated-payments")]
            _ => Err(GatewayError::MalformedPayload(
                "unsupported confirmation".to_string(),
            )),
        }
    }
}

pub fn test_config(snapshot_ttl_secs: u64) -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        environment: "test".to_string(),
        log_level: "warn".to_string(),
        log_json: false,
        auto_migrate: true,
        cors_allowed_origins: None,
        db_max_connections: 1,
        db_min_connections: 1,
        db_connect_timeout_secs: 5,
        db_acquire_timeout_secs: 5,
        cache: CacheConfig::default(),
        checkout: CheckoutConfig {
            snapshot_ttl_secs,
            session_index_cap: 5,
        },
        pricing: PricingSettings::default(),
        gateway: GatewayConfig::default(),
        amount_tolerance: 0.01,
        payment_webhook_secret: None,
        payment_webhook_tolerance_secs: None,
        event_channel_capacity: 64,
    }
}

/// Everything the integration tests need: in-memory SQLite, in-memory
/// snapshot cache, mock gateway, and the wired service graph.
pub struct TestHarness {
    pub db: Arc<sea_orm::DatabaseConnection>,
    pub config: AppConfig,
    pub services: AppServices,
    _event_rx: mpsc::Receiver<Event>,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_snapshot_ttl(1800).await
    }

    pub async fn with_snapshot_ttl(snapshot_ttl_secs: u64) -> Self {
        let config = test_config(snapshot_ttl_secs);

        let pool = db::establish_connection_with_config(&db::DbConfig {
            url: config.database_url.clone(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .expect("in-memory sqlite");
        let db = Arc::new(pool);
        db::bootstrap_schema(&db).await.expect("schema bootstrap");

        let (event_tx, event_rx) = mpsc::channel(64);
        let event_sender = EventSender::new(event_tx);

        let services = AppServices::build(
            db.clone(),
            &config,
            Arc::new(InMemoryCache::new()),
            Arc::new(MockGateway),
            event_sender,
        )
        .expect("service graph");

        Self {
            db,
            config,
            services,
            _event_rx: event_rx,
        }
    }

    /// Seed a discount code; expiry defaults to one day out.
    pub async fn seed_discount_code(
        &self,
        code: &str,
        pct: Decimal,
        single_use: bool,
    ) -> discount_code::Model {
        discount_code::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            discount_pct: Set(pct),
            kind: Set(discount_code::DiscountKind::Coupon),
            owner_id: Set(None),
            single_use: Set(single_use),
            used: Set(false),
            used_by: Set(None),
            used_at: Set(None),
            order_id: Set(None),
            product_id: Set(None),
            seller_id: Set(None),
            expires_at: Set(Utc::now() + ChronoDuration::days(1)),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed discount code")
    }
}

pub fn line_item(qty: u32, unit_price: Decimal, seller_id: Uuid) -> CartLineItem {
    CartLineItem {
        product_id: Uuid::new_v4(),
        seller_id,
        quantity: qty,
        unit_price,
        seller_discount_pct: dec!(0),
        attributes: serde_json::Value::Null,
    }
}

pub fn successful_verification(transaction_id: &str, amount: Decimal) -> PaymentVerificationResult {
    PaymentVerificationResult {
        successful: true,
        transaction_id: transaction_id.to_string(),
        amount,
        payment_method: Some("VISA".to_string()),
        result_code: "000.100.110".to_string(),
        error_code: None,
        error_message: None,
        metadata: serde_json::Value::Null,
    }
}

pub fn failed_verification(transaction_id: &str, amount: Decimal) -> PaymentVerificationResult {
    PaymentVerificationResult {
        successful: false,
        transaction_id: transaction_id.to_string(),
        amount,
        payment_method: Some("VISA".to_string()),
        result_code: "800.100.152".to_string(),
        error_code: Some("800.100.152".to_string()),
        error_message: Some("transaction declined".to_string()),
        metadata: serde_json::Value::Null,
    }
}
