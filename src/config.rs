use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use tracing::info;
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CACHE_TYPE: &str = "in-memory";
const DEFAULT_SNAPSHOT_TTL_SECS: u64 = 1800;
const DEFAULT_SESSION_INDEX_CAP: usize = 5;
const DEFAULT_GATEWAY_TIMEOUT_MS: u64 = 15_000;

/// Cache configuration (backs the checkout snapshot store)
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Type of cache to use: "in-memory" or "redis"
    #[serde(default = "default_cache_type")]
    pub cache_type: String,

    /// Redis connection URL for cache
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_type: default_cache_type(),
            redis_url: default_redis_url(),
        }
    }
}

/// Checkout session behavior
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CheckoutConfig {
    /// Snapshot lifetime in seconds. Fixed at creation; reads do not extend it.
    #[serde(default = "default_snapshot_ttl_secs")]
    pub snapshot_ttl_secs: u64,

    /// How many recent session keys to keep per user for recovery lookups.
    #[serde(default = "default_session_index_cap")]
    pub session_index_cap: usize,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            snapshot_ttl_secs: default_snapshot_ttl_secs(),
            session_index_cap: default_session_index_cap(),
        }
    }
}

/// Pricing knobs. Percentages are expressed as whole numbers (80 = 80%).
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PricingSettings {
    /// IVA rate applied to the post-discount, pre-shipping subtotal
    /// (as a decimal fraction, e.g. 0.15 for 15%)
    #[serde(default = "default_iva_rate")]
    #[validate(custom = "validate_rate_fraction")]
    pub iva_rate: f64,

    /// Volume discount tiers, ascending by quantity threshold.
    #[serde(default = "default_volume_tiers")]
    pub volume_tiers: Vec<VolumeTierSetting>,

    /// Flat shipping cost per checkout
    #[serde(default = "default_shipping_cost")]
    pub shipping_cost: f64,

    /// Seller share of shipping when a single seller fulfills the cart
    #[serde(default = "default_single_seller_share")]
    #[validate(custom = "validate_percentage")]
    pub single_seller_shipping_share: f64,

    /// Per-seller share of shipping when several sellers fulfill the cart
    #[serde(default = "default_multi_seller_share")]
    #[validate(custom = "validate_percentage")]
    pub multi_seller_shipping_share: f64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct VolumeTierSetting {
    pub min_quantity: u32,
    pub percentage: f64,
}

impl Default for PricingSettings {
    fn default() -> Self {
        Self {
            iva_rate: default_iva_rate(),
            volume_tiers: default_volume_tiers(),
            shipping_cost: default_shipping_cost(),
            single_seller_shipping_share: default_single_seller_share(),
            multi_seller_shipping_share: default_multi_seller_share(),
        }
    }
}

/// Payment gateway connection settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Base URL of the gateway API
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,

    /// Gateway entity/merchant identifier
    #[serde(default)]
    pub entity_id: String,

    /// Bearer token for gateway API calls
    #[serde(default)]
    pub access_token: String,

    /// Fixed timeout for gateway calls in milliseconds
    #[serde(default = "default_gateway_timeout_ms")]
    pub timeout_ms: u64,

    /// Result codes the gateway reports for an already-captured resource.
    /// These map to idempotent success, never to failure.
    #[serde(default = "default_already_processed_codes")]
    pub already_processed_codes: Vec<String>,

    /// ISO 4217 currency the gateway settles in
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_base_url(),
            entity_id: String::new(),
            access_token: String::new(),
            timeout_ms: default_gateway_timeout_ms(),
            already_processed_codes: default_already_processed_codes(),
            currency: default_currency(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to bootstrap the schema on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Cache backend configuration
    #[serde(default)]
    #[validate]
    pub cache: CacheConfig,

    /// Checkout session behavior
    #[serde(default)]
    #[validate]
    pub checkout: CheckoutConfig,

    /// Pricing configuration
    #[serde(default)]
    #[validate]
    pub pricing: PricingSettings,

    /// Payment gateway configuration
    #[serde(default)]
    #[validate]
    pub gateway: GatewayConfig,

    /// Absolute tolerance when comparing a verified gateway amount against
    /// the recomputed cart total (currency units)
    #[serde(default = "default_amount_tolerance")]
    pub amount_tolerance: f64,

    /// Webhook secret for verifying payment gateway callbacks
    #[serde(default)]
    pub payment_webhook_secret: Option<String>,

    /// Webhook timestamp tolerance (seconds)
    #[serde(default)]
    pub payment_webhook_tolerance_secs: Option<u64>,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl AppConfig {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }
}

fn default_cache_type() -> String {
    DEFAULT_CACHE_TYPE.to_string()
}
fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_snapshot_ttl_secs() -> u64 {
    DEFAULT_SNAPSHOT_TTL_SECS
}
fn default_session_index_cap() -> usize {
    DEFAULT_SESSION_INDEX_CAP
}
fn default_iva_rate() -> f64 {
    0.15
}
fn default_volume_tiers() -> Vec<VolumeTierSetting> {
    vec![
        VolumeTierSetting {
            min_quantity: 5,
            percentage: 5.0,
        },
        VolumeTierSetting {
            min_quantity: 10,
            percentage: 10.0,
        },
    ]
}
fn default_shipping_cost() -> f64 {
    5.0
}
fn default_single_seller_share() -> f64 {
    80.0
}
fn default_multi_seller_share() -> f64 {
    40.0
}
fn default_gateway_base_url() -> String {
    "https://eu-test.oppwa.com".to_string()
}
fn default_gateway_timeout_ms() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_MS
}
fn default_already_processed_codes() -> Vec<String> {
    vec!["700.400.580".to_string()]
}
fn default_currency() -> String {
    "USD".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_amount_tolerance() -> f64 {
    0.01
}
fn default_event_channel_capacity() -> usize {
    1024
}

fn validate_rate_fraction(rate: f64) -> Result<(), ValidationError> {
    if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
        let mut err = ValidationError::new("rate_out_of_range");
        err.message = Some("rate must be a finite fraction between 0.0 and 1.0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_percentage(pct: f64) -> Result<(), ValidationError> {
    if !pct.is_finite() || !(0.0..=100.0).contains(&pct) {
        let mut err = ValidationError::new("percentage_out_of_range");
        err.message = Some("percentage must be between 0 and 100".into());
        return Err(err);
    }
    Ok(())
}

/// Load configuration from config files and environment.
///
/// Layering: `config/default.toml`, then `config/{environment}.toml`, then
/// `APP__`-prefixed environment variables.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment = env::var("APP_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let cfg: AppConfig = Config::builder()
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, environment)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?
        .try_deserialize()?;

    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;

    info!(
        environment = %cfg.environment,
        port = cfg.port,
        cache = %cfg.cache.cache_type,
        "configuration loaded"
    );

    Ok(cfg)
}

/// Initialize the tracing subscriber from the configured level.
pub fn init_tracing(log_level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".to_string(),
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: true,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            cache: CacheConfig::default(),
            checkout: CheckoutConfig::default(),
            pricing: PricingSettings::default(),
            gateway: GatewayConfig::default(),
            amount_tolerance: default_amount_tolerance(),
            payment_webhook_secret: None,
            payment_webhook_tolerance_secs: None,
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    #[test]
    fn defaults_validate() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn iva_rate_must_be_a_fraction() {
        let mut cfg = base_config();
        cfg.pricing.iva_rate = 15.0; // percent, not fraction
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn shipping_shares_are_bounded() {
        let mut cfg = base_config();
        cfg.pricing.single_seller_shipping_share = 180.0;
        assert!(cfg.validate().is_err());
    }
}
