//! Payment gateway boundary.
//!
//! Each adapter normalizes its gateway's payload shapes into one
//! `PaymentVerificationResult`; nothing downstream of this module branches
//! on gateway identity.

pub mod hyperpay;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::ServiceError;

/// Normalized outcome of a gateway confirmation, whatever path it arrived
/// through. An "already processed" gateway response is reported as
/// `successful` so repeated confirmations stay harmless.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentVerificationResult {
    pub successful: bool,
    pub transaction_id: String,
    pub amount: Decimal,
    pub payment_method: Option<String>,
    pub result_code: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Transport-level gateway trouble, distinct from a business rejection: the
/// payment attempt is still undecided and the caller may retry.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request timed out")]
    Timeout,
    #[error("gateway transport error: {0}")]
    Transport(String),
    #[error("gateway returned a malformed payload: {0}")]
    MalformedPayload(String),
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Timeout => {
                ServiceError::GatewayUnavailable("request timed out".to_string())
            }
            GatewayError::Transport(msg) => ServiceError::GatewayUnavailable(msg),
            GatewayError::MalformedPayload(msg) => {
                ServiceError::BadRequest(format!("invalid gateway payload: {}", msg))
            }
        }
    }
}

/// A confirmation as it arrives from the outside world, before the adapter
/// normalizes it.
#[derive(Debug, Clone)]
pub enum PaymentConfirmation {
    /// The user returned from the gateway redirect with a resource path to
    /// resolve against the gateway API.
    RedirectReturn {
        transaction_id: String,
        resource_path: String,
    },
    /// Asynchronous gateway notification, already signature-verified.
    Webhook { payload: serde_json::Value },
    /// Test-only confirmation; never available in production builds.
    #[cfg(feature = "simulated-payments")]
    Simulated {
        transaction_id: String,
        amount: Decimal,
        successful: bool,
    },
}

#[derive(Debug, Clone)]
pub struct GatewayCheckoutRequest {
    pub transaction_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub customer_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayCheckout {
    pub checkout_id: String,
    pub redirect_url: String,
}

#[async_trait]
pub trait PaymentGatewayAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Register a checkout with the gateway and return the handle the client
    /// is redirected to.
    async fn prepare_checkout(
        &self,
        request: &GatewayCheckoutRequest,
    ) -> Result<GatewayCheckout, GatewayError>;

    /// Normalize a confirmation payload into a verification result.
    async fn verify(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<PaymentVerificationResult, GatewayError>;
}
