//! HyperPay (OPPWA-style) adapter: copy-and-pay checkouts, resource-path
//! verification on redirect return, and webhook payloads.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use rust_decimal::Decimal;
use tracing::{debug, instrument};

use crate::config::GatewayConfig;

use super::{
    GatewayCheckout, GatewayCheckoutRequest, GatewayError, PaymentConfirmation,
    PaymentGatewayAdapter, PaymentVerificationResult,
};

/// Result codes indicating a successfully processed transaction.
const SUCCESS_CODE_PATTERN: &str = r"^(000\.000\.|000\.100\.1|000\.[36])";
/// Result codes for transactions still pending on the gateway side.
const PENDING_CODE_PATTERN: &str = r"^(000\.200)";

pub struct HyperPayAdapter {
    http: Client,
    config: GatewayConfig,
    success_re: Regex,
    pending_re: Regex,
}

impl HyperPayAdapter {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let timeout = Duration::from_millis(config.timeout_ms.max(1));
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let success_re = Regex::new(SUCCESS_CODE_PATTERN)
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let pending_re = Regex::new(PENDING_CODE_PATTERN)
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            config,
            success_re,
            pending_re,
        })
    }

    fn map_transport_error(err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Transport(err.to_string())
        }
    }

    /// Classify a gateway status payload into a verification result.
    ///
    /// The configured already-processed codes count as success: a second
    /// confirmation of a captured payment must stay harmless.
    fn classify(
        &self,
        body: &serde_json::Value,
        fallback_transaction_id: Option<&str>,
    ) -> Result<PaymentVerificationResult, GatewayError> {
        let result_code = body
            .pointer("/result/code")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::MalformedPayload("missing result.code".to_string()))?
            .to_string();
        let description = body
            .pointer("/result/description")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        let transaction_id = body
            .get("merchantTransactionId")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| fallback_transaction_id.map(str::to_string))
            .ok_or_else(|| {
                GatewayError::MalformedPayload("missing merchantTransactionId".to_string())
            })?;

        let amount = body
            .get("amount")
            .and_then(|v| v.as_str())
            .map(|raw| {
                raw.parse::<Decimal>().map_err(|e| {
                    GatewayError::MalformedPayload(format!("unparseable amount {}: {}", raw, e))
                })
            })
            .transpose()?
            .unwrap_or(Decimal::ZERO);

        let payment_method = body
            .get("paymentBrand")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let already_processed = self
            .config
            .already_processed_codes
            .iter()
            .any(|code| code == &result_code);
        let successful = self.success_re.is_match(&result_code) || already_processed;

        if self.pending_re.is_match(&result_code) {
            debug!(%transaction_id, %result_code, "gateway reports transaction still pending");
        }
        if already_processed {
            debug!(%transaction_id, %result_code, "gateway reports resource already processed");
        }

        Ok(PaymentVerificationResult {
            successful,
            transaction_id,
            amount,
            payment_method,
            error_code: (!successful).then(|| result_code.clone()),
            error_message: (!successful).then(|| description.clone()),
            result_code,
            metadata: body.clone(),
        })
    }
}

#[async_trait]
impl PaymentGatewayAdapter for HyperPayAdapter {
    fn name(&self) -> &'static str {
        "hyperpay"
    }

    #[instrument(skip(self, request), fields(transaction_id = %request.transaction_id))]
    async fn prepare_checkout(
        &self,
        request: &GatewayCheckoutRequest,
    ) -> Result<GatewayCheckout, GatewayError> {
        let url = format!("{}/v1/checkouts", self.config.base_url);
        let amount = request.amount.round_dp(2).to_string();
        let params = [
            ("entityId", self.config.entity_id.as_str()),
            ("amount", amount.as_str()),
            ("currency", request.currency.as_str()),
            ("paymentType", "DB"),
            ("merchantTransactionId", request.transaction_id.as_str()),
            ("customer.email", request.customer_email.as_str()),
        ];

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.access_token)
            .form(&params)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GatewayError::MalformedPayload(e.to_string()))?;

        let checkout_id = body
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::MalformedPayload("missing checkout id".to_string()))?
            .to_string();

        let redirect_url = format!(
            "{}/v1/paymentWidgets.js?checkoutId={}",
            self.config.base_url, checkout_id
        );

        debug!(%checkout_id, "gateway checkout created");
        Ok(GatewayCheckout {
            checkout_id,
            redirect_url,
        })
    }

    async fn verify(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<PaymentVerificationResult, GatewayError> {
        match confirmation {
            PaymentConfirmation::RedirectReturn {
                transaction_id,
                resource_path,
            } => {
                let url = format!("{}{}", self.config.base_url, resource_path);
                let response = self
                    .http
                    .get(&url)
                    .query(&[("entityId", self.config.entity_id.as_str())])
                    .bearer_auth(&self.config.access_token)
                    .send()
                    .await
                    .map_err(Self::map_transport_error)?;

                let body: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| GatewayError::MalformedPayload(e.to_string()))?;

                self.classify(&body, Some(transaction_id))
            }
            PaymentConfirmation::Webhook { payload } => {
                // Notification bodies nest the transaction under `payload`.
                let body = payload.get("payload").unwrap_or(payload);
                self.classify(body, None)
            }
            #[cfg(feature = "simulated-payments")]
            PaymentConfirmation::Simulated {
                transaction_id,
                amount,
                successful,
            } => {
                tracing::warn!(%transaction_id, "simulated gateway confirmation in use");
                Ok(PaymentVerificationResult {
                    successful: *successful,
                    transaction_id: transaction_id.clone(),
                    amount: *amount,
                    payment_method: Some("SIMULATED".to_string()),
                    result_code: if *successful {
                        "000.100.110".to_string()
                    } else {
                        "800.100.152".to_string()
                    },
                    error_code: (!successful).then(|| "800.100.152".to_string()),
                    error_message: (!successful).then(|| "simulated decline".to_string()),
                    metadata: serde_json::Value::Null,
                })
            }
        }
    }
}
