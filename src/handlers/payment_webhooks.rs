use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{errors::ServiceError, services::gateway::PaymentConfirmation, AppState};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_TOLERANCE_SECS: u64 = 300;

/// Acknowledgement distinguishing how the notification was handled. The
/// gateway only needs to know whether a retry could help.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    /// "processed", "payment_declined", "no_payment_found" or "rejected"
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// Asynchronous gateway confirmation path. Idempotent: a notification for an
/// already-completed payment acknowledges success without reprocessing.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Notification acknowledged", body = WebhookAck),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway unavailable, retry later", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    if let Some(secret) = state.config.payment_webhook_secret.clone() {
        let tolerance = state
            .config
            .payment_webhook_tolerance_secs
            .unwrap_or(DEFAULT_TOLERANCE_SECS);
        if !verify_signature(&headers, &body, &secret, tolerance) {
            warn!("payment webhook signature verification failed");
            return Err(ServiceError::InvalidSignature);
        }
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid json: {}", e)))?;

    let verification = state
        .services
        .gateway
        .verify(&PaymentConfirmation::Webhook { payload })
        .await?;

    let transaction_id = verification.transaction_id.clone();
    match state.services.reconciler.reconcile(&verification, None).await {
        Ok(outcome) => {
            info!(%transaction_id, success = outcome.success, "webhook reconciled");
            Ok(Json(WebhookAck {
                status: if outcome.success {
                    "processed".to_string()
                } else {
                    "payment_declined".to_string()
                },
                transaction_id: Some(transaction_id),
                order_id: outcome.order.map(|o| o.order_id),
                error_code: outcome.error_code,
            }))
        }
        Err(ServiceError::NotFound(_)) => {
            warn!(%transaction_id, "webhook for unknown payment");
            Ok(Json(WebhookAck {
                status: "no_payment_found".to_string(),
                transaction_id: Some(transaction_id),
                order_id: None,
                error_code: Some("not_found".to_string()),
            }))
        }
        // Retryable trouble propagates as an error status so the gateway
        // redelivers; business rejections are acknowledged to stop retries.
        Err(err) if err.is_retryable() => Err(err),
        Err(err) => {
            warn!(%transaction_id, error = %err, "webhook reconciliation rejected");
            Ok(Json(WebhookAck {
                status: "rejected".to_string(),
                transaction_id: Some(transaction_id),
                order_id: None,
                error_code: Some(err.error_code().to_string()),
            }))
        }
    }
}

/// Generic HMAC scheme: `x-timestamp` and `x-signature` headers over
/// `"{timestamp}.{body}"`, with a bounded timestamp skew.
fn verify_signature(headers: &HeaderMap, payload: &Bytes, secret: &str, tolerance_secs: u64) -> bool {
    let (Some(ts), Some(sig)) = (headers.get("x-timestamp"), headers.get("x-signature")) else {
        return false;
    };
    let (Ok(ts), Ok(sig)) = (ts.to_str(), sig.to_str()) else {
        return false;
    };

    if let Ok(ts_i) = ts.parse::<i64>() {
        let now = chrono::Utc::now().timestamp();
        if (now - ts_i).unsigned_abs() > tolerance_secs {
            return false;
        }
    } else {
        return false;
    }

    let signed = format!("{}.{}", ts, std::str::from_utf8(payload).unwrap_or(""));
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(signed.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, sig)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_headers(secret: &str, body: &str, ts: i64) -> HeaderMap {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", ts, body).as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());

        let mut headers = HeaderMap::new();
        headers.insert("x-timestamp", ts.to_string().parse().unwrap());
        headers.insert("x-signature", sig.parse().unwrap());
        headers
    }

    #[test]
    fn valid_signature_passes() {
        let body = r#"{"type":"PAYMENT"}"#;
        let ts = chrono::Utc::now().timestamp();
        let headers = signed_headers("whsec_test", body, ts);
        assert!(verify_signature(
            &headers,
            &Bytes::from(body.to_string()),
            "whsec_test",
            300
        ));
    }

    #[test]
    fn wrong_secret_fails() {
        let body = r#"{"type":"PAYMENT"}"#;
        let ts = chrono::Utc::now().timestamp();
        let headers = signed_headers("whsec_other", body, ts);
        assert!(!verify_signature(
            &headers,
            &Bytes::from(body.to_string()),
            "whsec_test",
            300
        ));
    }

    #[test]
    fn stale_timestamp_fails() {
        let body = r#"{"type":"PAYMENT"}"#;
        let ts = chrono::Utc::now().timestamp() - 3600;
        let headers = signed_headers("whsec_test", body, ts);
        assert!(!verify_signature(
            &headers,
            &Bytes::from(body.to_string()),
            "whsec_test",
            300
        ));
    }

    #[test]
    fn missing_headers_fail() {
        let headers = HeaderMap::new();
        assert!(!verify_signature(
            &headers,
            &Bytes::from_static(b"{}"),
            "whsec_test",
            300
        ));
    }
}
