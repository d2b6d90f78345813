//! Payment gateway client
//!
//! The engine never trusts a callback body: it re-fetches the payment
//! status from the gateway by id. Lookups carry a hard timeout and surface
//! `GatewayUnavailable` rather than hanging a worker; the gateway's own
//! redelivery policy is the retry mechanism.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;

use crate::error::{LedgerError, LedgerResult};

type HmacSha256 = Hmac<Sha256>;

/// Tolerance for callback signature timestamps (5 minutes)
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Configuration for the payment gateway
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the gateway's payment-status API
    pub base_url: String,
    /// API key for status lookups
    pub api_key: String,
    /// Secret for callback signature verification
    pub webhook_secret: String,
    /// Hard timeout for status lookups
    pub request_timeout: Duration,
}

impl GatewayConfig {
    /// Create config from environment variables
    pub fn from_env() -> LedgerResult<Self> {
        Ok(Self {
            base_url: std::env::var("PAYMENT_GATEWAY_URL")
                .map_err(|_| LedgerError::Config("PAYMENT_GATEWAY_URL not set".to_string()))?,
            api_key: std::env::var("PAYMENT_GATEWAY_API_KEY")
                .map_err(|_| LedgerError::Config("PAYMENT_GATEWAY_API_KEY not set".to_string()))?,
            webhook_secret: std::env::var("PAYMENT_GATEWAY_WEBHOOK_SECRET").map_err(|_| {
                LedgerError::Config("PAYMENT_GATEWAY_WEBHOOK_SECRET not set".to_string())
            })?,
            request_timeout: Duration::from_millis(
                std::env::var("PAYMENT_GATEWAY_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10_000),
            ),
        })
    }
}

/// Normalized payment status as reported by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayPaymentStatus {
    Approved,
    Rejected,
    Cancelled,
    Pending,
}

/// A payment record fetched from the gateway by id
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayPayment {
    pub id: String,
    pub status: GatewayPaymentStatus,
    pub amount_cents: i64,
    /// The correlation payload attached at intent-creation time, echoed
    /// back by the gateway
    pub correlation_token: Option<String>,
}

/// Gateway client
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    config: GatewayConfig,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> LedgerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| LedgerError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    pub fn from_env() -> LedgerResult<Self> {
        Self::new(GatewayConfig::from_env()?)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Fetch the authoritative status of a payment by its external id.
    /// Transport failures and timeouts map to `GatewayUnavailable`.
    pub async fn fetch_payment(&self, external_payment_id: &str) -> LedgerResult<GatewayPayment> {
        let url = format!(
            "{}/v1/payments/{}",
            self.config.base_url.trim_end_matches('/'),
            external_payment_id
        );

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LedgerError::GatewayUnavailable(format!(
                "status lookup for {} returned {}",
                external_payment_id,
                response.status()
            )));
        }

        let payment: GatewayPayment = response.json().await?;

        tracing::debug!(
            payment_id = %payment.id,
            status = ?payment.status,
            amount_cents = payment.amount_cents,
            "Fetched payment status from gateway"
        );

        Ok(payment)
    }

    /// Verify an inbound callback signature.
    ///
    /// The signature header has the form `t=<unix>,v1=<hex>`; the signed
    /// payload is `<timestamp>.<body>` HMAC-SHA256ed with the webhook
    /// secret. Timestamps outside the tolerance window are rejected to
    /// limit replay.
    pub fn verify_callback(&self, payload: &str, signature: &str, now_unix: i64) -> LedgerResult<()> {
        verify_signature(
            &self.config.webhook_secret,
            payload,
            signature,
            now_unix,
        )
    }
}

/// Signature verification, split out for testability
fn verify_signature(
    secret: &str,
    payload: &str,
    signature: &str,
    now_unix: i64,
) -> LedgerResult<()> {
    // Parse the signature header: t=timestamp,v1=signature
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<String> = None;

    for part in signature.split(',') {
        let kv: Vec<&str> = part.splitn(2, '=').collect();
        if kv.len() == 2 {
            match kv[0] {
                "t" => timestamp = kv[1].parse().ok(),
                "v1" => v1_signature = Some(kv[1].to_string()),
                _ => {}
            }
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        LedgerError::CorrelationInvalid("missing timestamp in signature header".to_string())
    })?;

    let v1_signature = v1_signature.ok_or_else(|| {
        LedgerError::CorrelationInvalid("missing v1 signature in signature header".to_string())
    })?;

    if (now_unix - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(LedgerError::CorrelationInvalid(format!(
            "callback timestamp outside tolerance: {}s",
            (now_unix - timestamp).abs()
        )));
    }

    let signed_payload = format!("{}.{}", timestamp, payload);

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| LedgerError::Config("invalid webhook secret key".to_string()))?;
    mac.update(signed_payload.as_bytes());
    let computed = hex::encode(mac.finalize().into_bytes());

    if computed != v1_signature {
        tracing::error!("Callback signature mismatch");
        return Err(LedgerError::CorrelationInvalid(
            "callback signature mismatch".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn sign(payload: &str, timestamp: i64) -> String {
        let signed_payload = format!("{}.{}", timestamp, payload);
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(signed_payload.as_bytes());
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_valid_signature_accepted() {
        let payload = r#"{"type":"payment","externalPaymentId":"pay_123"}"#;
        let signature = sign(payload, 1_700_000_000);
        assert!(verify_signature(SECRET, payload, &signature, 1_700_000_000).is_ok());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let signature = sign(r#"{"externalPaymentId":"pay_123"}"#, 1_700_000_000);
        let err = verify_signature(
            SECRET,
            r#"{"externalPaymentId":"pay_999"}"#,
            &signature,
            1_700_000_000,
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::CorrelationInvalid(_)));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let payload = r#"{"externalPaymentId":"pay_123"}"#;
        let signature = sign(payload, 1_700_000_000);
        let err =
            verify_signature(SECRET, payload, &signature, 1_700_000_000 + 301).unwrap_err();
        assert!(matches!(err, LedgerError::CorrelationInvalid(_)));
    }

    #[test]
    fn test_malformed_header_rejected() {
        let payload = "{}";
        for bad in ["", "v1=abc", "t=notanumber,v1=abc", "garbage"] {
            assert!(verify_signature(SECRET, payload, bad, 1_700_000_000).is_err());
        }
    }

    #[test]
    fn test_timestamp_within_tolerance_accepted() {
        let payload = r#"{"externalPaymentId":"pay_123"}"#;
        let signature = sign(payload, 1_700_000_000);
        assert!(verify_signature(SECRET, payload, &signature, 1_700_000_000 + 299).is_ok());
    }

    #[test]
    fn test_payment_status_deserializes() {
        let payment: GatewayPayment = serde_json::from_str(
            r#"{"id":"pay_123","status":"approved","amount_cents":5000,
                "correlation_token":"oi_0123456789abcdef0123456789abcdef"}"#,
        )
        .unwrap();
        assert_eq!(payment.status, GatewayPaymentStatus::Approved);
        assert_eq!(payment.amount_cents, 5000);
    }
}
