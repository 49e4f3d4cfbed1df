//! Razorpay gateway client.
//!
//! Covers the two calls the payment core needs: minting an order
//! (`POST /orders`) and fetching the authoritative payment record
//! (`GET /payments/{id}`), plus the checkout signature scheme
//! `HMAC-SHA256(key_secret, order_id + "|" + payment_id)`.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::AppConfig;

type HmacSha256 = Hmac<Sha256>;

/// Gateway payment states. Only `captured` settles a transaction.
pub const PAYMENT_STATUS_CAPTURED: &str = "captured";

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("gateway not configured: {0}")]
    NotConfigured(String),
    #[error("gateway unreachable: {0}")]
    Unreachable(String),
    #[error("gateway rejected the call: {code}: {description}")]
    Api { code: String, description: String },
    #[error("gateway returned an unreadable response: {0}")]
    BadResponse(String),
}

/// Order-creation body for `POST /orders`. Amounts are in the minor unit
/// (paise for INR).
#[derive(Debug, Serialize)]
pub struct CreateOrderBody {
    pub amount: u64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<serde_json::Value>,
}

/// An order as Razorpay reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RazorpayOrder {
    pub id: String,
    pub amount: u64,
    pub currency: String,
    #[serde(default)]
    pub receipt: Option<String>,
    pub status: String,
    #[serde(default)]
    pub notes: Option<serde_json::Value>,
    #[serde(default)]
    pub created_at: Option<u64>,
}

/// A payment as Razorpay reports it. `status` is one of
/// `created|authorized|captured|refunded|failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RazorpayPayment {
    pub id: String,
    pub amount: u64,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub captured: Option<bool>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub created_at: Option<u64>,
}

impl RazorpayPayment {
    pub fn is_captured(&self) -> bool {
        self.status == PAYMENT_STATUS_CAPTURED
    }

    /// Human-readable reason a payment did not capture, for the audit log.
    pub fn failure_reason(&self) -> String {
        match &self.error_description {
            Some(desc) => format!("{} ({})", self.status, desc),
            None => self.status.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RazorpayErrorEnvelope {
    error: RazorpayErrorDetail,
}

#[derive(Debug, Deserialize)]
struct RazorpayErrorDetail {
    code: String,
    description: String,
}

/// The calls the payment core makes against the gateway. Implemented by
/// [`RazorpayClient`] in production and by a scripted fake in tests.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(
        &self,
        amount_minor: u64,
        currency: &str,
        receipt: Option<String>,
        notes: Option<serde_json::Value>,
    ) -> Result<RazorpayOrder, GatewayError>;

    async fn fetch_payment(&self, payment_id: &str) -> Result<RazorpayPayment, GatewayError>;
}

/// HTTP client for the Razorpay Orders/Payments API. Basic auth with the key
/// pair; every call is bounded by the configured timeout.
pub struct RazorpayClient {
    client: Client,
    key_id: String,
    key_secret: String,
    api_base: String,
}

impl RazorpayClient {
    pub fn new(key_id: String, key_secret: String, api_base: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            key_id,
            key_secret,
            api_base,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(
            cfg.razorpay_key_id.clone(),
            cfg.razorpay_key_secret.clone(),
            cfg.razorpay_api_base.clone(),
            cfg.gateway_timeout(),
        )
    }

    pub fn is_configured(&self) -> bool {
        !self.key_id.is_empty() && !self.key_secret.is_empty()
    }

    fn ensure_configured(&self) -> Result<(), GatewayError> {
        if self.is_configured() {
            Ok(())
        } else {
            Err(GatewayError::NotConfigured(
                "razorpay key id/secret are not set".to_string(),
            ))
        }
    }

    fn decode_error(status: reqwest::StatusCode, body: &str) -> GatewayError {
        match serde_json::from_str::<RazorpayErrorEnvelope>(body) {
            Ok(envelope) => GatewayError::Api {
                code: envelope.error.code,
                description: envelope.error.description,
            },
            Err(_) => GatewayError::Api {
                code: status.as_u16().to_string(),
                description: body.to_string(),
            },
        }
    }
}

#[async_trait]
impl PaymentGateway for RazorpayClient {
    async fn create_order(
        &self,
        amount_minor: u64,
        currency: &str,
        receipt: Option<String>,
        notes: Option<serde_json::Value>,
    ) -> Result<RazorpayOrder, GatewayError> {
        self.ensure_configured()?;

        let body = CreateOrderBody {
            amount: amount_minor,
            currency: currency.to_string(),
            receipt,
            notes,
        };
        let url = format!("{}/orders", self.api_base);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::BadResponse(e.to_string()))?;
        debug!(status = %status, body = %text, "razorpay create_order response");

        if status.is_success() {
            let order: RazorpayOrder = serde_json::from_str(&text)
                .map_err(|e| GatewayError::BadResponse(e.to_string()))?;
            info!(
                order_id = %order.id,
                amount = order.amount,
                currency = %order.currency,
                "razorpay order created"
            );
            Ok(order)
        } else {
            let err = Self::decode_error(status, &text);
            error!(error = %err, "razorpay order creation failed");
            Err(err)
        }
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<RazorpayPayment, GatewayError> {
        self.ensure_configured()?;

        let url = format!("{}/payments/{}", self.api_base, payment_id);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::BadResponse(e.to_string()))?;
        debug!(status = %status, body = %text, "razorpay fetch_payment response");

        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| GatewayError::BadResponse(e.to_string()))
        } else {
            Err(Self::decode_error(status, &text))
        }
    }
}

/// Hex HMAC-SHA256 over `order_id|payment_id`, the value Razorpay checkout
/// hands back as `razorpay_signature`.
pub fn payment_signature(key_secret: &str, order_id: &str, payment_id: &str) -> String {
    let payload = format!("{}|{}", order_id, payment_id);
    let mut mac = HmacSha256::new_from_slice(key_secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Comparison that does not leak the mismatch position through timing.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{basic_auth, body_json_string, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base: String) -> RazorpayClient {
        RazorpayClient::new(
            "rzp_test_key".to_string(),
            "rzp_test_secret".to_string(),
            base,
            Duration::from_secs(5),
        )
    }

    #[test]
    fn signature_is_deterministic_and_position_sensitive() {
        let sig = payment_signature("my_secret", "order_abc", "pay_xyz");
        assert_eq!(sig, payment_signature("my_secret", "order_abc", "pay_xyz"));
        assert_ne!(sig, payment_signature("my_secret", "pay_xyz", "order_abc"));
        assert_ne!(sig, payment_signature("other_secret", "order_abc", "pay_xyz"));
        // hex-encoded SHA-256 output
        assert_eq!(sig.len(), 64);
    }

    #[test]
    fn constant_time_eq_handles_length_mismatch() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
        assert!(!constant_time_eq("", "a"));
    }

    #[test]
    fn failure_reason_includes_gateway_description() {
        let payment = RazorpayPayment {
            id: "pay_1".into(),
            amount: 50_000,
            currency: "INR".into(),
            status: "failed".into(),
            order_id: None,
            method: None,
            captured: Some(false),
            error_code: Some("BAD_REQUEST_ERROR".into()),
            error_description: Some("Payment declined by bank".into()),
            created_at: None,
        };
        assert!(!payment.is_captured());
        assert_eq!(payment.failure_reason(), "failed (Payment declined by bank)");
    }

    #[tokio::test]
    async fn create_order_posts_minor_units_with_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .and(basic_auth("rzp_test_key", "rzp_test_secret"))
            .and(body_json_string(
                r#"{"amount":50000,"currency":"INR","receipt":"repair_7"}"#,
            ))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"id":"order_wire_1","amount":50000,"currency":"INR","receipt":"repair_7","status":"created","created_at":1700000000}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let order = client(server.uri())
            .create_order(50_000, "INR", Some("repair_7".to_string()), None)
            .await
            .expect("order should be created");
        assert_eq!(order.id, "order_wire_1");
        assert_eq!(order.amount, 50_000);
        assert_eq!(order.status, "created");
    }

    #[tokio::test]
    async fn create_order_surfaces_api_error_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(400).set_body_raw(
                r#"{"error":{"code":"BAD_REQUEST_ERROR","description":"amount must be at least 100"}}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let err = client(server.uri())
            .create_order(1, "INR", None, None)
            .await
            .expect_err("gateway rejection expected");
        match err {
            GatewayError::Api { code, description } => {
                assert_eq!(code, "BAD_REQUEST_ERROR");
                assert!(description.contains("at least 100"));
            }
            other => panic!("expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn fetch_payment_decodes_captured_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/payments/pay_wire_9"))
            .and(basic_auth("rzp_test_key", "rzp_test_secret"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"id":"pay_wire_9","amount":120000,"currency":"INR","status":"captured","order_id":"order_wire_1","method":"upi","captured":true}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let payment = client(server.uri())
            .fetch_payment("pay_wire_9")
            .await
            .expect("payment should be fetched");
        assert!(payment.is_captured());
        assert_eq!(payment.order_id.as_deref(), Some("order_wire_1"));
    }

    #[tokio::test]
    async fn unconfigured_client_fails_before_any_network_call() {
        let bare = RazorpayClient::new(
            String::new(),
            String::new(),
            "http://127.0.0.1:1".to_string(),
            Duration::from_secs(1),
        );
        assert!(matches!(
            bare.create_order(100, "INR", None, None).await,
            Err(GatewayError::NotConfigured(_))
        ));
        assert!(matches!(
            bare.fetch_payment("pay_x").await,
            Err(GatewayError::NotConfigured(_))
        ));
    }
}
