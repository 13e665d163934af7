// Payment gateway client
//
// The wire contract is fixed: orders are created in minor units with HTTP
// Basic auth, the client callback is signed HMAC-SHA256 over
// "order_id|payment_id", and webhooks are signed HMAC-SHA256 over the raw
// body. Signature checks MUST be constant-time; both verifiers below go
// through `Mac::verify_slice`, which compares in constant time.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Gateway's view of a created order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
}

#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
    webhook_secret: String,
}

impl GatewayClient {
    pub fn new(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
        webhook_secret: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("reqwest client");

        Self {
            http,
            base_url: base_url.into(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Create an order at the gateway. Amount is integer minor units.
    /// Without configured key material this returns a mock order so local
    /// dev works end to end.
    pub async fn create_order(
        &self,
        event_id: &str,
        amount_minor_units: i64,
        receipt: &str,
    ) -> Result<GatewayOrder> {
        if self.key_id.is_empty() || self.key_secret.is_empty() {
            return Ok(GatewayOrder {
                id: format!("order_{}", &Uuid::new_v4().simple().to_string()[..12]),
                amount: amount_minor_units,
                currency: "INR".to_string(),
                status: "created".to_string(),
            });
        }

        let payload = serde_json::json!({
            "amount": amount_minor_units,
            "currency": "INR",
            "receipt": receipt,
            "notes": { "eventId": event_id },
        });

        let resp = self
            .http
            .post(format!("{}/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::GatewayUnavailable(format!("order request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(AppError::GatewayUnavailable(format!(
                "order request returned {}",
                resp.status()
            )));
        }

        resp.json::<GatewayOrder>()
            .await
            .map_err(|e| AppError::GatewayUnavailable(format!("order response parse failed: {}", e)))
    }

    /// Verify the client-callback signature:
    /// hex(HMAC_SHA256(key_secret, order_id + "|" + payment_id)).
    pub fn verify_payment_signature(
        &self,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> bool {
        if self.key_secret.is_empty() {
            return false;
        }
        let payload = format!("{}|{}", order_id, payment_id);
        verify_hex_hmac(self.key_secret.as_bytes(), payload.as_bytes(), signature)
    }

    /// Verify a webhook signature over the raw request body.
    pub fn verify_webhook_signature(&self, raw_body: &[u8], signature: &str) -> bool {
        if self.webhook_secret.is_empty() {
            return false;
        }
        verify_hex_hmac(self.webhook_secret.as_bytes(), raw_body, signature)
    }
}

/// Constant-time check of a hex-encoded HMAC-SHA256 tag.
fn verify_hex_hmac(key: &[u8], message: &[u8], signature_hex: &str) -> bool {
    let Ok(sig_bytes) = hex::decode(signature_hex) else {
        return false;
    };

    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message);
    // verify_slice is the constant-time comparison
    mac.verify_slice(&sig_bytes).is_ok()
}

/// Compute the hex HMAC tag, as the gateway would.
#[cfg(test)]
fn sign_hex_hmac(key: &[u8], message: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GatewayClient {
        GatewayClient::new("https://gateway.invalid/v1", "key_id", "key_secret", "whsec")
    }

    #[test]
    fn accepts_the_exact_signature() {
        let c = client();
        let sig = sign_hex_hmac(b"key_secret", b"order_123|pay_456");
        assert!(c.verify_payment_signature("order_123", "pay_456", &sig));
    }

    #[test]
    fn any_bit_flip_rejects() {
        let c = client();
        let sig = sign_hex_hmac(b"key_secret", b"order_123|pay_456");

        // Flip one bit in one hex digit at a time.
        for i in 0..sig.len() {
            let mut tampered = sig.clone().into_bytes();
            tampered[i] ^= 0x01;
            let tampered = String::from_utf8(tampered).unwrap();
            assert!(
                !c.verify_payment_signature("order_123", "pay_456", &tampered),
                "tampered signature accepted at hex position {}",
                i
            );
        }
    }

    #[test]
    fn swapped_ids_reject() {
        let c = client();
        let sig = sign_hex_hmac(b"key_secret", b"order_123|pay_456");
        assert!(!c.verify_payment_signature("pay_456", "order_123", &sig));
    }

    #[test]
    fn non_hex_signature_rejects() {
        let c = client();
        assert!(!c.verify_payment_signature("order_123", "pay_456", "zz-not-hex"));
    }

    #[test]
    fn webhook_signature_covers_raw_body() {
        let c = client();
        let body = br#"{"event":"payment.captured","payload":{}}"#;
        let sig = sign_hex_hmac(b"whsec", body);
        assert!(c.verify_webhook_signature(body, &sig));

        let other = br#"{"event":"payment.captured","payload":{ }}"#;
        assert!(!c.verify_webhook_signature(other, &sig));
    }

    #[test]
    fn unconfigured_secret_never_verifies() {
        let c = GatewayClient::new("https://gateway.invalid/v1", "", "", "");
        let sig = sign_hex_hmac(b"", b"order_123|pay_456");
        assert!(!c.verify_payment_signature("order_123", "pay_456", &sig));
        assert!(!c.verify_webhook_signature(b"{}", &sig));
    }

    #[tokio::test]
    async fn mock_order_without_key_material() {
        let c = GatewayClient::new("https://gateway.invalid/v1", "", "", "");
        let order = c.create_order("evt_1", 50_000, "rcpt_u_e").await.unwrap();
        assert!(order.id.starts_with("order_"));
        assert_eq!(order.amount, 50_000);
        assert_eq!(order.currency, "INR");
        assert_eq!(order.status, "created");
    }
}
