//! Stripe payment provider.
//!
//! Talks to the Stripe REST API directly over HTTPS: checkout sessions are
//! created with a form-encoded POST, and webhook deliveries are verified
//! with the `Stripe-Signature` HMAC scheme before any of the payload is
//! parsed or trusted.

use axum::http::HeaderMap;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use sqlx::PgPool;
use tracing::{debug, info, instrument, warn};

use crate::{
    api::models::users::CurrentUser,
    config::{CreditPackage, StripeConfig},
    db::handlers::Credits,
    db::models::credits::{AdjustOutcome, CreditAdjustment},
};

use super::{PaymentError, PaymentProvider, Result, WebhookEvent};

/// Maximum allowed age of a webhook timestamp, in seconds. Matches the
/// default tolerance of Stripe's own SDKs.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

pub struct StripeProvider {
    client: reqwest::Client,
    api_key: String,
    webhook_secret: String,
    api_base: String,
}

impl From<StripeConfig> for StripeProvider {
    fn from(config: StripeConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key,
            webhook_secret: config.webhook_secret,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionResponse {
    url: String,
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: StripeEventObject,
}

#[derive(Debug, Deserialize)]
struct StripeEventObject {
    id: String,
    #[serde(default)]
    metadata: std::collections::HashMap<String, String>,
}

/// Compute the hex HMAC-SHA256 signature Stripe expects for a payload.
///
/// The signed payload is `"{timestamp}.{body}"` keyed with the endpoint's
/// signing secret.
pub fn sign_payload(timestamp: i64, body: &str, secret: &str) -> Option<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(format!("{timestamp}.{body}").as_bytes());
    Some(hex_encode(&mac.finalize().into_bytes()))
}

/// Build a complete `Stripe-Signature` header value for a payload. Used by
/// tests to simulate deliveries.
#[cfg(any(test, feature = "test-utils"))]
pub fn signature_header(timestamp: i64, body: &str, secret: &str) -> String {
    let signature = sign_payload(timestamp, body, secret).expect("signing never fails");
    format!("t={timestamp},v1={signature}")
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Constant-time equality over the hex signature strings. Early-exit
/// comparison would leak how many leading characters match.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

impl StripeProvider {
    /// Verify a `Stripe-Signature` header against the raw body.
    ///
    /// The header looks like `t=<unix ts>,v1=<hex hmac>[,v1=...]`. Any one
    /// matching `v1` signature within the timestamp tolerance is accepted.
    fn verify_signature(&self, header: &str, body: &str) -> Result<()> {
        let mut timestamp: Option<i64> = None;
        let mut candidates: Vec<&str> = Vec::new();

        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => {
                    timestamp = value.parse().ok();
                }
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(PaymentError::InvalidSignature)?;
        if candidates.is_empty() {
            return Err(PaymentError::InvalidSignature);
        }

        let age = (Utc::now().timestamp() - timestamp).abs();
        if age > SIGNATURE_TOLERANCE_SECS {
            debug!(age_secs = age, "rejecting webhook with stale timestamp");
            return Err(PaymentError::InvalidSignature);
        }

        let expected = sign_payload(timestamp, body, &self.webhook_secret).ok_or(PaymentError::InvalidSignature)?;
        if candidates.iter().any(|candidate| constant_time_eq(candidate, &expected)) {
            Ok(())
        } else {
            Err(PaymentError::InvalidSignature)
        }
    }
}

#[async_trait::async_trait]
impl PaymentProvider for StripeProvider {
    #[instrument(skip(self, _db_pool, user, package), fields(user_id = %user.id, package = %package.id))]
    async fn create_checkout_session(
        &self,
        _db_pool: &PgPool,
        user: &CurrentUser,
        package: &CreditPackage,
        cancel_url: &str,
        success_url: &str,
    ) -> Result<String> {
        let user_id = user.id.to_string();
        let credits = package.credits.to_string();
        let params: Vec<(&str, &str)> = vec![
            ("mode", "payment"),
            ("success_url", success_url),
            ("cancel_url", cancel_url),
            ("line_items[0][price]", &package.price_id),
            ("line_items[0][quantity]", "1"),
            ("client_reference_id", &user_id),
            // Attached server-side; echoed back in the completion webhook
            // and trusted there because the payload is signed.
            ("metadata[user_id]", &user_id),
            ("metadata[credits]", &credits),
        ];

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .basic_auth(&self.api_key, None::<&str>)
            .form(&params)
            .send()
            .await
            .map_err(|e| PaymentError::ProviderApi(format!("Failed to reach Stripe: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PaymentError::ProviderApi(format!(
                "Stripe checkout session creation failed ({status}): {text}"
            )));
        }

        let session: CheckoutSessionResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::InvalidData(format!("Unexpected Stripe response: {e}")))?;

        info!(user_id = %user.id, package = %package.id, "created Stripe checkout session");
        Ok(session.url)
    }

    async fn validate_webhook(&self, headers: &HeaderMap, body: &str) -> Result<Option<WebhookEvent>> {
        let signature = headers
            .get("stripe-signature")
            .and_then(|value| value.to_str().ok())
            .ok_or(PaymentError::InvalidSignature)?;

        // Signature first, over the raw body. Nothing in the payload is
        // parsed until this passes.
        self.verify_signature(signature, body)?;

        let event: StripeEvent =
            serde_json::from_str(body).map_err(|e| PaymentError::InvalidData(format!("Malformed event payload: {e}")))?;

        if event.event_type != CHECKOUT_COMPLETED {
            debug!(event_type = %event.event_type, "ignoring unhandled Stripe event type");
            return Ok(Some(WebhookEvent {
                event_type: event.event_type,
                session_id: None,
                user_id: None,
                credits: None,
            }));
        }

        let object = event.data.object;
        let user_id = object
            .metadata
            .get("user_id")
            .and_then(|value| value.parse().ok())
            .ok_or_else(|| PaymentError::InvalidData("Session metadata missing user_id".to_string()))?;
        let credits = object
            .metadata
            .get("credits")
            .and_then(|value| value.parse().ok())
            .ok_or_else(|| PaymentError::InvalidData("Session metadata missing credits".to_string()))?;

        Ok(Some(WebhookEvent {
            event_type: event.event_type,
            session_id: Some(object.id),
            user_id: Some(user_id),
            credits: Some(credits),
        }))
    }

    #[instrument(skip(self, db_pool, event), fields(event_type = %event.event_type))]
    async fn process_webhook_event(&self, db_pool: &PgPool, event: &WebhookEvent) -> Result<()> {
        if event.event_type != CHECKOUT_COMPLETED {
            return Ok(());
        }

        let session_id = event
            .session_id
            .as_deref()
            .ok_or_else(|| PaymentError::InvalidData("Event missing session id".to_string()))?;
        let user_id = event
            .user_id
            .ok_or_else(|| PaymentError::InvalidData("Event missing user id".to_string()))?;
        let credits = event
            .credits
            .ok_or_else(|| PaymentError::InvalidData("Event missing credit amount".to_string()))?;
        if credits <= 0 {
            return Err(PaymentError::InvalidData(format!("Invalid credit amount: {credits}")));
        }

        let mut conn = db_pool.acquire().await?;
        let adjustment = CreditAdjustment::purchase(user_id, credits, session_id);
        match Credits::new(&mut conn).adjust(&adjustment).await? {
            AdjustOutcome::Applied { balance } => {
                info!(user_id = %user_id, credits, balance, "credited purchase");
                Ok(())
            }
            AdjustOutcome::InsufficientFunds => {
                // Unreachable for a positive amount; keep the arm explicit
                // rather than panicking.
                warn!(user_id = %user_id, credits, "purchase credit unexpectedly rejected");
                Err(PaymentError::InvalidData("Purchase credit rejected".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_user;

    fn provider(secret: &str) -> StripeProvider {
        StripeProvider::from(StripeConfig {
            api_key: "sk_test_123".to_string(),
            webhook_secret: secret.to_string(),
            api_base: "https://api.stripe.com".to_string(),
        })
    }

    fn completed_event_body(session_id: &str, user_id: &str, credits: &str) -> String {
        serde_json::json!({
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": session_id,
                    "metadata": { "user_id": user_id, "credits": credits }
                }
            }
        })
        .to_string()
    }

    fn signed_headers(timestamp: i64, body: &str, secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "stripe-signature",
            signature_header(timestamp, body, secret).parse().unwrap(),
        );
        headers
    }

    #[test_log::test(tokio::test)]
    async fn valid_signature_extracts_metadata() {
        let provider = provider("whsec_test");
        let user_id = uuid::Uuid::new_v4();
        let body = completed_event_body("cs_test_1", &user_id.to_string(), "100");
        let headers = signed_headers(Utc::now().timestamp(), &body, "whsec_test");

        let event = provider.validate_webhook(&headers, &body).await.unwrap().unwrap();
        assert_eq!(event.event_type, "checkout.session.completed");
        assert_eq!(event.session_id.as_deref(), Some("cs_test_1"));
        assert_eq!(event.user_id, Some(user_id));
        assert_eq!(event.credits, Some(100));
    }

    #[test_log::test(tokio::test)]
    async fn wrong_secret_is_rejected() {
        let provider = provider("whsec_test");
        let body = completed_event_body("cs_test_1", &uuid::Uuid::new_v4().to_string(), "100");
        let headers = signed_headers(Utc::now().timestamp(), &body, "whsec_other");

        let err = provider.validate_webhook(&headers, &body).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidSignature));
    }

    #[test_log::test(tokio::test)]
    async fn tampered_body_is_rejected() {
        let provider = provider("whsec_test");
        let body = completed_event_body("cs_test_1", &uuid::Uuid::new_v4().to_string(), "100");
        let headers = signed_headers(Utc::now().timestamp(), &body, "whsec_test");
        let tampered = body.replace("100", "100000");

        let err = provider.validate_webhook(&headers, &tampered).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidSignature));
    }

    #[test_log::test(tokio::test)]
    async fn stale_timestamp_is_rejected() {
        let provider = provider("whsec_test");
        let body = completed_event_body("cs_test_1", &uuid::Uuid::new_v4().to_string(), "100");
        let stale = Utc::now().timestamp() - SIGNATURE_TOLERANCE_SECS - 60;
        let headers = signed_headers(stale, &body, "whsec_test");

        let err = provider.validate_webhook(&headers, &body).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidSignature));
    }

    #[test_log::test(tokio::test)]
    async fn missing_header_is_rejected() {
        let provider = provider("whsec_test");
        let body = completed_event_body("cs_test_1", &uuid::Uuid::new_v4().to_string(), "100");

        let err = provider.validate_webhook(&HeaderMap::new(), &body).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidSignature));
    }

    #[test_log::test(tokio::test)]
    async fn unhandled_event_types_pass_through() {
        let provider = provider("whsec_test");
        let body = serde_json::json!({
            "type": "invoice.paid",
            "data": { "object": { "id": "in_test_1" } }
        })
        .to_string();
        let headers = signed_headers(Utc::now().timestamp(), &body, "whsec_test");

        let event = provider.validate_webhook(&headers, &body).await.unwrap().unwrap();
        assert_eq!(event.event_type, "invoice.paid");
        assert!(event.session_id.is_none());
    }

    #[sqlx::test]
    async fn duplicate_event_credits_once(pool: PgPool) {
        let provider = provider("whsec_test");
        let user = create_test_user(&pool).await;
        let event = WebhookEvent {
            event_type: CHECKOUT_COMPLETED.to_string(),
            session_id: Some("cs_test_dup".to_string()),
            user_id: Some(user.id),
            credits: Some(100),
        };

        provider.process_webhook_event(&pool, &event).await.unwrap();
        let err = provider.process_webhook_event(&pool, &event).await.unwrap_err();
        assert!(matches!(err, PaymentError::AlreadyProcessed));

        let mut conn = pool.acquire().await.unwrap();
        let balance = Credits::new(&mut conn).balance(user.id).await.unwrap();
        assert_eq!(balance, 100);
    }
}
