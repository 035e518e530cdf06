//! Dummy payment provider for development and testing.
//!
//! Skips the hosted-checkout round trip entirely: credits are granted the
//! moment a "checkout session" is created, and no webhooks are delivered.

use axum::http::HeaderMap;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::{
    api::models::users::CurrentUser,
    config::{CreditPackage, DummyConfig},
    db::handlers::Credits,
    db::models::credits::{AdjustOutcome, CreditAdjustment},
};

use super::{PaymentError, PaymentProvider, Result, WebhookEvent};

pub struct DummyProvider {
    credits: i64,
}

impl From<DummyConfig> for DummyProvider {
    fn from(config: DummyConfig) -> Self {
        Self { credits: config.credits }
    }
}

#[async_trait::async_trait]
impl PaymentProvider for DummyProvider {
    async fn create_checkout_session(
        &self,
        db_pool: &PgPool,
        user: &CurrentUser,
        package: &CreditPackage,
        _cancel_url: &str,
        success_url: &str,
    ) -> Result<String> {
        // Grant immediately; the configured amount overrides the package so
        // dev environments behave predictably regardless of package setup.
        let credits = if self.credits > 0 { self.credits } else { package.credits };
        let session_id = format!("dummy_session_{}_{}", user.id, Uuid::new_v4());

        let mut conn = db_pool.acquire().await?;
        let adjustment = CreditAdjustment::purchase(user.id, credits, &session_id);
        match Credits::new(&mut conn).adjust(&adjustment).await? {
            AdjustOutcome::Applied { balance } => {
                info!(user_id = %user.id, credits, balance, "dummy provider granted credits");
                Ok(success_url.to_string())
            }
            AdjustOutcome::InsufficientFunds => {
                Err(PaymentError::InvalidData("Dummy credit grant rejected".to_string()))
            }
        }
    }

    async fn validate_webhook(&self, _headers: &HeaderMap, _body: &str) -> Result<Option<WebhookEvent>> {
        // No webhooks: everything settles at checkout time
        Ok(None)
    }

    async fn process_webhook_event(&self, _db_pool: &PgPool, _event: &WebhookEvent) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_user;

    #[sqlx::test]
    async fn checkout_grants_credits_immediately(pool: PgPool) {
        let provider = DummyProvider::from(DummyConfig { credits: 50 });
        let user = create_test_user(&pool).await;
        let current = CurrentUser { id: user.id, email: user.email.clone() };
        let package = CreditPackage {
            id: "starter".to_string(),
            price_id: "price_dev".to_string(),
            credits: 100,
        };

        let url = provider
            .create_checkout_session(&pool, &current, &package, "http://x/cancel", "http://x/success")
            .await
            .unwrap();
        assert_eq!(url, "http://x/success");

        let mut conn = pool.acquire().await.unwrap();
        let balance = Credits::new(&mut conn).balance(user.id).await.unwrap();
        assert_eq!(balance, 50);
    }
}
