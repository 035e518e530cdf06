//! Test utilities for integration testing (available with `test-utils` feature).

use axum_test::TestServer;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    config::{Config, GenerationConfig, MockGenerationConfig, PaymentConfig, StripeConfig},
    db::{
        handlers::{Credits, Jobs, Repository, Users},
        models::{
            credits::{AdjustOutcome, CreditAdjustment, CreditTransactionKind},
            jobs::{JobCreateDBRequest, JobDBResponse},
            users::{ApiKeyDBResponse, UserCreateDBRequest, UserDBResponse},
        },
    },
};

/// Signing secret used by test configs and signed test webhooks
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";

/// A config suitable for tests: mock generation, Stripe payments pointed at
/// a known signing secret, one purchasable package.
pub fn create_test_config() -> Config {
    Config {
        public_url: "http://localhost:3001".to_string(),
        payment: Some(PaymentConfig::Stripe(StripeConfig {
            api_key: "sk_test_key".to_string(),
            webhook_secret: TEST_WEBHOOK_SECRET.to_string(),
            api_base: "http://localhost:1".to_string(),
        })),
        generation: GenerationConfig::Mock(MockGenerationConfig::default()),
        packages: vec![crate::config::CreditPackage {
            id: "starter".to_string(),
            price_id: "price_test".to_string(),
            credits: 100,
        }],
        ..Default::default()
    }
}

/// Build a test server over an existing pool
pub async fn create_test_app(pool: PgPool, config: Config) -> (TestServer, crate::BackgroundServices) {
    let app = crate::Application::new_with_pool(config, Some(pool))
        .await
        .expect("Failed to create application");

    app.into_test_server().expect("Failed to create test server")
}

pub async fn create_test_user(pool: &PgPool) -> UserDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Users::new(&mut conn)
        .create(&UserCreateDBRequest {
            email: format!("user-{}@example.com", Uuid::new_v4()),
        })
        .await
        .expect("Failed to create test user")
}

pub async fn create_test_api_key(pool: &PgPool, user_id: crate::types::UserId) -> ApiKeyDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Users::new(&mut conn)
        .create_api_key(user_id, "test key")
        .await
        .expect("Failed to create test API key")
}

pub async fn create_test_job(pool: &PgPool, user_id: crate::types::UserId, prompt: &str) -> JobDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Jobs::new(&mut conn)
        .create(&JobCreateDBRequest {
            id: Uuid::new_v4(),
            user_id,
            prompt: prompt.to_string(),
            input_image: "data:image/png;base64,aGVsbG8".to_string(),
        })
        .await
        .expect("Failed to create test job")
}

/// Put credits on a user's balance, bypassing payment flows
pub async fn grant_credits(pool: &PgPool, user_id: crate::types::UserId, amount: i64) {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    let outcome = Credits::new(&mut conn)
        .adjust(&CreditAdjustment {
            user_id,
            kind: CreditTransactionKind::Purchase,
            amount,
            source_id: format!("test-grant:{}", Uuid::new_v4()),
            description: Some("test grant".to_string()),
        })
        .await
        .expect("Failed to grant credits");
    assert!(matches!(outcome, AdjustOutcome::Applied { .. }));
}

/// A tiny valid PNG for upload tests (1x1 transparent pixel)
pub fn tiny_png() -> Vec<u8> {
    const PNG_BASE64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg";
    use base64::Engine;
    base64::engine::general_purpose::STANDARD_NO_PAD
        .decode(PNG_BASE64)
        .expect("static test fixture decodes")
}
