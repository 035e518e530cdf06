//! User and API key repository.
//!
//! Identity lives with an external provider; this repository only manages the
//! minimal local rows (account + bearer keys) the rest of the system hangs
//! foreign keys off.

use crate::db::{
    errors::Result,
    handlers::Credits,
    models::{credits::CreditAdjustment, users::{ApiKeyDBResponse, UserCreateDBRequest, UserDBResponse}},
};
use crate::types::UserId;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sqlx::PgConnection;

const USER_COLUMNS: &str = "id, email, created_at";
const API_KEY_COLUMNS: &str = "id, user_id, secret, name, created_at";

/// Prefix for API key secrets
pub const API_KEY_PREFIX: &str = "drk_";

/// Generate a fresh API key secret: `drk_` + 32 random bytes, base64url
fn generate_secret() -> String {
    use rand::RngCore;

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}{}", API_KEY_PREFIX, URL_SAFE_NO_PAD.encode(bytes))
}

pub struct Users<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Users<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    pub async fn create(&mut self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let query = format!(
            r#"
            INSERT INTO users (email)
            VALUES ($1)
            RETURNING {USER_COLUMNS}
            "#
        );

        let user = sqlx::query_as::<_, UserDBResponse>(&query)
            .bind(&request.email)
            .fetch_one(&mut *self.db)
            .await?;

        Ok(user)
    }

    /// Create a user and seed their starter credits in one step.
    ///
    /// This is the entry point auth uses when the identity proxy asserts an
    /// email it has never seen. The grant's `signup:{user_id}` source means
    /// a repeated provisioning attempt can never double-grant.
    pub async fn provision(&mut self, request: &UserCreateDBRequest, initial_credits: i64) -> Result<UserDBResponse> {
        let user = self.create(request).await?;

        if initial_credits > 0 {
            let grant = CreditAdjustment::signup_grant(user.id, initial_credits);
            Credits::new(&mut *self.db).adjust(&grant).await?;
        }

        Ok(user)
    }

    pub async fn get_by_id(&mut self, id: UserId) -> Result<Option<UserDBResponse>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");

        let user = sqlx::query_as::<_, UserDBResponse>(&query)
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(user)
    }

    pub async fn get_by_email(&mut self, email: &str) -> Result<Option<UserDBResponse>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");

        let user = sqlx::query_as::<_, UserDBResponse>(&query)
            .bind(email)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(user)
    }

    /// Mint a new bearer API key for a user
    pub async fn create_api_key(&mut self, user_id: UserId, name: &str) -> Result<ApiKeyDBResponse> {
        let query = format!(
            r#"
            INSERT INTO api_keys (user_id, secret, name)
            VALUES ($1, $2, $3)
            RETURNING {API_KEY_COLUMNS}
            "#
        );

        let key = sqlx::query_as::<_, ApiKeyDBResponse>(&query)
            .bind(user_id)
            .bind(generate_secret())
            .bind(name)
            .fetch_one(&mut *self.db)
            .await?;

        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::PgPool;

    #[test]
    fn secrets_are_prefixed_and_unique() {
        let a = generate_secret();
        let b = generate_secret();
        assert!(a.starts_with(API_KEY_PREFIX));
        assert_ne!(a, b);
    }

    #[sqlx::test]
    async fn create_and_lookup_by_email(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut users = Users::new(&mut conn);

        let user = users
            .create(&UserCreateDBRequest {
                email: "ada@example.com".to_string(),
            })
            .await
            .unwrap();

        let found = users.get_by_email("ada@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(users.get_by_email("nobody@example.com").await.unwrap().is_none());
    }

    #[sqlx::test]
    async fn provision_seeds_starter_credits(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();

        let user = Users::new(&mut conn)
            .provision(
                &UserCreateDBRequest {
                    email: "new@example.com".to_string(),
                },
                3,
            )
            .await
            .unwrap();

        let mut credits = Credits::new(&mut conn);
        assert_eq!(credits.balance(user.id).await.unwrap(), 3);
        let txs = credits.list_user_transactions(user.id, 0, 10).await.unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].source_id, format!("signup:{}", user.id));
    }

    #[sqlx::test]
    async fn api_key_round_trip(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut users = Users::new(&mut conn);

        let user = users
            .create(&UserCreateDBRequest {
                email: "key@example.com".to_string(),
            })
            .await
            .unwrap();

        let key = users.create_api_key(user.id, "cli").await.unwrap();
        assert_eq!(key.user_id, user.id);
        assert!(key.secret.starts_with(API_KEY_PREFIX));
    }
}
