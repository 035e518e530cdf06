//! Database models for users and API keys.

use crate::types::{ApiKeyId, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// Database request for creating a new user
#[derive(Debug, Clone)]
pub struct UserCreateDBRequest {
    pub email: String,
}

/// Database response for a user
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserDBResponse {
    pub id: UserId,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Database response for an API key, including the secret.
///
/// The secret is only surfaced at creation time; list queries should not use
/// this type.
#[derive(Debug, Clone, FromRow)]
pub struct ApiKeyDBResponse {
    pub id: ApiKeyId,
    pub user_id: UserId,
    pub secret: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}
