//! Database models for gallery entries.

use crate::types::{JobId, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Database request for materializing a gallery entry from a completed job
#[derive(Debug, Clone)]
pub struct GalleryImageCreateDBRequest {
    pub user_id: UserId,
    pub job_id: JobId,
    pub url: String,
    pub prompt: String,
}

/// Database response for a gallery entry
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct GalleryImageDBResponse {
    pub id: Uuid,
    pub user_id: UserId,
    pub job_id: JobId,
    pub url: String,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
}
