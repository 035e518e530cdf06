//! API response models for the gallery.

use crate::db::models::gallery::GalleryImageDBResponse;
use crate::types::JobId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct GalleryImageResponse {
    pub id: Uuid,
    pub job_id: JobId,
    pub url: String,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
}

impl From<GalleryImageDBResponse> for GalleryImageResponse {
    fn from(image: GalleryImageDBResponse) -> Self {
        Self {
            id: image.id,
            job_id: image.job_id,
            url: image.url,
            prompt: image.prompt,
            created_at: image.created_at,
        }
    }
}
