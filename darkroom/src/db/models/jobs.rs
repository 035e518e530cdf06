//! Database models for generation jobs.

use crate::types::{JobId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Job lifecycle status stored as TEXT in database
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Debited and recorded, provider call not yet acknowledged
    Started,
    /// Accepted by the generation provider, waiting for its webhook
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Database request for creating a new job
#[derive(Debug, Clone)]
pub struct JobCreateDBRequest {
    /// Generated locally before the provider call so the callback URL can
    /// embed it
    pub id: JobId,
    pub user_id: UserId,
    pub prompt: String,
    /// Base64 data URL of the uploaded image
    pub input_image: String,
}

/// Database response for a job.
///
/// Deliberately excludes `input_image`: the data URL payload is large and
/// nothing reads it back after submission.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct JobDBResponse {
    pub id: JobId,
    pub user_id: UserId,
    pub prompt: String,
    pub status: JobStatus,
    pub provider_job_id: Option<String>,
    pub output_urls: Option<Vec<String>>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Filter for listing jobs
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub user_id: Option<UserId>,
    pub skip: i64,
    pub limit: i64,
}
