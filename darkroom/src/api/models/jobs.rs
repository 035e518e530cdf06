//! API request/response models for jobs and the generation webhook.

use crate::db::models::jobs::{JobDBResponse, JobStatus};
use crate::types::JobId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Response for a freshly submitted job
#[derive(Debug, Clone, Serialize)]
pub struct JobSubmitResponse {
    pub id: JobId,
    pub status: JobStatus,
}

/// Response for job reads (status polling and listings)
#[derive(Debug, Clone, Serialize)]
pub struct JobResponse {
    pub id: JobId,
    pub prompt: String,
    pub status: JobStatus,
    pub output_urls: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<JobDBResponse> for JobResponse {
    fn from(job: JobDBResponse) -> Self {
        Self {
            id: job.id,
            prompt: job.prompt,
            status: job.status,
            output_urls: job.output_urls,
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

/// Output URLs in a generation webhook: providers send either a single URL or
/// an array depending on the model
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OutputUrls {
    One(String),
    Many(Vec<String>),
}

impl OutputUrls {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OutputUrls::One(url) => vec![url],
            OutputUrls::Many(urls) => urls,
        }
    }
}

/// Payload POSTed by the generation provider to the per-job callback URL.
///
/// Only `status` and `output` are acted on; everything that matters for
/// authorization (job identity, owner) is re-derived from the job row, never
/// from this payload.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationWebhookPayload {
    pub status: String,
    #[serde(default)]
    pub output: Option<OutputUrls>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}
