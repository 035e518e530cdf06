//! Job submission and polling.
//!
//! Submission is the only place credits leave an account: the debit is
//! applied before the job row exists, and any failure after the debit
//! triggers a compensating refund keyed to the job id. The handler therefore
//! never leaves a paid-for job in limbo.

use axum::{
    extract::{Multipart, Path, Query, State},
    response::Json,
};
use base64::Engine;
use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    AppState,
    api::models::{
        jobs::{JobResponse, JobSubmitResponse},
        pagination::Pagination,
        users::CurrentUser,
    },
    db::{
        handlers::{Credits, Jobs, Repository},
        models::{
            credits::{AdjustOutcome, CreditAdjustment},
            jobs::{JobCreateDBRequest, JobFilter},
        },
    },
    errors::{Error, Result},
    generation::SubmitRequest,
    types::JobId,
};

struct SubmittedImage {
    content_type: String,
    data: Vec<u8>,
}

/// Pull the prompt and image out of the multipart form
async fn read_submission(multipart: &mut Multipart, max_image_bytes: usize) -> Result<(String, SubmittedImage)> {
    let mut prompt: Option<String> = None;
    let mut image: Option<SubmittedImage> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| Error::BadRequest {
        message: format!("Malformed multipart request: {e}"),
    })? {
        match field.name() {
            Some("prompt") => {
                let text = field.text().await.map_err(|e| Error::BadRequest {
                    message: format!("Invalid prompt field: {e}"),
                })?;
                prompt = Some(text);
            }
            Some("image") => {
                let content_type = field.content_type().unwrap_or("application/octet-stream").to_string();
                if !content_type.starts_with("image/") {
                    return Err(Error::BadRequest {
                        message: format!("Unsupported image content type: {content_type}"),
                    });
                }
                let data = field.bytes().await.map_err(|e| Error::BadRequest {
                    message: format!("Failed to read image upload: {e}"),
                })?;
                if data.len() > max_image_bytes {
                    return Err(Error::BadRequest {
                        message: format!("Image exceeds the maximum size of {max_image_bytes} bytes"),
                    });
                }
                image = Some(SubmittedImage {
                    content_type,
                    data: data.to_vec(),
                });
            }
            _ => {}
        }
    }

    let prompt = prompt
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| Error::BadRequest {
            message: "A non-empty prompt is required".to_string(),
        })?;
    let image = image.ok_or_else(|| Error::BadRequest {
        message: "An image upload is required".to_string(),
    })?;

    Ok((prompt, image))
}

/// Submit a new generation job.
///
/// Flow: debit the user's balance, persist the job as `started`, hand it to
/// the generation provider with a per-job callback URL, then mark it
/// `processing`. If the provider rejects the submission the job is failed and
/// the debit refunded before the error is returned.
#[instrument(skip(state, multipart), fields(user_id = %current_user.id))]
pub async fn submit_job(
    State(state): State<AppState>,
    current_user: CurrentUser,
    mut multipart: Multipart,
) -> Result<Json<JobSubmitResponse>> {
    let cost = state.config.jobs.cost;
    let (prompt, image) = read_submission(&mut multipart, state.config.jobs.max_image_bytes).await?;

    // Pre-generate the id so the debit can reference it before the row exists
    let job_id: JobId = Uuid::new_v4();

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    let debit = CreditAdjustment::job_debit(current_user.id, job_id, cost);
    match Credits::new(&mut conn).adjust(&debit).await? {
        AdjustOutcome::Applied { balance } => {
            info!(job_id = %job_id, balance, "debited job submission");
        }
        AdjustOutcome::InsufficientFunds => return Err(Error::InsufficientCredits),
    }

    // From here on every early return must refund the debit
    let job = match Jobs::new(&mut conn)
        .create(&JobCreateDBRequest {
            id: job_id,
            user_id: current_user.id,
            prompt: prompt.clone(),
            input_image: encode_data_url(&image),
        })
        .await
    {
        Ok(job) => job,
        Err(err) => {
            Credits::new(&mut conn)
                .refund_job(current_user.id, job_id, "job creation failed")
                .await?;
            return Err(err.into());
        }
    };

    let webhook_url = format!("{}/webhook/{}", state.config.public_base(), job_id);
    let submit = SubmitRequest {
        prompt,
        input_image: encode_data_url(&image),
        webhook_url,
    };

    match state.generation.submit(&submit).await {
        Ok(provider_job_id) => {
            Jobs::new(&mut conn).mark_processing(job_id, &provider_job_id).await?;
        }
        Err(err) => {
            warn!(job_id = %job_id, error = %err, "generation provider rejected submission");
            if let Some(failed) = Jobs::new(&mut conn)
                .fail(job_id, "provider rejected the submission", Utc::now())
                .await?
            {
                Credits::new(&mut conn)
                    .refund_job(failed.user_id, job_id, "provider rejected the submission")
                    .await?;
            }
            return Err(err.into());
        }
    }

    let job = Jobs::new(&mut conn)
        .get_by_id(job_id)
        .await?
        .unwrap_or(job);

    Ok(Json(JobSubmitResponse {
        id: job.id,
        status: job.status,
    }))
}

fn encode_data_url(image: &SubmittedImage) -> String {
    format!(
        "data:{};base64,{}",
        image.content_type,
        base64::engine::general_purpose::STANDARD.encode(&image.data)
    )
}

/// Get a single job's status. Owned jobs only; anything else is a 404.
pub async fn get_job(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(job_id): Path<JobId>,
) -> Result<Json<JobResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    let job = Jobs::new(&mut conn)
        .get_by_id(job_id)
        .await?
        .filter(|job| job.user_id == current_user.id)
        .ok_or_else(|| Error::NotFound {
            resource: "Job".to_string(),
            id: job_id.to_string(),
        })?;

    Ok(Json(JobResponse::from(job)))
}

/// List the current user's jobs, newest first
pub async fn list_jobs(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<JobResponse>>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    let jobs = Jobs::new(&mut conn)
        .list(&JobFilter {
            user_id: Some(current_user.id),
            skip: pagination.skip,
            limit: pagination.limit,
        })
        .await?;

    Ok(Json(jobs.into_iter().map(JobResponse::from).collect()))
}
