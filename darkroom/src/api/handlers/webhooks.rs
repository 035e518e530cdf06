//! Inbound provider callbacks.
//!
//! Two very different trust models live here. The generation webhook is
//! unauthenticated but only trusts the job id in its URL: the owner, prompt,
//! and credit movements are all re-derived from the job row, and terminal
//! transitions are guarded in the database so replays are no-ops. The
//! payment webhook trusts nothing until the raw-body signature verifies.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
};
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::{
    AppState,
    api::models::jobs::GenerationWebhookPayload,
    db::{
        handlers::{Credits, Gallery, Jobs, Repository},
        models::{gallery::GalleryImageCreateDBRequest, jobs::JobDBResponse},
    },
    errors::{Error, Result},
    payment_providers::PaymentError,
    types::JobId,
};

/// Handle a generation provider callback for one job.
///
/// Routing on the payload status:
/// - `succeeded` with output moves the job to `completed` and materializes
///   gallery entries, but only if this delivery performed the transition
/// - `failed`/`canceled` (or `succeeded` without output) moves the job to
///   `failed` and refunds its credit
/// - anything else keeps the job in `processing`
#[instrument(skip(state, payload), fields(job_id = %job_id, status = %payload.status))]
pub async fn generation_webhook(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    Json(payload): Json<GenerationWebhookPayload>,
) -> Result<Json<Value>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    let job = Jobs::new(&mut conn)
        .get_by_id(job_id)
        .await?
        .ok_or_else(|| Error::NotFound {
            resource: "Job".to_string(),
            id: job_id.to_string(),
        })?;

    match payload.status.as_str() {
        "succeeded" | "completed" => {
            let urls: Vec<String> = payload.output.map(|o| o.into_vec()).unwrap_or_default();
            if urls.is_empty() {
                // A success without output is a failure as far as the user
                // is concerned; settle and refund
                settle_failure(&mut conn, job_id, "provider returned no output").await?;
            } else {
                let completed_at = payload.completed_at.unwrap_or_else(Utc::now);
                if let Some(completed) = Jobs::new(&mut conn).complete(job_id, &urls, completed_at).await? {
                    materialize_gallery(&mut conn, &completed, &urls).await?;
                    info!(user_id = %completed.user_id, outputs = urls.len(), "job completed");
                } else {
                    info!("duplicate completion delivery ignored");
                }
            }
        }
        "failed" | "canceled" => {
            let reason = payload.error.as_deref().unwrap_or("generation failed");
            settle_failure(&mut conn, job_id, reason).await?;
        }
        other => {
            // Intermediate progress; keep the job alive if it isn't settled
            if !Jobs::new(&mut conn).touch_processing(job_id).await? {
                info!(status = other, "progress delivery for settled job ignored");
            }
        }
    }

    Ok(Json(json!({ "status": "success" })))
}

/// Fail a job and refund its credit. Both halves are individually
/// idempotent, so duplicate failure deliveries cannot double-refund.
async fn settle_failure(conn: &mut sqlx::PgConnection, job_id: JobId, reason: &str) -> Result<()> {
    if let Some(failed) = Jobs::new(&mut *conn).fail(job_id, reason, Utc::now()).await? {
        let refunded = Credits::new(&mut *conn).refund_job(failed.user_id, job_id, reason).await?;
        info!(user_id = %failed.user_id, refunded, reason, "job failed");
    } else {
        info!("duplicate failure delivery ignored");
    }
    Ok(())
}

/// Insert one gallery entry per output URL.
///
/// Only reached by the delivery that performed the completion transition,
/// but the unique `(job_id, url)` constraint backstops that: a racing insert
/// is treated as already materialized.
async fn materialize_gallery(conn: &mut sqlx::PgConnection, job: &JobDBResponse, urls: &[String]) -> Result<()> {
    for url in urls {
        let request = GalleryImageCreateDBRequest {
            user_id: job.user_id,
            job_id: job.id,
            url: url.clone(),
            prompt: job.prompt.clone(),
        };
        match Gallery::new(&mut *conn).create(&request).await {
            Ok(_) => {}
            Err(err) if err.is_unique_violation_on("gallery_images_job_url_unique") => {
                warn!(url = %url, "gallery entry already materialized");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Handle a payment provider webhook.
///
/// The raw body is verified against the signature header before any parsing.
/// Redelivered events are acknowledged with 200 so the provider stops
/// retrying; an invalid signature is rejected without touching the database.
#[instrument(skip_all)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>> {
    let provider = state.payment.as_ref().ok_or_else(|| Error::BadRequest {
        message: "Payments are not configured".to_string(),
    })?;

    let Some(event) = provider.validate_webhook(&headers, &body).await? else {
        // Provider settles at checkout time and sends no webhooks
        return Ok(Json(json!({ "received": true })));
    };

    match provider.process_webhook_event(&state.db, &event).await {
        Ok(()) => {}
        Err(PaymentError::AlreadyProcessed) => {
            info!(event_type = %event.event_type, "duplicate payment event acknowledged");
        }
        Err(err) => return Err(err.into()),
    }

    Ok(Json(json!({ "received": true })))
}
