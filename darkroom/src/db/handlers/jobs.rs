//! Generation job repository.
//!
//! Terminal transitions (`completed`, `failed`) are guarded by a status
//! predicate in the UPDATE itself: a job already in a terminal state matches
//! zero rows and the caller sees `None`. Duplicate webhook deliveries and the
//! expiry reaper all funnel through these guarded updates, so a job settles
//! exactly once.

use crate::db::{
    errors::Result,
    models::jobs::{JobCreateDBRequest, JobDBResponse, JobFilter},
};
use crate::types::JobId;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;

const JOB_COLUMNS: &str =
    "id, user_id, prompt, status, provider_job_id, output_urls, failure_reason, created_at, completed_at";

pub struct Jobs<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Jobs<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Record the provider's job id and move `started -> processing`.
    ///
    /// Returns `false` if the job was not in `started` (e.g. the provider's
    /// webhook raced the submission handler and already settled it).
    pub async fn mark_processing(&mut self, id: JobId, provider_job_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'processing', provider_job_id = $2
            WHERE id = $1 AND status = 'started'
            "#,
        )
        .bind(id)
        .bind(provider_job_id)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Move a non-terminal job to `processing` without touching the provider
    /// id. Used for intermediate webhook deliveries.
    pub async fn touch_processing(&mut self, id: JobId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'processing'
            WHERE id = $1 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(id)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Guarded terminal transition to `completed`.
    ///
    /// Returns the updated row only if this call performed the transition;
    /// `None` means the job was already terminal (or unknown) and the caller
    /// must not produce side effects like gallery entries.
    pub async fn complete(
        &mut self,
        id: JobId,
        output_urls: &[String],
        completed_at: DateTime<Utc>,
    ) -> Result<Option<JobDBResponse>> {
        let query = format!(
            r#"
            UPDATE jobs
            SET status = 'completed', output_urls = $2, completed_at = $3
            WHERE id = $1 AND status NOT IN ('completed', 'failed')
            RETURNING {JOB_COLUMNS}
            "#
        );

        let job = sqlx::query_as::<_, JobDBResponse>(&query)
            .bind(id)
            .bind(output_urls)
            .bind(completed_at)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(job)
    }

    /// Guarded terminal transition to `failed`. Same contract as [`complete`](Self::complete).
    pub async fn fail(&mut self, id: JobId, reason: &str, completed_at: DateTime<Utc>) -> Result<Option<JobDBResponse>> {
        let query = format!(
            r#"
            UPDATE jobs
            SET status = 'failed', failure_reason = $2, completed_at = $3
            WHERE id = $1 AND status NOT IN ('completed', 'failed')
            RETURNING {JOB_COLUMNS}
            "#
        );

        let job = sqlx::query_as::<_, JobDBResponse>(&query)
            .bind(id)
            .bind(reason)
            .bind(completed_at)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(job)
    }

    /// Force-fail every non-terminal job created before `cutoff`.
    ///
    /// Returns the jobs that were transitioned so the caller can refund them.
    pub async fn fail_stale(&mut self, cutoff: DateTime<Utc>, reason: &str) -> Result<Vec<JobDBResponse>> {
        let query = format!(
            r#"
            UPDATE jobs
            SET status = 'failed', failure_reason = $2, completed_at = now()
            WHERE status NOT IN ('completed', 'failed') AND created_at < $1
            RETURNING {JOB_COLUMNS}
            "#
        );

        let jobs = sqlx::query_as::<_, JobDBResponse>(&query)
            .bind(cutoff)
            .bind(reason)
            .fetch_all(&mut *self.db)
            .await?;

        Ok(jobs)
    }
}

#[async_trait::async_trait]
impl crate::db::handlers::Repository for Jobs<'_> {
    type CreateRequest = JobCreateDBRequest;
    type Response = JobDBResponse;
    type Id = JobId;
    type Filter = JobFilter;

    async fn create(&mut self, request: &JobCreateDBRequest) -> Result<JobDBResponse> {
        let query = format!(
            r#"
            INSERT INTO jobs (id, user_id, prompt, input_image, status)
            VALUES ($1, $2, $3, $4, 'started')
            RETURNING {JOB_COLUMNS}
            "#
        );

        let job = sqlx::query_as::<_, JobDBResponse>(&query)
            .bind(request.id)
            .bind(request.user_id)
            .bind(&request.prompt)
            .bind(&request.input_image)
            .fetch_one(&mut *self.db)
            .await?;

        Ok(job)
    }

    async fn get_by_id(&mut self, id: JobId) -> Result<Option<JobDBResponse>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");

        let job = sqlx::query_as::<_, JobDBResponse>(&query)
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(job)
    }

    async fn list(&mut self, filter: &JobFilter) -> Result<Vec<JobDBResponse>> {
        let jobs = match filter.user_id {
            Some(user_id) => {
                let query = format!(
                    r#"
                    SELECT {JOB_COLUMNS} FROM jobs
                    WHERE user_id = $1
                    ORDER BY created_at DESC
                    OFFSET $2 LIMIT $3
                    "#
                );
                sqlx::query_as::<_, JobDBResponse>(&query)
                    .bind(user_id)
                    .bind(filter.skip)
                    .bind(filter.limit)
                    .fetch_all(&mut *self.db)
                    .await?
            }
            None => {
                let query = format!(
                    r#"
                    SELECT {JOB_COLUMNS} FROM jobs
                    ORDER BY created_at DESC
                    OFFSET $1 LIMIT $2
                    "#
                );
                sqlx::query_as::<_, JobDBResponse>(&query)
                    .bind(filter.skip)
                    .bind(filter.limit)
                    .fetch_all(&mut *self.db)
                    .await?
            }
        };

        Ok(jobs)
    }

    async fn delete(&mut self, id: JobId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
