//! Background maintenance loop.
//!
//! Two housekeeping duties run on the same interval:
//!
//! 1. **Stale jobs**: a job whose provider callback never arrives would stay
//!    `processing` forever with the user's credit gone. Jobs still
//!    non-terminal past the processing timeout are force-failed and
//!    refunded through the same idempotent path the failure webhook uses,
//!    so a late callback racing the reaper cannot double-refund.
//! 2. **Expired gallery entries**: listings already hide entries past the
//!    TTL; the reaper deletes the rows.

use chrono::Utc;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::{
    config::Config,
    db::handlers::{Credits, Gallery, Jobs},
    errors::{Error, Result},
};

/// What one maintenance pass did
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReaperStats {
    pub jobs_expired: u64,
    pub jobs_refunded: u64,
    pub gallery_purged: u64,
}

/// Run a single maintenance pass
#[instrument(skip_all)]
pub async fn run_pass(db: &PgPool, config: &Config) -> Result<ReaperStats> {
    let mut stats = ReaperStats::default();
    let mut conn = db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    let cutoff = Utc::now() - config.jobs.processing_timeout;
    let expired = Jobs::new(&mut conn).fail_stale(cutoff, "processing timed out").await?;
    stats.jobs_expired = expired.len() as u64;

    for job in &expired {
        let refunded = Credits::new(&mut conn)
            .refund_job(job.user_id, job.id, "processing timed out")
            .await?;
        if refunded {
            stats.jobs_refunded += 1;
        }
    }

    let gallery_cutoff = Utc::now() - config.gallery.ttl;
    stats.gallery_purged = Gallery::new(&mut conn).purge_older_than(gallery_cutoff).await?;

    if stats != ReaperStats::default() {
        info!(
            jobs_expired = stats.jobs_expired,
            jobs_refunded = stats.jobs_refunded,
            gallery_purged = stats.gallery_purged,
            "maintenance pass"
        );
    }

    Ok(stats)
}

/// Run maintenance passes until cancelled
pub async fn run(db: PgPool, config: Config, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(config.jobs.reaper_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(interval = ?config.jobs.reaper_interval, "reaper started");
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = run_pass(&db, &config).await {
                    error!("maintenance pass failed: {e:#}");
                }
            }
            _ = shutdown.cancelled() => {
                info!("reaper shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::Repository;
    use crate::db::models::jobs::JobStatus;
    use crate::test_utils::{create_test_job, create_test_user, grant_credits};
    use std::time::Duration;

    fn test_config() -> Config {
        Config {
            jobs: crate::config::JobsConfig {
                processing_timeout: Duration::from_secs(30 * 60),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[sqlx::test]
    async fn stale_jobs_are_failed_and_refunded_once(pool: PgPool) {
        let config = test_config();
        let user = create_test_user(&pool).await;
        grant_credits(&pool, user.id, 5).await;
        let job = create_test_job(&pool, user.id, "prompt").await;

        // The job was paid for and has been stuck for an hour
        {
            let mut conn = pool.acquire().await.unwrap();
            let mut credits = Credits::new(&mut conn);
            credits
                .adjust(&crate::db::models::credits::CreditAdjustment::job_debit(user.id, job.id, 1))
                .await
                .unwrap();
        }
        sqlx::query("UPDATE jobs SET status = 'processing', created_at = now() - interval '1 hour' WHERE id = $1")
            .bind(job.id)
            .execute(&pool)
            .await
            .unwrap();

        let stats = run_pass(&pool, &config).await.unwrap();
        assert_eq!(stats.jobs_expired, 1);
        assert_eq!(stats.jobs_refunded, 1);

        let mut conn = pool.acquire().await.unwrap();
        let reaped = Jobs::new(&mut conn).get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(reaped.status, JobStatus::Failed);
        assert_eq!(reaped.failure_reason.as_deref(), Some("processing timed out"));
        assert_eq!(Credits::new(&mut conn).balance(user.id).await.unwrap(), 5);

        // A second pass finds nothing to do
        let stats = run_pass(&pool, &config).await.unwrap();
        assert_eq!(stats, ReaperStats::default());
    }

    #[sqlx::test]
    async fn reaper_does_not_double_refund_after_webhook(pool: PgPool) {
        let config = test_config();
        let user = create_test_user(&pool).await;
        grant_credits(&pool, user.id, 5).await;
        let job = create_test_job(&pool, user.id, "prompt").await;

        {
            let mut conn = pool.acquire().await.unwrap();
            let mut credits = Credits::new(&mut conn);
            credits
                .adjust(&crate::db::models::credits::CreditAdjustment::job_debit(user.id, job.id, 1))
                .await
                .unwrap();
            // The failure webhook already refunded this job
            credits.refund_job(user.id, job.id, "generation failed").await.unwrap();
        }
        sqlx::query("UPDATE jobs SET created_at = now() - interval '1 hour' WHERE id = $1")
            .bind(job.id)
            .execute(&pool)
            .await
            .unwrap();

        let stats = run_pass(&pool, &config).await.unwrap();
        assert_eq!(stats.jobs_expired, 1);
        assert_eq!(stats.jobs_refunded, 0);

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(Credits::new(&mut conn).balance(user.id).await.unwrap(), 5);
    }

    #[sqlx::test]
    async fn expired_gallery_rows_are_purged(pool: PgPool) {
        let config = test_config();
        let user = create_test_user(&pool).await;
        let job = create_test_job(&pool, user.id, "prompt").await;

        let mut conn = pool.acquire().await.unwrap();
        let image = Gallery::new(&mut conn)
            .create(&crate::db::models::gallery::GalleryImageCreateDBRequest {
                user_id: user.id,
                job_id: job.id,
                url: "https://cdn.example.com/out.png".to_string(),
                prompt: "prompt".to_string(),
            })
            .await
            .unwrap();
        sqlx::query("UPDATE gallery_images SET created_at = now() - interval '2 hours' WHERE id = $1")
            .bind(image.id)
            .execute(&pool)
            .await
            .unwrap();
        // Keep the job fresh so only the gallery side acts
        sqlx::query("UPDATE jobs SET status = 'completed' WHERE id = $1")
            .bind(job.id)
            .execute(&pool)
            .await
            .unwrap();
        drop(conn);

        let stats = run_pass(&pool, &config).await.unwrap();
        assert_eq!(stats.gallery_purged, 1);
        assert_eq!(stats.jobs_expired, 0);
    }
}
