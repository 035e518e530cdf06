//! Gallery repository.
//!
//! Entries are materialized exactly once per completed job by the webhook
//! handler; the unique `(job_id, url)` constraint backs that up at the
//! storage layer. Expiry is server-side: listings filter by the TTL cutoff
//! and the reaper deletes expired rows.

use crate::db::{
    errors::Result,
    models::gallery::{GalleryImageCreateDBRequest, GalleryImageDBResponse},
};
use crate::types::UserId;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;

const GALLERY_COLUMNS: &str = "id, user_id, job_id, url, prompt, created_at";

pub struct Gallery<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Gallery<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    pub async fn create(&mut self, request: &GalleryImageCreateDBRequest) -> Result<GalleryImageDBResponse> {
        let query = format!(
            r#"
            INSERT INTO gallery_images (user_id, job_id, url, prompt)
            VALUES ($1, $2, $3, $4)
            RETURNING {GALLERY_COLUMNS}
            "#
        );

        let image = sqlx::query_as::<_, GalleryImageDBResponse>(&query)
            .bind(request.user_id)
            .bind(request.job_id)
            .bind(&request.url)
            .bind(&request.prompt)
            .fetch_one(&mut *self.db)
            .await?;

        Ok(image)
    }

    /// List a user's entries created after `cutoff`, newest first
    pub async fn list_for_user(
        &mut self,
        user_id: UserId,
        cutoff: DateTime<Utc>,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<GalleryImageDBResponse>> {
        let query = format!(
            r#"
            SELECT {GALLERY_COLUMNS}
            FROM gallery_images
            WHERE user_id = $1 AND created_at > $2
            ORDER BY created_at DESC
            OFFSET $3 LIMIT $4
            "#
        );

        let images = sqlx::query_as::<_, GalleryImageDBResponse>(&query)
            .bind(user_id)
            .bind(cutoff)
            .bind(skip)
            .bind(limit)
            .fetch_all(&mut *self.db)
            .await?;

        Ok(images)
    }

    /// Delete entries older than `cutoff`, returning how many were removed
    pub async fn purge_older_than(&mut self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM gallery_images WHERE created_at < $1")
            .bind(cutoff)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::errors::DbError;
    use crate::test_utils::{create_test_job, create_test_user};
    use sqlx::PgPool;

    #[sqlx::test]
    async fn duplicate_entry_for_same_job_and_url_is_rejected(pool: PgPool) {
        let user = create_test_user(&pool).await;
        let job = create_test_job(&pool, user.id, "prompt").await;

        let mut conn = pool.acquire().await.unwrap();
        let mut gallery = Gallery::new(&mut conn);

        let request = GalleryImageCreateDBRequest {
            user_id: user.id,
            job_id: job.id,
            url: "https://cdn.example.com/out.png".to_string(),
            prompt: "prompt".to_string(),
        };

        gallery.create(&request).await.unwrap();
        let err = gallery.create(&request).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }), "got {err:?}");
    }

    #[sqlx::test]
    async fn listing_and_purge_respect_cutoff(pool: PgPool) {
        let user = create_test_user(&pool).await;
        let old_job = create_test_job(&pool, user.id, "old").await;
        let new_job = create_test_job(&pool, user.id, "new").await;

        let mut conn = pool.acquire().await.unwrap();
        let mut gallery = Gallery::new(&mut conn);

        let old = gallery
            .create(&GalleryImageCreateDBRequest {
                user_id: user.id,
                job_id: old_job.id,
                url: "https://cdn.example.com/old.png".to_string(),
                prompt: "old".to_string(),
            })
            .await
            .unwrap();
        gallery
            .create(&GalleryImageCreateDBRequest {
                user_id: user.id,
                job_id: new_job.id,
                url: "https://cdn.example.com/new.png".to_string(),
                prompt: "new".to_string(),
            })
            .await
            .unwrap();

        sqlx::query("UPDATE gallery_images SET created_at = now() - interval '2 hours' WHERE id = $1")
            .bind(old.id)
            .execute(&pool)
            .await
            .unwrap();

        let cutoff = Utc::now() - chrono::Duration::hours(1);
        let visible = gallery.list_for_user(user.id, cutoff, 0, 10).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].job_id, new_job.id);

        let purged = gallery.purge_older_than(cutoff).await.unwrap();
        assert_eq!(purged, 1);
    }
}
