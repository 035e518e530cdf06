//! Credit ledger repository.
//!
//! Balances live in the `credits` table and are only ever changed by a single
//! conditional increment, so concurrent adjustments cannot lose updates or
//! drive a balance negative. Every change is paired with an append-only row in
//! `credit_transactions` whose unique `source_id` makes adjustments idempotent.

use crate::db::{
    errors::Result,
    models::credits::{AdjustOutcome, CreditAdjustment, CreditTransactionDBResponse},
};
use crate::types::UserId;
use sqlx::{Connection, PgConnection};

const TRANSACTION_COLUMNS: &str = "id, user_id, kind, amount, source_id, description, created_at";

pub struct Credits<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Credits<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Apply a ledger adjustment atomically.
    ///
    /// Inserts the transaction row first, so a duplicate `source_id` surfaces
    /// as [`crate::db::errors::DbError::UniqueViolation`] before the balance
    /// is touched. The balance itself moves via `amount = amount + delta`
    /// guarded by `amount + delta >= 0`; if the guard rejects the change the
    /// whole transaction rolls back and
    /// [`AdjustOutcome::InsufficientFunds`] is returned.
    pub async fn adjust(&mut self, request: &CreditAdjustment) -> Result<AdjustOutcome> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO credit_transactions (user_id, kind, amount, source_id, description)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(request.user_id)
        .bind(&request.kind)
        .bind(request.amount)
        .bind(&request.source_id)
        .bind(&request.description)
        .execute(&mut *tx)
        .await?;

        // Balance rows are created lazily on a user's first adjustment
        sqlx::query("INSERT INTO credits (user_id, amount) VALUES ($1, 0) ON CONFLICT (user_id) DO NOTHING")
            .bind(request.user_id)
            .execute(&mut *tx)
            .await?;

        let balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE credits
            SET amount = amount + $2
            WHERE user_id = $1 AND amount + $2 >= 0
            RETURNING amount
            "#,
        )
        .bind(request.user_id)
        .bind(request.amount)
        .fetch_optional(&mut *tx)
        .await?;

        match balance {
            Some(balance) => {
                tx.commit().await?;
                Ok(AdjustOutcome::Applied { balance })
            }
            None => {
                tx.rollback().await?;
                Ok(AdjustOutcome::InsufficientFunds)
            }
        }
    }

    /// Return a job's credit, tolerating the case where another path already
    /// refunded it.
    ///
    /// The refunded amount mirrors the job's recorded debit row, so changing
    /// the configured job cost mid-flight cannot skew the compensation. Every
    /// refund path for a job shares one `source_id`, so a duplicate surfaces
    /// as a unique violation here and is reported as `false` rather than an
    /// error. A job with no debit on record has nothing to compensate.
    pub async fn refund_job(&mut self, user_id: UserId, job_id: crate::types::JobId, reason: &str) -> Result<bool> {
        let debited: Option<i64> = sqlx::query_scalar("SELECT -amount FROM credit_transactions WHERE source_id = $1")
            .bind(format!("job:{job_id}:debit"))
            .fetch_optional(&mut *self.db)
            .await?;
        let Some(cost) = debited else {
            return Ok(false);
        };

        let adjustment = CreditAdjustment::job_refund(user_id, job_id, cost, reason);
        match self.adjust(&adjustment).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_unique_violation_on("credit_transactions_source_id_unique") => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Get the current balance for a user (0 if no balance row exists yet)
    pub async fn balance(&mut self, user_id: UserId) -> Result<i64> {
        let balance: Option<i64> = sqlx::query_scalar("SELECT amount FROM credits WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(balance.unwrap_or(0))
    }

    /// List transactions for a specific user with pagination, newest first
    pub async fn list_user_transactions(
        &mut self,
        user_id: UserId,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<CreditTransactionDBResponse>> {
        let query = format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM credit_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            OFFSET $2
            LIMIT $3
            "#
        );

        let transactions = sqlx::query_as::<_, CreditTransactionDBResponse>(&query)
            .bind(user_id)
            .bind(skip)
            .bind(limit)
            .fetch_all(&mut *self.db)
            .await?;

        Ok(transactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::errors::DbError;
    use crate::db::models::credits::CreditTransactionKind;
    use crate::test_utils::create_test_user;
    use sqlx::PgPool;

    fn purchase(user_id: UserId, amount: i64, source_id: &str) -> CreditAdjustment {
        CreditAdjustment {
            user_id,
            kind: CreditTransactionKind::Purchase,
            amount,
            source_id: source_id.to_string(),
            description: None,
        }
    }

    #[sqlx::test]
    async fn adjust_creates_balance_and_accumulates(pool: PgPool) {
        let user = create_test_user(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut credits = Credits::new(&mut conn);

        assert_eq!(credits.balance(user.id).await.unwrap(), 0);

        let outcome = credits.adjust(&purchase(user.id, 10, "p1")).await.unwrap();
        assert_eq!(outcome, AdjustOutcome::Applied { balance: 10 });

        let outcome = credits.adjust(&purchase(user.id, 5, "p2")).await.unwrap();
        assert_eq!(outcome, AdjustOutcome::Applied { balance: 15 });

        assert_eq!(credits.balance(user.id).await.unwrap(), 15);
    }

    #[sqlx::test]
    async fn debit_below_zero_is_rejected_and_leaves_no_trace(pool: PgPool) {
        let user = create_test_user(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut credits = Credits::new(&mut conn);

        credits.adjust(&purchase(user.id, 2, "p1")).await.unwrap();

        let outcome = credits.adjust(&purchase(user.id, -3, "d1")).await.unwrap();
        assert_eq!(outcome, AdjustOutcome::InsufficientFunds);

        // Balance untouched and no transaction row survived the rollback
        assert_eq!(credits.balance(user.id).await.unwrap(), 2);
        let txs = credits.list_user_transactions(user.id, 0, 10).await.unwrap();
        assert_eq!(txs.len(), 1);

        // The rejected source_id is reusable
        let outcome = credits.adjust(&purchase(user.id, -1, "d1")).await.unwrap();
        assert_eq!(outcome, AdjustOutcome::Applied { balance: 1 });
    }

    #[sqlx::test]
    async fn duplicate_source_id_is_rejected(pool: PgPool) {
        let user = create_test_user(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut credits = Credits::new(&mut conn);

        credits.adjust(&purchase(user.id, 10, "same")).await.unwrap();
        let err = credits.adjust(&purchase(user.id, 10, "same")).await.unwrap_err();

        assert!(err.is_unique_violation_on("credit_transactions_source_id_unique"), "got {err:?}");
        assert_eq!(credits.balance(user.id).await.unwrap(), 10);
    }

    #[sqlx::test]
    async fn concurrent_debits_never_lose_updates(pool: PgPool) {
        let user = create_test_user(&pool).await;
        {
            let mut conn = pool.acquire().await.unwrap();
            let mut credits = Credits::new(&mut conn);
            credits.adjust(&purchase(user.id, 5, "seed")).await.unwrap();
        }

        // 10 racing debits against a balance of 5: exactly 5 may apply
        let mut handles = Vec::new();
        for i in 0..10 {
            let pool = pool.clone();
            let user_id = user.id;
            handles.push(tokio::spawn(async move {
                let mut conn = pool.acquire().await.unwrap();
                let mut credits = Credits::new(&mut conn);
                credits.adjust(&purchase(user_id, -1, &format!("debit-{i}"))).await.unwrap()
            }));
        }

        let mut applied = 0;
        for handle in handles {
            if let AdjustOutcome::Applied { .. } = handle.await.unwrap() {
                applied += 1;
            }
        }

        assert_eq!(applied, 5);
        let mut conn = pool.acquire().await.unwrap();
        let mut credits = Credits::new(&mut conn);
        assert_eq!(credits.balance(user.id).await.unwrap(), 0);

        // Ledger sums to the balance
        let txs = credits.list_user_transactions(user.id, 0, 100).await.unwrap();
        let sum: i64 = txs.iter().map(|t| t.amount).sum();
        assert_eq!(sum, 0);
    }

    #[sqlx::test]
    async fn refund_applies_at_most_once(pool: PgPool) {
        let user = create_test_user(&pool).await;
        let job_id = uuid::Uuid::new_v4();
        let mut conn = pool.acquire().await.unwrap();
        let mut credits = Credits::new(&mut conn);

        credits.adjust(&purchase(user.id, 5, "seed")).await.unwrap();
        credits.adjust(&CreditAdjustment::job_debit(user.id, job_id, 1)).await.unwrap();

        assert!(credits.refund_job(user.id, job_id, "submission failed").await.unwrap());
        // Second path racing to refund the same job is a no-op
        assert!(!credits.refund_job(user.id, job_id, "processing timed out").await.unwrap());
        assert_eq!(credits.balance(user.id).await.unwrap(), 5);
    }

    #[sqlx::test]
    async fn refund_mirrors_the_recorded_debit(pool: PgPool) {
        let user = create_test_user(&pool).await;
        let job_id = uuid::Uuid::new_v4();
        let mut conn = pool.acquire().await.unwrap();
        let mut credits = Credits::new(&mut conn);

        // Job submitted when the cost was 2; the operator has since changed it
        credits.adjust(&purchase(user.id, 5, "seed")).await.unwrap();
        credits.adjust(&CreditAdjustment::job_debit(user.id, job_id, 2)).await.unwrap();
        assert_eq!(credits.balance(user.id).await.unwrap(), 3);

        assert!(credits.refund_job(user.id, job_id, "generation failed").await.unwrap());
        assert_eq!(credits.balance(user.id).await.unwrap(), 5);
    }

    #[sqlx::test]
    async fn refund_without_a_recorded_debit_is_a_noop(pool: PgPool) {
        let user = create_test_user(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut credits = Credits::new(&mut conn);

        assert!(!credits.refund_job(user.id, uuid::Uuid::new_v4(), "never debited").await.unwrap());
        assert_eq!(credits.balance(user.id).await.unwrap(), 0);
    }

    #[sqlx::test]
    async fn adjust_for_unknown_user_fails_fk(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut credits = Credits::new(&mut conn);

        let err = credits.adjust(&purchase(uuid::Uuid::new_v4(), 10, "p1")).await.unwrap_err();
        assert!(matches!(err, DbError::ForeignKeyViolation { .. }), "got {err:?}");
    }
}
