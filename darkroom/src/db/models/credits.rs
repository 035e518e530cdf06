//! Database models for the credit ledger.

use crate::types::{JobId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Credit transaction kind stored as TEXT in database
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::Type, PartialEq)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CreditTransactionKind {
    Purchase,
    JobDebit,
    JobRefund,
    SignupGrant,
}

/// Database request for applying a ledger adjustment
#[derive(Debug, Clone)]
pub struct CreditAdjustment {
    pub user_id: UserId,
    pub kind: CreditTransactionKind,
    /// Signed delta: positive credits, negative debits
    pub amount: i64,
    /// Idempotency key; an adjustment with a previously seen source_id is rejected
    pub source_id: String,
    pub description: Option<String>,
}

impl CreditAdjustment {
    /// Debit for submitting a job. One debit per job id can ever apply.
    pub fn job_debit(user_id: UserId, job_id: JobId, cost: i64) -> Self {
        Self {
            user_id,
            kind: CreditTransactionKind::JobDebit,
            amount: -cost,
            source_id: format!("job:{job_id}:debit"),
            description: Some("Image generation job".to_string()),
        }
    }

    /// Compensating refund for a job that did not produce output.
    ///
    /// All refund paths for a job (submission failure, provider failure
    /// webhook, expiry) share one source_id, so a job's credit can only ever
    /// be returned once no matter how many paths fire.
    pub fn job_refund(user_id: UserId, job_id: JobId, cost: i64, reason: &str) -> Self {
        Self {
            user_id,
            kind: CreditTransactionKind::JobRefund,
            amount: cost,
            source_id: format!("job:{job_id}:refund"),
            description: Some(reason.to_string()),
        }
    }

    /// Purchase settled by a payment provider. The checkout session id is the
    /// idempotency key, so redelivered webhooks credit at most once.
    pub fn purchase(user_id: UserId, credits: i64, session_id: &str) -> Self {
        Self {
            user_id,
            kind: CreditTransactionKind::Purchase,
            amount: credits,
            source_id: session_id.to_string(),
            description: Some(format!("Purchased {credits} credits")),
        }
    }

    /// Starter credits granted when an account is first seen.
    pub fn signup_grant(user_id: UserId, amount: i64) -> Self {
        Self {
            user_id,
            kind: CreditTransactionKind::SignupGrant,
            amount,
            source_id: format!("signup:{user_id}"),
            description: Some("Welcome credits".to_string()),
        }
    }
}

/// Outcome of applying a [`CreditAdjustment`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdjustOutcome {
    /// The adjustment was applied; contains the new balance
    Applied { balance: i64 },
    /// A debit would have taken the balance negative; nothing was changed
    InsufficientFunds,
}

/// Database response for a credit transaction
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CreditTransactionDBResponse {
    pub id: Uuid,
    pub user_id: UserId,
    pub kind: CreditTransactionKind,
    pub amount: i64,
    pub source_id: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}
