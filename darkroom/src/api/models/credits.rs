//! API response models for the credit ledger.

use crate::db::models::credits::{CreditTransactionDBResponse, CreditTransactionKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct BalanceResponse {
    pub balance: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub kind: CreditTransactionKind,
    pub amount: i64,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<CreditTransactionDBResponse> for TransactionResponse {
    fn from(tx: CreditTransactionDBResponse) -> Self {
        Self {
            id: tx.id,
            kind: tx.kind,
            amount: tx.amount,
            description: tx.description,
            created_at: tx.created_at,
        }
    }
}
