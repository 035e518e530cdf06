//! Balance and transaction history for the current user.

use axum::{
    extract::{Query, State},
    response::Json,
};

use crate::{
    AppState,
    api::models::{
        credits::{BalanceResponse, TransactionResponse},
        pagination::Pagination,
        users::CurrentUser,
    },
    db::handlers::Credits,
    errors::{Error, Result},
};

/// Get the current user's credit balance
pub async fn get_balance(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<BalanceResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    let balance = Credits::new(&mut conn).balance(current_user.id).await?;

    Ok(Json(BalanceResponse { balance }))
}

/// List the current user's ledger entries, newest first
pub async fn list_transactions(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<TransactionResponse>>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    let transactions = Credits::new(&mut conn)
        .list_user_transactions(current_user.id, pagination.skip, pagination.limit)
        .await?;

    Ok(Json(transactions.into_iter().map(TransactionResponse::from).collect()))
}
