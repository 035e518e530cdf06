//! Checkout session creation.
//!
//! Clients only ever send a package identifier. The price, the credit
//! amount, and the user id attached to the session all come from server-side
//! configuration and authentication, so a tampered request cannot buy
//! credits at the wrong price or credit another account.

use axum::{extract::State, response::Json};
use tracing::instrument;

use crate::{
    AppState,
    api::models::{
        payments::{CheckoutRequest, CheckoutResponse},
        users::CurrentUser,
    },
    errors::{Error, Result},
};

/// Create a checkout session for a configured credit package
#[instrument(skip(state, current_user), fields(user_id = %current_user.id, package = %request.package))]
pub async fn create_checkout(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>> {
    let provider = state.payment.as_ref().ok_or_else(|| Error::BadRequest {
        message: "Payments are not configured".to_string(),
    })?;

    let package = state
        .config
        .packages
        .iter()
        .find(|p| p.id == request.package)
        .ok_or_else(|| Error::NotFound {
            resource: "Credit package".to_string(),
            id: request.package.clone(),
        })?;

    let base = state.config.public_base();
    let success_url = format!("{base}/dashboard?payment=success");
    let cancel_url = format!("{base}/credits");

    let url = provider
        .create_checkout_session(&state.db, &current_user, package, &cancel_url, &success_url)
        .await?;

    Ok(Json(CheckoutResponse { url }))
}
