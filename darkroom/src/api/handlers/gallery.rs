//! Gallery listings.
//!
//! Expiry is enforced server-side: the listing filters by the configured TTL
//! so entries disappear for every client at the same moment, whether or not
//! the reaper has physically deleted them yet.

use axum::{
    extract::{Query, State},
    response::Json,
};
use chrono::Utc;

use crate::{
    AppState,
    api::models::{gallery::GalleryImageResponse, pagination::Pagination, users::CurrentUser},
    db::handlers::Gallery,
    errors::{Error, Result},
};

/// List the current user's unexpired gallery images, newest first
pub async fn list_gallery(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<GalleryImageResponse>>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    let cutoff = Utc::now() - state.config.gallery.ttl;
    let images = Gallery::new(&mut conn)
        .list_for_user(current_user.id, cutoff, pagination.skip, pagination.limit)
        .await?;

    Ok(Json(images.into_iter().map(GalleryImageResponse::from).collect()))
}
