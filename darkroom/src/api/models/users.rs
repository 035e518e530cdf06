//! API request/response models for users.

use crate::types::UserId;
use serde::Serialize;
use sqlx::FromRow;

/// The authenticated caller, resolved from a bearer API key or a trusted
/// proxy identity header.
///
/// Derived entirely server-side; request payloads never influence who the
/// caller is.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CurrentUser {
    pub id: UserId,
    pub email: String,
}
