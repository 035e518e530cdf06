//! Common type definitions.
//!
//! All entity IDs are UUIDs wrapped in type aliases for better type safety:
//!
//! - [`UserId`]: User account identifier
//! - [`JobId`]: Generation job identifier
//! - [`ApiKeyId`]: API key identifier

use uuid::Uuid;

pub type UserId = Uuid;
pub type JobId = Uuid;
pub type ApiKeyId = Uuid;
