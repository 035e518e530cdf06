//! API request/response models.

pub mod credits;
pub mod gallery;
pub mod jobs;
pub mod pagination;
pub mod payments;
pub mod users;
