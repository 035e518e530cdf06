//! Database record structures matching table schemas.

pub mod credits;
pub mod gallery;
pub mod jobs;
pub mod users;
