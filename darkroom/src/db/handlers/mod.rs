//! Repository implementations for database access.
//!
//! This module provides repository structs for each major entity in the system.
//! Repositories follow a consistent pattern; [`Jobs`] implements the
//! [`Repository`] trait, while the others expose bespoke operations.
//!
//! # Design Pattern
//!
//! Each repository:
//! - Wraps a SQLx connection or transaction
//! - Provides strongly-typed operations
//! - Handles query construction and parameter binding
//! - Returns domain models from [`crate::db::models`]
//!
//! # Available Repositories
//!
//! - [`Users`]: User accounts and API keys
//! - [`Credits`]: Credit balance and the append-only transaction ledger
//! - [`Jobs`]: Generation job records and status transitions
//! - [`Gallery`]: Gallery entries materialized from completed jobs

pub mod credits;
pub mod gallery;
pub mod jobs;
pub mod repository;
pub mod users;

pub use credits::Credits;
pub use gallery::Gallery;
pub use jobs::Jobs;
pub use repository::Repository;
pub use users::Users;
