//! HTTP request handlers for all API endpoints.
//!
//! Handlers are organized by resource. Each one deserializes the request,
//! derives the acting user from authentication (never from the payload),
//! runs business logic through the database repositories, and serializes the
//! response. Errors convert to HTTP status codes via [`crate::errors::Error`].
//!
//! - [`jobs`]: job submission, status polling, and listings
//! - [`credits`]: balance and transaction history
//! - [`gallery`]: time-limited gallery listings
//! - [`payments`]: checkout session creation
//! - [`webhooks`]: inbound callbacks from generation and payment providers

pub mod credits;
pub mod gallery;
pub mod jobs;
pub mod payments;
pub mod webhooks;
