//! Payment provider abstraction layer.
//!
//! This module defines the [`PaymentProvider`] trait which abstracts payment
//! processing across providers. The flow is checkout-session based: we create
//! a session carrying trusted metadata (user id + credits), the provider
//! hosts the payment, and a signed webhook tells us to credit the ledger.

use async_trait::async_trait;
use axum::http::HeaderMap;
use sqlx::PgPool;

use crate::{
    api::models::users::CurrentUser,
    config::{CreditPackage, PaymentConfig},
    types::UserId,
};

pub mod dummy;
pub mod stripe;

/// Create a payment provider from configuration.
///
/// This is the single point where we convert config into provider instances.
/// Adding a new provider requires adding a match arm here.
pub fn create_provider(config: &PaymentConfig) -> Box<dyn PaymentProvider> {
    match config {
        PaymentConfig::Stripe(stripe_config) => Box::new(stripe::StripeProvider::from(stripe_config.clone())),
        PaymentConfig::Dummy(dummy_config) => Box::new(dummy::DummyProvider::from(dummy_config.clone())),
    }
}

/// Result type for payment provider operations
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Errors that can occur during payment processing
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment provider API error: {0}")]
    ProviderApi(String),

    #[error("Database error: {0}")]
    Database(crate::db::errors::DbError),

    #[error("Webhook signature verification failed")]
    InvalidSignature,

    #[error("Invalid payment data: {0}")]
    InvalidData(String),

    #[error("Payment already processed")]
    AlreadyProcessed,
}

impl From<crate::db::errors::DbError> for PaymentError {
    fn from(err: crate::db::errors::DbError) -> Self {
        // Duplicate source_id means the event was already applied: surface it
        // as AlreadyProcessed so redeliveries are acknowledged, not retried.
        // Everything else stays a database error so a transient failure while
        // crediting a verified event returns 5xx and the provider redelivers.
        if err.is_unique_violation_on("credit_transactions_source_id_unique") {
            PaymentError::AlreadyProcessed
        } else {
            PaymentError::Database(err)
        }
    }
}

impl From<sqlx::Error> for PaymentError {
    fn from(err: sqlx::Error) -> Self {
        PaymentError::Database(err.into())
    }
}

impl From<PaymentError> for crate::errors::Error {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::InvalidSignature => crate::errors::Error::InvalidSignature,
            PaymentError::ProviderApi(message) => crate::errors::Error::Upstream { message },
            PaymentError::InvalidData(message) => crate::errors::Error::BadRequest { message },
            PaymentError::Database(e) => crate::errors::Error::Database(e),
            // Callers should treat AlreadyProcessed as success before converting
            PaymentError::AlreadyProcessed => crate::errors::Error::Internal {
                operation: "process an already-processed payment".to_string(),
            },
        }
    }
}

/// A validated webhook event from a payment provider.
///
/// The user id and credit amount come from session metadata that we attached
/// server-side at checkout creation; they are only trusted because the
/// payload signature has already been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    /// Type of event (e.g., "checkout.session.completed")
    pub event_type: String,
    /// Session ID associated with this event, if applicable
    pub session_id: Option<String>,
    /// User to credit, from session metadata
    pub user_id: Option<UserId>,
    /// Credits purchased, from session metadata
    pub credits: Option<i64>,
}

/// Abstract payment provider interface
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Create a new checkout session for a credit package.
    ///
    /// Returns a URL that the user should be redirected to for payment. The
    /// session's metadata carries the user id and package credits so the
    /// completion webhook can credit the right account without trusting the
    /// client.
    async fn create_checkout_session(
        &self,
        db_pool: &PgPool,
        user: &CurrentUser,
        package: &CreditPackage,
        cancel_url: &str,
        success_url: &str,
    ) -> Result<String>;

    /// Validate and extract a webhook event from raw request data.
    ///
    /// Verification happens over the raw body, before any parsing. Returns
    /// `None` if this provider doesn't deliver webhooks. Returns `Err` if
    /// validation fails (invalid signature, malformed data, etc.)
    async fn validate_webhook(&self, headers: &HeaderMap, body: &str) -> Result<Option<WebhookEvent>>;

    /// Process a validated webhook event.
    ///
    /// Called after `validate_webhook` succeeds. Idempotent: processing the
    /// same event multiple times credits the ledger exactly once.
    async fn process_webhook_event(&self, db_pool: &PgPool, event: &WebhookEvent) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::errors::DbError;
    use axum::http::StatusCode;

    #[test]
    fn persistence_failure_surfaces_as_server_error() {
        // A transient database failure after signature verification must come
        // back 5xx so the provider keeps redelivering the event
        let db_err = DbError::Other(anyhow::anyhow!("connection refused"));
        let err: crate::errors::Error = PaymentError::from(db_err).into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn duplicate_source_maps_to_already_processed() {
        let db_err = DbError::UniqueViolation {
            constraint: Some("credit_transactions_source_id_unique".to_string()),
            table: Some("credit_transactions".to_string()),
            message: "duplicate key value".to_string(),
        };
        assert!(matches!(PaymentError::from(db_err), PaymentError::AlreadyProcessed));
    }
}
