//! Generation provider abstraction layer.
//!
//! This module defines the [`GenerationProvider`] trait which abstracts the
//! external image-generation service. The provider is a fire-and-forget
//! collaborator: we submit a job with a callback URL and it reports the
//! terminal result by POSTing to that URL later.

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::GenerationConfig;

pub mod mock;
pub mod replicate;

/// Create a generation provider from configuration.
///
/// This is the single point where we convert config into provider instances.
/// Adding a new provider requires adding a match arm here.
pub fn create_provider(config: &GenerationConfig) -> Arc<dyn GenerationProvider> {
    match config {
        GenerationConfig::Replicate(replicate_config) => Arc::new(replicate::ReplicateProvider::from(replicate_config.clone())),
        GenerationConfig::Mock(mock_config) => Arc::new(mock::MockProvider::from(mock_config.clone())),
    }
}

/// Result type for generation provider operations
pub type Result<T> = std::result::Result<T, GenerationError>;

/// Errors that can occur when talking to the generation provider
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Generation provider API error: {0}")]
    ProviderApi(String),

    #[error("Invalid generation data: {0}")]
    InvalidData(String),
}

impl From<GenerationError> for crate::errors::Error {
    fn from(err: GenerationError) -> Self {
        crate::errors::Error::Upstream { message: err.to_string() }
    }
}

/// A job submission to the generation provider
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub prompt: String,
    /// Base64 data URL of the uploaded image
    pub input_image: String,
    /// Callback URL the provider POSTs the terminal result to
    pub webhook_url: String,
}

/// Abstract generation provider interface
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Submit a job to the provider.
    ///
    /// Returns the provider's own job identifier. The result arrives later on
    /// the webhook; this call only acknowledges acceptance.
    async fn submit(&self, request: &SubmitRequest) -> Result<String>;
}
