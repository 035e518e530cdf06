//! Mock generation provider.
//!
//! Accepts (or rejects) every submission without leaving the process. Used in
//! development and by tests that need to count provider calls or inject
//! failures between the debit and the provider acknowledgement.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::config::MockGenerationConfig;
use crate::generation::{GenerationError, GenerationProvider, Result, SubmitRequest};

#[derive(Default)]
pub struct MockProvider {
    fail_submissions: AtomicBool,
    calls: AtomicUsize,
}

impl From<MockGenerationConfig> for MockProvider {
    fn from(config: MockGenerationConfig) -> Self {
        Self {
            fail_submissions: AtomicBool::new(config.fail_submissions),
            calls: AtomicUsize::new(0),
        }
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider that rejects every submission
    pub fn failing() -> Self {
        Self {
            fail_submissions: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of submissions attempted against this provider
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_submissions.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl GenerationProvider for MockProvider {
    async fn submit(&self, request: &SubmitRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(GenerationError::ProviderApi("mock provider rejected submission".to_string()));
        }

        tracing::debug!("Mock provider accepted submission with webhook {}", request.webhook_url);
        Ok(format!("mock_{}", uuid::Uuid::new_v4()))
    }
}
