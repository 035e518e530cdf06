//! Replicate generation provider.
//!
//! Submits predictions through the Replicate HTTP API with a webhook filter
//! limited to terminal events, so every job produces exactly one callback.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::ReplicateConfig;
use crate::generation::{GenerationError, GenerationProvider, Result, SubmitRequest};

pub struct ReplicateProvider {
    client: reqwest::Client,
    api_token: String,
    model: String,
    api_base: String,
}

impl From<ReplicateConfig> for ReplicateProvider {
    fn from(config: ReplicateConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_token: config.api_token,
            model: config.model,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    id: String,
}

#[async_trait]
impl GenerationProvider for ReplicateProvider {
    async fn submit(&self, request: &SubmitRequest) -> Result<String> {
        let body = json!({
            "version": self.model,
            "input": {
                "image_input": [request.input_image],
                "prompt": request.prompt,
            },
            "webhook": request.webhook_url,
            "webhook_events_filter": ["completed"],
        });

        let response = self
            .client
            .post(format!("{}/v1/predictions", self.api_base))
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::ProviderApi(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GenerationError::ProviderApi(format!(
                "prediction request returned {status}: {text}"
            )));
        }

        let prediction: PredictionResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidData(format!("malformed prediction response: {e}")))?;

        tracing::info!("Submitted prediction {} to {}", prediction.id, self.model);
        Ok(prediction.id)
    }
}
