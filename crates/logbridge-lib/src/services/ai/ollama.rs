// Ollama-shaped Provider Implementation
//
// Locally hosted model server with an unauthenticated single-prompt
// generate endpoint. This is the provider kind privacy mode forces.
// Default endpoint: http://127.0.0.1:11434

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{AiError, AiResult, CompletionRequest, FixModelProvider};
use crate::models::ProviderConfig;

// Local inference can be slow on modest hardware
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub struct OllamaProvider {
    config: ProviderConfig,
    model_id: String,
    client: Client,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig, model_id: String) -> Self {
        Self {
            config,
            model_id,
            client: Client::new(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        let base = self.config.base_endpoint.trim_end_matches('/');
        format!("{}{}", base, path)
    }
}

// Ollama API types
#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[async_trait]
impl FixModelProvider for OllamaProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn complete(&self, request: &CompletionRequest) -> AiResult<String> {
        let url = self.api_url("/api/generate");

        let body = GenerateRequest {
            model: self.model_id.clone(),
            prompt: request.as_single_prompt(),
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AiError::Timeout
                } else if e.is_connect() {
                    AiError::Unavailable(format!(
                        "cannot reach Ollama at {}: {}",
                        self.config.base_endpoint, e
                    ))
                } else {
                    AiError::Api(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if body.contains("model") && body.contains("not found") {
                return Err(AiError::ModelNotFound(self.model_id.clone()));
            }
            return Err(AiError::Api(format!("status {}: {}", status, body)));
        }

        let reply: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AiError::MalformedResponse(e.to_string()))?;

        if reply.response.is_empty() {
            return Err(AiError::MalformedResponse(
                "empty generate response".to_string(),
            ));
        }
        Ok(reply.response)
    }
}
