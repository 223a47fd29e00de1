// OpenAI-shaped Provider Implementation
//
// Authenticated chat-completions API with a message array.
// Default endpoint: https://api.openai.com/v1

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{AiError, AiResult, CompletionRequest, FixModelProvider};
use crate::models::ProviderConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_COMPLETION_TOKENS: u32 = 2048;

pub struct OpenAiProvider {
    config: ProviderConfig,
    model_id: String,
    client: Client,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig, model_id: String, api_key: String) -> Self {
        Self {
            config,
            model_id,
            client: Client::new(),
            api_key,
        }
    }

    fn api_url(&self, path: &str) -> String {
        let base = self.config.base_endpoint.trim_end_matches('/');
        format!("{}{}", base, path)
    }

    fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

#[async_trait]
impl FixModelProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn complete(&self, request: &CompletionRequest) -> AiResult<String> {
        let url = self.api_url("/chat/completions");

        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(Message {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(Message {
            role: "user".to_string(),
            content: request.user.clone(),
        });

        let body = ChatRequest {
            model: self.model_id.clone(),
            messages,
            temperature: 0.2,
            max_tokens: MAX_COMPLETION_TOKENS,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .headers(self.auth_headers())
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();

            if let Ok(error) = serde_json::from_str::<ApiError>(&body) {
                let error_type = error.error.error_type.as_deref().unwrap_or("");
                if status.as_u16() == 401 || error_type == "invalid_api_key" {
                    return Err(AiError::AuthFailed(error.error.message));
                }
                if status.as_u16() == 429 {
                    return Err(AiError::RateLimited);
                }
                if error_type == "model_not_found" || error.error.message.contains("model") {
                    return Err(AiError::ModelNotFound(self.model_id.clone()));
                }
                return Err(AiError::Api(error.error.message));
            }

            return Err(AiError::Api(format!("status {}: {}", status, body)));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AiError::MalformedResponse(e.to_string()))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| AiError::MalformedResponse("response contained no choices".to_string()))
    }
}
