// Anthropic-shaped Provider Implementation
//
// Authenticated messages API; the system preamble travels in a separate
// `system` field rather than the message array.
// Default endpoint: https://api.anthropic.com/v1

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{AiError, AiResult, CompletionRequest, FixModelProvider};
use crate::models::ProviderConfig;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_COMPLETION_TOKENS: u32 = 2048;

pub struct AnthropicProvider {
    config: ProviderConfig,
    model_id: String,
    client: Client,
    api_key: String,
}

impl AnthropicProvider {
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
            "x-api-key",
            HeaderValue::from_str(&self.api_key).unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }
}

// Anthropic API types
#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

#[async_trait]
impl FixModelProvider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn complete(&self, request: &CompletionRequest) -> AiResult<String> {
        let url = self.api_url("/messages");

        let body = MessagesRequest {
            model: self.model_id.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: request.user.clone(),
            }],
            max_tokens: MAX_COMPLETION_TOKENS,
            system: request.system.clone(),
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
                let error_type = error.error.error_type.as_str();
                if status.as_u16() == 401 || error_type == "authentication_error" {
                    return Err(AiError::AuthFailed(error.error.message));
                }
                if status.as_u16() == 429 || error_type == "rate_limit_error" {
                    return Err(AiError::RateLimited);
                }
                if error_type == "not_found_error" {
                    return Err(AiError::ModelNotFound(self.model_id.clone()));
                }
                return Err(AiError::Api(error.error.message));
            }

            return Err(AiError::Api(format!("status {}: {}", status, body)));
        }

        let reply: MessagesResponse = response
            .json()
            .await
            .map_err(|e| AiError::MalformedResponse(e.to_string()))?;

        let text = reply
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text.clone())
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(AiError::MalformedResponse(
                "response contained no text blocks".to_string(),
            ));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RequestShape;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(url: &str) -> AnthropicProvider {
        AnthropicProvider::new(
            ProviderConfig {
                name: "anthropic".to_string(),
                shape: RequestShape::AnthropicMessages,
                base_endpoint: url.to_string(),
                api_key: Some("sk-ant-test".to_string()),
            },
            "claude-3-5-haiku-20241022".to_string(),
            "sk-ant-test".to_string(),
        )
    }

    fn fix_request() -> CompletionRequest {
        CompletionRequest {
            system: Some("You fix bugs.".to_string()),
            user: "Explain this error.".to_string(),
        }
    }

    #[tokio::test]
    async fn test_complete_joins_text_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("x-api-key", "sk-ant-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [
                    {"type": "text", "text": "Check the "},
                    {"type": "text", "text": "divisor."}
                ],
                "model": "claude-3-5-haiku-20241022",
            })))
            .mount(&server)
            .await;

        let reply = provider_for(&server.uri())
            .complete(&fix_request())
            .await
            .unwrap();
        assert_eq!(reply, "Check the divisor.");
    }

    #[tokio::test]
    async fn test_complete_maps_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": {"type": "rate_limit_error", "message": "slow down"}
            })))
            .mount(&server)
            .await;

        let err = provider_for(&server.uri())
            .complete(&fix_request())
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::RateLimited));
    }
}
