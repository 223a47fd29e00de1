// AI Provider Module
//
// Uniform completion interface over heterogeneous backends. Cloud
// providers speak authenticated chat APIs (OpenAI chat completions,
// Anthropic messages); the local provider speaks Ollama's
// unauthenticated single-prompt generate endpoint. The orchestrator
// only ever sees the FixModelProvider trait.

pub mod anthropic;
pub mod error;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;

pub use anthropic::AnthropicProvider;
pub use error::{AiError, AiResult};
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use crate::models::{BridgeConfig, ModelConfig, ProviderConfig, Repository, RequestShape};

/// One completion request: an optional system preamble plus the user
/// prompt. Chat-shaped providers map these onto a message array; the
/// local provider concatenates them into a single prompt body.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub user: String,
}

impl CompletionRequest {
    /// Flattened form for single-prompt backends
    pub fn as_single_prompt(&self) -> String {
        match &self.system {
            Some(system) => format!("{}\n\n{}", system, self.user),
            None => self.user.clone(),
        }
    }
}

/// Capability interface implemented once per provider kind
#[async_trait]
pub trait FixModelProvider: Send + Sync {
    /// Provider identifier for result attribution
    fn name(&self) -> &str;

    /// Model identifier this provider instance is bound to
    fn model_id(&self) -> &str;

    /// Perform one completion call and return the raw reply text
    async fn complete(&self, request: &CompletionRequest) -> AiResult<String>;
}

pub type BoxedProvider = Box<dyn FixModelProvider>;

/// Build a provider adapter for a configured provider/model pair
pub fn create_provider(provider: &ProviderConfig, model: &ModelConfig) -> AiResult<BoxedProvider> {
    match provider.shape {
        RequestShape::OllamaGenerate => Ok(Box::new(OllamaProvider::new(
            provider.clone(),
            model.model_id.clone(),
        ))),
        RequestShape::OpenAiChat => {
            let key = require_api_key(provider)?;
            Ok(Box::new(OpenAiProvider::new(
                provider.clone(),
                model.model_id.clone(),
                key,
            )))
        }
        RequestShape::AnthropicMessages => {
            let key = require_api_key(provider)?;
            Ok(Box::new(AnthropicProvider::new(
                provider.clone(),
                model.model_id.clone(),
                key,
            )))
        }
    }
}

fn require_api_key(provider: &ProviderConfig) -> AiResult<String> {
    provider
        .api_key
        .clone()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| {
            AiError::InvalidConfig(format!("provider '{}' requires an API key", provider.name))
        })
}

/// Resolve the provider/model pair for a fix-generation call
///
/// An explicit request is matched by model id or display name; otherwise
/// the configured default applies. Privacy mode on the repository forces
/// a locally hosted provider and rejects (never silently ignores) an
/// explicit cloud-model request.
pub fn select_model<'a>(
    config: &'a BridgeConfig,
    repository: &Repository,
    requested: Option<&str>,
) -> AiResult<(&'a ProviderConfig, &'a ModelConfig)> {
    let model = match requested {
        Some(name) => config
            .model(name)
            .ok_or_else(|| AiError::ModelNotFound(name.to_string()))?,
        None if repository.privacy_mode => config.default_local_model().ok_or_else(|| {
            AiError::InvalidConfig(format!(
                "privacy mode is enabled for '{}' but no local model is configured",
                repository.local_name
            ))
        })?,
        None => config.default_model().ok_or_else(|| {
            AiError::InvalidConfig("no model configured and none requested".to_string())
        })?,
    };

    let provider = config.provider(&model.provider).ok_or_else(|| {
        AiError::InvalidConfig(format!(
            "model '{}' references unknown provider '{}'",
            model.model_id, model.provider
        ))
    })?;

    if repository.privacy_mode && !provider.is_local() {
        return Err(AiError::PrivacyViolation(format!(
            "model '{}' runs on cloud provider '{}'",
            model.model_id, provider.name
        )));
    }

    Ok((provider, model))
}
