// Configuration snapshot models
//
// The admin layer (connections, providers, channels) is an external
// collaborator. The core receives its output as an immutable BridgeConfig
// snapshot: value structs deserialized once at startup and passed
// explicitly into each call. Nothing here is mutated by the core.

use serde::{Deserialize, Serialize};

fn default_ref() -> String {
    "main".to_string()
}

/// Resolved GitLab connection: base endpoint plus an already-refreshed
/// access token. Token acquisition and refresh belong to the admin layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitLabConnection {
    pub name: String,
    pub instance_url: String,
    #[serde(default)]
    pub access_token: Option<String>,
}

impl GitLabConnection {
    pub fn has_token(&self) -> bool {
        self.access_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Maps a local repository name to a GitLab project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    /// Name of the GitLabConnection this repository belongs to
    pub connection: String,
    pub local_name: String,
    pub project_id: u64,
    pub project_path: String,
    #[serde(default = "default_ref")]
    pub default_ref: String,
    /// Forces locally hosted model providers for this repository
    #[serde(default)]
    pub privacy_mode: bool,
}

/// Broad provider shape: authenticated chat API vs. unauthenticated local HTTP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    CloudChat,
    LocalHttp,
}

/// Concrete request/response shape spoken by the provider endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestShape {
    OpenAiChat,
    AnthropicMessages,
    OllamaGenerate,
}

impl RequestShape {
    pub fn kind(&self) -> ProviderKind {
        match self {
            RequestShape::OpenAiChat | RequestShape::AnthropicMessages => ProviderKind::CloudChat,
            RequestShape::OllamaGenerate => ProviderKind::LocalHttp,
        }
    }
}

/// One configured model provider endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub shape: RequestShape,
    pub base_endpoint: String,
    /// Opaque credential handle; required for cloud providers only
    #[serde(default)]
    pub api_key: Option<String>,
}

impl ProviderConfig {
    pub fn kind(&self) -> ProviderKind {
        self.shape.kind()
    }

    pub fn is_local(&self) -> bool {
        self.kind() == ProviderKind::LocalHttp
    }
}

/// One selectable model on a configured provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Name of the ProviderConfig this model runs on
    pub provider: String,
    pub model_id: String,
    pub display_name: String,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Slack,
    Teams,
}

/// Incoming-webhook notification target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub name: String,
    pub kind: ChannelKind,
    pub webhook_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    OnFixGenerated,
}

/// Routes an event to a notification channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRule {
    pub channel: String,
    pub event: NotificationEvent,
}

/// Immutable configuration snapshot handed to every core call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub connections: Vec<GitLabConnection>,
    #[serde(default)]
    pub repositories: Vec<Repository>,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub channels: Vec<NotificationChannel>,
    #[serde(default)]
    pub rules: Vec<NotificationRule>,
}

impl BridgeConfig {
    pub fn connection(&self, name: &str) -> Option<&GitLabConnection> {
        self.connections.iter().find(|c| c.name == name)
    }

    pub fn repository(&self, connection: &str, local_name: &str) -> Option<&Repository> {
        self.repositories
            .iter()
            .find(|r| r.connection == connection && r.local_name == local_name)
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    pub fn channel(&self, name: &str) -> Option<&NotificationChannel> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// Look up a model by id or display name
    pub fn model(&self, name: &str) -> Option<&ModelConfig> {
        self.models
            .iter()
            .find(|m| m.model_id == name || m.display_name == name)
    }

    /// The configured default model, falling back to the first one
    pub fn default_model(&self) -> Option<&ModelConfig> {
        self.models
            .iter()
            .find(|m| m.is_default)
            .or_else(|| self.models.first())
    }

    /// The default model among those running on local providers
    pub fn default_local_model(&self) -> Option<&ModelConfig> {
        let mut local = self
            .models
            .iter()
            .filter(|m| self.provider(&m.provider).is_some_and(|p| p.is_local()));
        local.clone().find(|m| m.is_default).or_else(|| local.next())
    }

    /// Channels subscribed to an event via the configured rules
    pub fn channels_for_event(&self, event: NotificationEvent) -> Vec<&NotificationChannel> {
        self.rules
            .iter()
            .filter(|r| r.event == event)
            .filter_map(|r| self.channel(&r.channel))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> BridgeConfig {
        toml::from_str(
            r#"
            [[connections]]
            name = "main"
            instance_url = "https://gitlab.example.com"
            access_token = "glpat-test"

            [[repositories]]
            connection = "main"
            local_name = "backend"
            project_id = 42
            project_path = "group/backend"
            privacy_mode = true

            [[providers]]
            name = "openai"
            shape = "open_ai_chat"
            base_endpoint = "https://api.openai.com/v1"
            api_key = "sk-test"

            [[providers]]
            name = "local-ollama"
            shape = "ollama_generate"
            base_endpoint = "http://127.0.0.1:11434"

            [[models]]
            provider = "openai"
            model_id = "gpt-4o-mini"
            display_name = "GPT-4o Mini"
            is_default = true

            [[models]]
            provider = "local-ollama"
            model_id = "qwen2.5-coder:7b"
            display_name = "Qwen Coder"

            [[channels]]
            name = "dev-alerts"
            kind = "slack"
            webhook_url = "https://hooks.slack.com/services/T/B/X"

            [[rules]]
            channel = "dev-alerts"
            event = "on_fix_generated"
            "#,
        )
        .expect("sample config should parse")
    }

    #[test]
    fn test_lookup_helpers() {
        let config = sample_config();
        assert!(config.connection("main").is_some());
        assert!(config.connection("missing").is_none());

        let repo = config.repository("main", "backend").unwrap();
        assert_eq!(repo.default_ref, "main");
        assert!(repo.privacy_mode);
    }

    #[test]
    fn test_model_lookup_by_id_or_display_name() {
        let config = sample_config();
        assert!(config.model("gpt-4o-mini").is_some());
        assert!(config.model("GPT-4o Mini").is_some());
        assert!(config.model("nope").is_none());
    }

    #[test]
    fn test_default_model_selection() {
        let config = sample_config();
        assert_eq!(config.default_model().unwrap().model_id, "gpt-4o-mini");
        assert_eq!(
            config.default_local_model().unwrap().model_id,
            "qwen2.5-coder:7b"
        );
    }

    #[test]
    fn test_provider_kind_from_shape() {
        let config = sample_config();
        assert_eq!(
            config.provider("openai").unwrap().kind(),
            ProviderKind::CloudChat
        );
        assert!(config.provider("local-ollama").unwrap().is_local());
    }

    #[test]
    fn test_channels_for_event() {
        let config = sample_config();
        let channels = config.channels_for_event(NotificationEvent::OnFixGenerated);
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].name, "dev-alerts");
    }
}
