// Data models shared across services and the MCP server

pub mod config;
pub mod error_record;
pub mod fix;

pub use config::{
    BridgeConfig, ChannelKind, GitLabConnection, ModelConfig, NotificationChannel,
    NotificationEvent, NotificationRule, ProviderConfig, ProviderKind, Repository, RequestShape,
};
pub use error_record::{ErrorKind, ErrorRecord, LogSummary, Severity};
pub use fix::{CodeContext, FixOutcome, FixReport, FixSuggestion, LineWindow};
