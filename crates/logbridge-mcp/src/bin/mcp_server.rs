// Logbridge MCP Server
// Exposes log analysis, GitLab code context and AI fix generation as MCP
// tools for AI assistants like Claude Code.
//
// Run with: cargo run --bin logbridge-mcp
//
// stdout carries the MCP protocol; all diagnostics go to stderr.

use std::sync::Arc;
use std::time::Instant;

use rmcp::{
    ErrorData as McpError,
    ServerHandler,
    handler::server::tool::{ToolCallContext, ToolRouter},
    handler::server::wrapper::Parameters,
    model::*,
    service::RequestContext,
    tool, tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::io::{stdin, stdout};
#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use logbridge_lib::models::{GitLabConnection, NotificationEvent, Repository};
use logbridge_lib::services::fix::{self, FixError};
use logbridge_lib::services::gitlab::GitLabClient;
use logbridge_lib::services::log_analyzer;
use logbridge_lib::services::notification::{Notification, Notifier};
use logbridge_lib::utils::settings;
use logbridge_lib::BridgeConfig;

// ============================================================================
// Parameter Types for Tools (must derive JsonSchema)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListRepositoriesParams {
    /// Optional connection name to filter repositories
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListProjectsParams {
    /// Name of the configured GitLab connection to query
    pub connection_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AnalyzeLogsParams {
    /// Absolute path to the log file to analyze
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FetchGitlabFileParams {
    /// Name of the configured GitLab connection
    pub connection_name: String,
    /// Local name of the configured repository
    pub repository_name: String,
    /// Path of the file inside the repository
    pub file_path: String,
    /// Branch, tag or commit (defaults to the repository's default ref)
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GenerateFixParams {
    /// Absolute path to the log file to analyze
    pub log_file_path: String,
    /// Name of the configured GitLab connection
    pub connection_name: String,
    /// Local name of the configured repository
    pub repository_name: String,
    /// Model id or display name (defaults to the configured default model)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SendNotificationParams {
    /// Name of the configured notification channel
    pub channel_name: String,
    /// Message title
    pub title: String,
    /// Message body
    pub message: String,
}

// ============================================================================
// Response Types for Tools
// ============================================================================

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ConnectionInfo {
    pub name: String,
    pub instance_url: String,
    /// Whether an access token is configured (the token itself never leaves)
    pub has_token: bool,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct RepositoryInfo {
    pub connection: String,
    pub local_name: String,
    pub project_id: u64,
    pub project_path: String,
    pub default_ref: String,
    pub privacy_mode: bool,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ModelInfo {
    pub model_id: String,
    pub display_name: String,
    pub provider: String,
    pub is_local: bool,
    pub is_default: bool,
}

// ============================================================================
// MCP Server Implementation
// ============================================================================

#[derive(Clone)]
pub struct LogbridgeMcp {
    /// Tool router for handling tool calls
    tool_router: ToolRouter<Self>,
    config: Arc<BridgeConfig>,
    gitlab: Arc<GitLabClient>,
    notifier: Arc<Notifier>,
}

impl LogbridgeMcp {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            tool_router: Self::tool_router(),
            config: Arc::new(config),
            gitlab: Arc::new(GitLabClient::new()),
            notifier: Arc::new(Notifier::new()),
        }
    }

    fn resolve_connection(&self, name: &str) -> Result<&GitLabConnection, String> {
        self.config.connection(name).ok_or_else(|| {
            format!(
                "Unknown GitLab connection '{}'. Use list_gitlab_connections to see what is configured.",
                name
            )
        })
    }

    fn resolve_repository(&self, connection: &str, local_name: &str) -> Result<&Repository, String> {
        self.config.repository(connection, local_name).ok_or_else(|| {
            format!(
                "Unknown repository '{}' on connection '{}'. Use list_repositories to see what is configured.",
                local_name, connection
            )
        })
    }

    fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    /// Fire configured fix-generated notifications, best-effort
    async fn notify_fix_generated(&self, notification: &Notification) {
        for channel in self.config.channels_for_event(NotificationEvent::OnFixGenerated) {
            self.notifier.deliver(channel, notification).await;
        }
    }
}

// Implement tools using the tool_router macro
#[tool_router]
impl LogbridgeMcp {
    /// List configured GitLab connections
    #[tool(
        description = "List all configured GitLab connections with their instance URLs. Access tokens are never returned."
    )]
    async fn list_gitlab_connections(&self) -> Result<CallToolResult, McpError> {
        let connections: Vec<ConnectionInfo> = self
            .config
            .connections
            .iter()
            .map(|c| ConnectionInfo {
                name: c.name.clone(),
                instance_url: c.instance_url.clone(),
                has_token: c.has_token(),
            })
            .collect();

        Self::json_result(&serde_json::json!({
            "connections": connections,
            "total": connections.len(),
        }))
    }

    /// List configured repository mappings
    #[tool(
        description = "List configured repository mappings (local name to GitLab project), optionally filtered by connection name."
    )]
    async fn list_repositories(
        &self,
        Parameters(params): Parameters<ListRepositoriesParams>,
    ) -> Result<CallToolResult, McpError> {
        if let Some(name) = &params.connection_name {
            if self.config.connection(name).is_none() {
                return Ok(CallToolResult::error(vec![Content::text(format!(
                    "Unknown GitLab connection '{}'",
                    name
                ))]));
            }
        }

        let repositories: Vec<RepositoryInfo> = self
            .config
            .repositories
            .iter()
            .filter(|r| {
                params
                    .connection_name
                    .as_deref()
                    .is_none_or(|name| r.connection == name)
            })
            .map(|r| RepositoryInfo {
                connection: r.connection.clone(),
                local_name: r.local_name.clone(),
                project_id: r.project_id,
                project_path: r.project_path.clone(),
                default_ref: r.default_ref.clone(),
                privacy_mode: r.privacy_mode,
            })
            .collect();

        Self::json_result(&serde_json::json!({
            "repositories": repositories,
            "total": repositories.len(),
        }))
    }

    /// List configured AI models
    #[tool(
        description = "List configured AI models with their providers. Shows which model is the default and which run locally."
    )]
    async fn list_ai_models(&self) -> Result<CallToolResult, McpError> {
        let models: Vec<ModelInfo> = self
            .config
            .models
            .iter()
            .map(|m| ModelInfo {
                model_id: m.model_id.clone(),
                display_name: m.display_name.clone(),
                provider: m.provider.clone(),
                is_local: self
                    .config
                    .provider(&m.provider)
                    .is_some_and(|p| p.is_local()),
                is_default: m.is_default,
            })
            .collect();

        Self::json_result(&serde_json::json!({
            "models": models,
            "total": models.len(),
        }))
    }

    /// List projects visible on a GitLab connection
    #[tool(
        description = "List projects the configured token can see on a GitLab instance. Useful for finding project ids when configuring repositories."
    )]
    async fn list_projects(
        &self,
        Parameters(params): Parameters<ListProjectsParams>,
    ) -> Result<CallToolResult, McpError> {
        let connection = match self.resolve_connection(&params.connection_name) {
            Ok(c) => c,
            Err(msg) => return Ok(CallToolResult::error(vec![Content::text(msg)])),
        };

        match self.gitlab.list_projects(connection).await {
            Ok(projects) => Self::json_result(&serde_json::json!({
                "projects": projects,
                "total": projects.len(),
            })),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(format!(
                "Failed to list projects: {}",
                e
            ))])),
        }
    }

    /// Analyze a log file and extract structured error records
    #[tool(
        description = "Analyze a log file and extract structured error records (Python tracebacks, JS errors, Java stack traces, generic errors) with a per-kind summary."
    )]
    async fn analyze_logs(
        &self,
        Parameters(params): Parameters<AnalyzeLogsParams>,
    ) -> Result<CallToolResult, McpError> {
        let log_text = match tokio::fs::read_to_string(&params.file_path).await {
            Ok(text) => text,
            Err(e) => {
                return Ok(CallToolResult::error(vec![Content::text(format!(
                    "Cannot read log file {}: {}",
                    params.file_path, e
                ))]));
            }
        };

        let (records, summary) = log_analyzer::extract_errors(&log_text);
        Self::json_result(&serde_json::json!({
            "file": params.file_path,
            "summary": summary,
            "errors": records,
        }))
    }

    /// Fetch a file from a configured GitLab repository
    #[tool(
        description = "Fetch a file's decoded content from a configured GitLab repository at an optional ref (branch, tag or commit)."
    )]
    async fn fetch_gitlab_file(
        &self,
        Parameters(params): Parameters<FetchGitlabFileParams>,
    ) -> Result<CallToolResult, McpError> {
        let connection = match self.resolve_connection(&params.connection_name) {
            Ok(c) => c,
            Err(msg) => return Ok(CallToolResult::error(vec![Content::text(msg)])),
        };
        let repository =
            match self.resolve_repository(&params.connection_name, &params.repository_name) {
                Ok(r) => r,
                Err(msg) => return Ok(CallToolResult::error(vec![Content::text(msg)])),
            };

        match self
            .gitlab
            .fetch_file(
                connection,
                repository,
                &params.file_path,
                params.git_ref.as_deref(),
            )
            .await
        {
            Ok(file) => Self::json_result(&file),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(format!(
                "Failed to fetch {}: {}",
                params.file_path, e
            ))])),
        }
    }

    /// Generate AI fix suggestions for the errors in a log file
    #[tool(
        description = "Analyze a log file, fetch source context from GitLab for each extracted error and generate AI fix suggestions. Respects per-repository privacy mode (forces locally hosted models)."
    )]
    async fn generate_fix(
        &self,
        Parameters(params): Parameters<GenerateFixParams>,
    ) -> Result<CallToolResult, McpError> {
        let connection = match self.resolve_connection(&params.connection_name) {
            Ok(c) => c.clone(),
            Err(msg) => return Ok(CallToolResult::error(vec![Content::text(msg)])),
        };
        let repository =
            match self.resolve_repository(&params.connection_name, &params.repository_name) {
                Ok(r) => r.clone(),
                Err(msg) => return Ok(CallToolResult::error(vec![Content::text(msg)])),
            };

        let report = fix::generate_fix(
            Arc::clone(&self.gitlab),
            &params.log_file_path,
            &connection,
            &repository,
            params.model_name.as_deref(),
            &self.config,
        )
        .await;

        match report {
            Ok(report) => {
                self.notify_fix_generated(&Notification::from_report(&report))
                    .await;
                Self::json_result(&report)
            }
            // A clean log is a valid outcome, not a tool failure
            Err(FixError::NothingToFix) => Ok(CallToolResult::success(vec![Content::text(
                format!("No errors found in {}. Nothing to fix.", params.log_file_path),
            )])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(format!(
                "Fix generation failed: {}",
                e
            ))])),
        }
    }

    /// Send a message to a configured notification channel
    #[tool(
        description = "Send a message to a configured notification channel (Slack or Teams incoming webhook)."
    )]
    async fn send_notification(
        &self,
        Parameters(params): Parameters<SendNotificationParams>,
    ) -> Result<CallToolResult, McpError> {
        let channel = match self.config.channel(&params.channel_name) {
            Some(c) => c,
            None => {
                return Ok(CallToolResult::error(vec![Content::text(format!(
                    "Unknown notification channel '{}'",
                    params.channel_name
                ))]));
            }
        };

        let delivered = self
            .notifier
            .deliver(channel, &Notification::new(&params.title, &params.message))
            .await;

        Self::json_result(&serde_json::json!({
            "channel": params.channel_name,
            "delivered": delivered,
        }))
    }
}

impl ServerHandler for LogbridgeMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability::default()),
                ..Default::default()
            },
            server_info: Implementation {
                name: "logbridge-mcp".to_string(),
                title: Some("Logbridge MCP Server".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Logbridge MCP Server analyzes log files, fetches source context from GitLab \
                 and generates AI fix suggestions for extracted errors."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        async move {
            Ok(ListToolsResult {
                tools: self.tool_router.list_all(),
                next_cursor: None,
            })
        }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        async move {
            let start_time = Instant::now();
            let tool_name = request.name.clone();

            let tool_context = ToolCallContext::new(self, request, context);
            let result = self.tool_router.call(tool_context).await;
            let duration_ms = start_time.elapsed().as_millis() as u64;

            match &result {
                Ok(call_result) => {
                    let status = if call_result.is_error.unwrap_or(false) {
                        "error"
                    } else {
                        "success"
                    };
                    eprintln!("[MCP Server] {} -> {} ({} ms)", tool_name, status, duration_ms);
                }
                Err(e) => {
                    eprintln!("[MCP Server] {} -> {} ({} ms)", tool_name, e, duration_ms);
                }
            }

            result
        }
    }
}

/// Print help information about available MCP tools
fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"Logbridge MCP Server v{}

USAGE:
    logbridge-mcp [OPTIONS]

OPTIONS:
    --help, -h      Print this help information
    --version, -v   Print version information
    --list-tools    List all available MCP tools

DESCRIPTION:
    Logbridge MCP Server gives AI assistants (Claude Code, Cursor, etc.)
    tools to analyze production logs, fetch source context from GitLab
    and generate AI fix suggestions.

MCP TOOLS:

  CONFIGURATION
    list_gitlab_connections  List configured GitLab connections
    list_repositories        List configured repository mappings
    list_ai_models           List configured AI models and providers

  GITLAB
    list_projects            List projects visible on a connection
    fetch_gitlab_file        Fetch a file's content at a ref

  LOG ANALYSIS
    analyze_logs             Extract structured error records from a log

  FIX GENERATION
    generate_fix             Generate AI fix suggestions for log errors

  NOTIFICATIONS
    send_notification        Post a message to a Slack/Teams channel

CONFIGURATION FILE:
    {} (override with LOGBRIDGE_CONFIG)
"#,
        version,
        settings::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "<no config directory on this platform>".to_string()),
    );
}

/// Print version information
fn print_version() {
    println!("logbridge-mcp {}", env!("CARGO_PKG_VERSION"));
}

/// List all tools in a simple format
fn list_tools_simple() {
    println!("Logbridge MCP Tools:\n");
    let tools = [
        ("list_gitlab_connections", "List configured GitLab connections"),
        ("list_repositories", "List configured repository mappings"),
        ("list_ai_models", "List configured AI models and providers"),
        ("list_projects", "List projects visible on a connection"),
        ("fetch_gitlab_file", "Fetch a file's content at a ref"),
        ("analyze_logs", "Extract structured error records from a log"),
        ("generate_fix", "Generate AI fix suggestions for log errors"),
        ("send_notification", "Post a message to a Slack/Teams channel"),
    ];

    for (name, desc) in tools {
        println!("  {:<25} {}", name, desc);
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    for arg in &args[1..] {
        match arg.as_str() {
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--version" | "-v" => {
                print_version();
                return Ok(());
            }
            "--list-tools" => {
                list_tools_simple();
                return Ok(());
            }
            _ => {
                eprintln!("Unknown option: {}", arg);
                eprintln!("Use --help for usage information");
                std::process::exit(1);
            }
        }
    }

    // env_logger writes to stderr, stdout stays protocol-only
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    eprintln!(
        "[MCP Server] Starting Logbridge MCP Server (PID: {})...",
        std::process::id()
    );

    let config = match settings::load_config() {
        Ok(config) => {
            eprintln!(
                "[MCP Server] Config loaded: {} connection(s), {} repository(ies), {} model(s), {} channel(s)",
                config.connections.len(),
                config.repositories.len(),
                config.models.len(),
                config.channels.len()
            );
            config
        }
        Err(e) => {
            eprintln!("[MCP Server] Config load failed: {}", e);
            eprintln!("[MCP Server] Starting with an empty configuration");
            BridgeConfig::default()
        }
    };

    let server = LogbridgeMcp::new(config);

    // Run with stdio transport (for Claude Code integration)
    let transport = (stdin(), stdout());
    let service = rmcp::serve_server(server, transport).await?;

    // Set up signal handlers for graceful shutdown (Unix only)
    #[cfg(unix)]
    {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sighup = signal(SignalKind::hangup())?;

        tokio::select! {
            result = service.waiting() => {
                match result {
                    Ok(_) => eprintln!("[MCP Server] Service ended normally"),
                    Err(e) => eprintln!("[MCP Server] Service ended with error: {:?}", e),
                }
            }
            _ = sigterm.recv() => {
                eprintln!("[MCP Server] Received SIGTERM, shutting down gracefully...");
            }
            _ = sigint.recv() => {
                eprintln!("[MCP Server] Received SIGINT, shutting down gracefully...");
            }
            _ = sighup.recv() => {
                eprintln!("[MCP Server] Received SIGHUP (parent process died), shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        service.waiting().await?;
    }

    eprintln!("[MCP Server] Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use logbridge_lib::models::{ChannelKind, NotificationChannel};
    use std::io::Write;

    fn test_config() -> BridgeConfig {
        BridgeConfig {
            connections: vec![GitLabConnection {
                name: "main".to_string(),
                instance_url: "https://gitlab.example.com".to_string(),
                access_token: Some("glpat-test".to_string()),
            }],
            repositories: vec![Repository {
                connection: "main".to_string(),
                local_name: "backend".to_string(),
                project_id: 42,
                project_path: "group/backend".to_string(),
                default_ref: "main".to_string(),
                privacy_mode: false,
            }],
            channels: vec![NotificationChannel {
                name: "dev-alerts".to_string(),
                kind: ChannelKind::Slack,
                webhook_url: "https://hooks.slack.com/services/T/B/X".to_string(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_router_exposes_all_tools() {
        let server = LogbridgeMcp::new(test_config());
        let names: Vec<String> = server
            .tool_router
            .list_all()
            .into_iter()
            .map(|t| t.name.to_string())
            .collect();

        for expected in [
            "list_gitlab_connections",
            "list_repositories",
            "list_ai_models",
            "list_projects",
            "analyze_logs",
            "fetch_gitlab_file",
            "generate_fix",
            "send_notification",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {}", expected);
        }
    }

    /// Text payload of the first content entry, via the wire format
    fn result_text(result: &CallToolResult) -> String {
        let wire = serde_json::to_value(result).unwrap();
        wire["content"][0]["text"]
            .as_str()
            .expect("text content")
            .to_string()
    }

    #[tokio::test]
    async fn test_list_connections_redacts_tokens() {
        let server = LogbridgeMcp::new(test_config());
        let result = server.list_gitlab_connections().await.unwrap();
        assert_ne!(result.is_error, Some(true));

        let text = result_text(&result);
        assert!(text.contains("\"has_token\": true"));
        assert!(!text.contains("glpat-test"));
    }

    #[tokio::test]
    async fn test_list_repositories_rejects_unknown_connection() {
        let server = LogbridgeMcp::new(test_config());
        let result = server
            .list_repositories(Parameters(ListRepositoriesParams {
                connection_name: Some("nope".to_string()),
            }))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn test_analyze_logs_extracts_records() {
        let mut log = tempfile::NamedTempFile::new().unwrap();
        write!(
            log,
            "Traceback (most recent call last):\n  File \"app.py\", line 10, in divide\n    return a / b\nZeroDivisionError: division by zero\n"
        )
        .unwrap();

        let server = LogbridgeMcp::new(test_config());
        let result = server
            .analyze_logs(Parameters(AnalyzeLogsParams {
                file_path: log.path().to_str().unwrap().to_string(),
            }))
            .await
            .unwrap();
        assert_ne!(result.is_error, Some(true));

        let parsed: serde_json::Value = serde_json::from_str(&result_text(&result)).unwrap();
        assert_eq!(parsed["summary"]["total"], 1);
        assert_eq!(parsed["errors"][0]["error_kind"], "python_traceback");
        assert_eq!(parsed["errors"][0]["file_path"], "app.py");
    }

    #[tokio::test]
    async fn test_analyze_logs_missing_file_is_tool_error() {
        let server = LogbridgeMcp::new(test_config());
        let result = server
            .analyze_logs(Parameters(AnalyzeLogsParams {
                file_path: "/nonexistent/run.log".to_string(),
            }))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn test_generate_fix_rejects_unknown_repository() {
        let server = LogbridgeMcp::new(test_config());
        let result = server
            .generate_fix(Parameters(GenerateFixParams {
                log_file_path: "/tmp/run.log".to_string(),
                connection_name: "main".to_string(),
                repository_name: "nope".to_string(),
                model_name: None,
            }))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
    }
}
