// GitLab Code Context Client
//
// Thin typed client over the GitLab REST API, used to pull file content
// referenced by extracted error records. Every call carries a bounded
// timeout and performs no retries; retry policy for transient failures
// belongs to the fix orchestrator. The client holds no mutable state.

use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::models::{CodeContext, GitLabConnection, LineWindow, Repository};

/// Per-call timeout for GitLab API requests
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Default half-span of the context window around a faulting line
pub const DEFAULT_CONTEXT_SPAN: u32 = 10;

#[derive(Error, Debug)]
pub enum GitLabError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("GitLab authentication failed: {0}")]
    AuthFailed(String),

    #[error("GitLab API rate limit exceeded")]
    RateLimited,

    #[error("GitLab request timed out")]
    Timeout,

    #[error("GitLab endpoint unreachable: {0}")]
    Unavailable(String),

    #[error("GitLab API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Could not decode file content: {0}")]
    Decode(String),

    #[error("No access token configured for connection: {0}")]
    MissingToken(String),
}

impl GitLabError {
    /// Transient failures are safe to retry once for idempotent reads
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GitLabError::Timeout | GitLabError::RateLimited | GitLabError::Unavailable(_)
        )
    }
}

impl From<reqwest::Error> for GitLabError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GitLabError::Timeout
        } else if err.is_connect() {
            GitLabError::Unavailable(err.to_string())
        } else {
            GitLabError::Api {
                status: err.status().map(|s| s.as_u16()).unwrap_or(0),
                message: err.to_string(),
            }
        }
    }
}

pub type GitLabResult<T> = Result<T, GitLabError>;

/// Repository file as returned by `GET /repository/files/:path`
#[derive(Debug, Clone, serde::Serialize)]
pub struct RepositoryFile {
    pub file_path: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub content: String,
    pub size: u64,
}

#[derive(Debug, Deserialize)]
struct FileResponse {
    content: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    encoding: Option<String>,
}

/// Project entry from `GET /projects`
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct ProjectSummary {
    pub id: u64,
    pub name: String,
    pub path_with_namespace: String,
    #[serde(default)]
    pub default_branch: Option<String>,
}

pub struct GitLabClient {
    client: Client,
}

impl Default for GitLabClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GitLabClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn api_url(&self, connection: &GitLabConnection, path: &str) -> String {
        let base = connection.instance_url.trim_end_matches('/');
        format!("{}/api/v4{}", base, path)
    }

    fn token<'a>(&self, connection: &'a GitLabConnection) -> GitLabResult<&'a str> {
        connection
            .access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GitLabError::MissingToken(connection.name.clone()))
    }

    fn classify_status(status: StatusCode, body: String, file_path: &str) -> GitLabError {
        match status {
            StatusCode::NOT_FOUND => GitLabError::NotFound(file_path.to_string()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GitLabError::AuthFailed(body),
            StatusCode::TOO_MANY_REQUESTS => GitLabError::RateLimited,
            _ => GitLabError::Api {
                status: status.as_u16(),
                message: body,
            },
        }
    }

    /// Fetch whole-file content at the given ref (falls back to the
    /// repository's default ref)
    pub async fn fetch_file(
        &self,
        connection: &GitLabConnection,
        repository: &Repository,
        file_path: &str,
        git_ref: Option<&str>,
    ) -> GitLabResult<RepositoryFile> {
        let token = self.token(connection)?;
        let git_ref = git_ref.unwrap_or(&repository.default_ref);
        let url = self.api_url(
            connection,
            &format!(
                "/projects/{}/repository/files/{}",
                repository.project_id,
                urlencoding::encode(file_path)
            ),
        );

        let response = self
            .client
            .get(&url)
            .query(&[("ref", git_ref)])
            .bearer_auth(token)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body, file_path));
        }

        let file: FileResponse = response
            .json()
            .await
            .map_err(|e| GitLabError::Decode(e.to_string()))?;

        if file.encoding.as_deref().is_some_and(|e| e != "base64") {
            return Err(GitLabError::Decode(format!(
                "unexpected content encoding: {:?}",
                file.encoding
            )));
        }

        // GitLab wraps base64 content across lines
        let raw = file.content.replace(['\n', '\r'], "");
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(raw)
            .map_err(|e| GitLabError::Decode(e.to_string()))?;
        let content = String::from_utf8(bytes).map_err(|e| GitLabError::Decode(e.to_string()))?;

        Ok(RepositoryFile {
            file_path: file_path.to_string(),
            git_ref: git_ref.to_string(),
            content,
            size: file.size,
        })
    }

    /// Fetch a bounded line window around `target_line` (1-indexed,
    /// half-open window of ±`span` lines) to cap prompt payload size
    pub async fn fetch_lines(
        &self,
        connection: &GitLabConnection,
        repository: &Repository,
        file_path: &str,
        target_line: u32,
        span: u32,
        git_ref: Option<&str>,
    ) -> GitLabResult<CodeContext> {
        let file = self
            .fetch_file(connection, repository, file_path, git_ref)
            .await?;

        let lines: Vec<&str> = file.content.lines().collect();
        let start = target_line.saturating_sub(span).max(1);
        let end = (target_line.saturating_add(span) + 1).min(lines.len() as u32 + 1);
        let window = LineWindow { start, end };

        let content = lines
            .get(start as usize - 1..end.saturating_sub(1) as usize)
            .unwrap_or_default()
            .join("\n");

        Ok(CodeContext {
            file_path: file.file_path,
            git_ref: file.git_ref,
            content,
            line_window: Some(window),
        })
    }

    /// List projects visible to the connection (pass-through read used
    /// by discovery tooling)
    pub async fn list_projects(
        &self,
        connection: &GitLabConnection,
    ) -> GitLabResult<Vec<ProjectSummary>> {
        let token = self.token(connection)?;
        let url = self.api_url(connection, "/projects");

        let response = self
            .client
            .get(&url)
            .query(&[("membership", "true"), ("per_page", "100")])
            .bearer_auth(token)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body, "/projects"));
        }

        response
            .json::<Vec<ProjectSummary>>()
            .await
            .map_err(|e| GitLabError::Decode(e.to_string()))
    }
}
