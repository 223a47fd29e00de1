// Fix Generation Orchestrator
//
// Sequences Log Analyzer -> GitLab Code Context Client -> AI provider,
// builds one prompt per error record and normalizes the model replies
// into FixSuggestions. Per-record work for different records shares no
// mutable state, so it fans out concurrently behind a semaphore; the
// result sequence is reassembled by original record index so ordering
// never depends on completion order.
//
// Partial-failure policy: a context fetch failure degrades that one
// record's prompt to context-free; a provider failure becomes a
// per-record Failed entry. The whole call fails only when the log
// cannot be read or contains nothing to fix.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;

use super::ai::{self, AiError, CompletionRequest, FixModelProvider};
use super::gitlab::{GitLabClient, GitLabError, DEFAULT_CONTEXT_SPAN};
use super::log_analyzer;
use crate::models::{
    BridgeConfig, CodeContext, ErrorRecord, FixOutcome, FixReport, FixSuggestion,
    GitLabConnection, Repository,
};

/// Cap on records processed per run, against pathological logs
pub const MAX_RECORDS_PER_RUN: usize = 5;

/// Bound on concurrent per-record external calls
const MAX_CONCURRENT_RECORDS: usize = 4;

const SYSTEM_PROMPT: &str = "You are an expert software engineer helping to fix production errors. \
     Analyze the error and the surrounding source code, explain the root cause briefly, \
     and propose a concrete fix as a single fenced code block.";

#[derive(Error, Debug)]
pub enum FixError {
    #[error("Cannot read log file {path}: {source}")]
    LogNotReadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Distinct "nothing to fix" outcome, not an internal fault
    #[error("No errors found in log file")]
    NothingToFix,

    #[error(transparent)]
    Model(#[from] AiError),
}

/// Run the full fix-generation pipeline over a log file
pub async fn generate_fix(
    gitlab: Arc<GitLabClient>,
    log_path: &str,
    connection: &GitLabConnection,
    repository: &Repository,
    model_override: Option<&str>,
    config: &BridgeConfig,
) -> Result<FixReport, FixError> {
    let log_text =
        tokio::fs::read_to_string(log_path)
            .await
            .map_err(|source| FixError::LogNotReadable {
                path: log_path.to_string(),
                source,
            })?;

    let (records, summary) = log_analyzer::extract_errors(&log_text);
    if records.is_empty() {
        return Err(FixError::NothingToFix);
    }
    log::info!(
        "generate_fix: {} record(s) in {} ({} processed)",
        summary.total,
        log_path,
        records.len().min(MAX_RECORDS_PER_RUN)
    );

    let (provider_config, model_config) = ai::select_model(config, repository, model_override)?;
    let provider: Arc<dyn FixModelProvider> =
        Arc::from(ai::create_provider(provider_config, model_config)?);

    let records: Vec<ErrorRecord> = records.into_iter().take(MAX_RECORDS_PER_RUN).collect();
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_RECORDS));

    let mut tasks = Vec::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        let gitlab = Arc::clone(&gitlab);
        let provider = Arc::clone(&provider);
        let semaphore = Arc::clone(&semaphore);
        let connection = connection.clone();
        let repository = repository.clone();
        let record = record.clone();

        tasks.push(tokio::spawn(async move {
            // The semaphore is never closed, so acquire cannot fail
            let _permit = semaphore.acquire_owned().await.ok();
            let outcome =
                process_record(&gitlab, &connection, &repository, provider.as_ref(), record).await;
            (index, outcome)
        }));
    }

    // Ordered-collection barrier: reassemble by original record index
    let mut slots: Vec<Option<FixOutcome>> = (0..records.len()).map(|_| None).collect();
    for task in tasks {
        match task.await {
            Ok((index, outcome)) => slots[index] = Some(outcome),
            Err(err) => log::error!("generate_fix: record task aborted: {}", err),
        }
    }
    let outcomes: Vec<FixOutcome> = slots
        .into_iter()
        .zip(records)
        .map(|(slot, record)| {
            slot.unwrap_or(FixOutcome::Failed {
                record,
                error: "record task aborted".to_string(),
            })
        })
        .collect();

    Ok(FixReport {
        log_file: log_path.to_string(),
        model: provider.model_id().to_string(),
        provider: provider.name().to_string(),
        outcomes,
    })
}

async fn process_record(
    gitlab: &GitLabClient,
    connection: &GitLabConnection,
    repository: &Repository,
    provider: &dyn FixModelProvider,
    record: ErrorRecord,
) -> FixOutcome {
    let context = if record.is_resolved() {
        fetch_context(gitlab, connection, repository, &record).await
    } else {
        None
    };

    let prompt = build_prompt(&record, context.as_ref());
    match provider.complete(&prompt).await {
        Ok(reply) => {
            let (proposed_patch, explanation) = split_patch(&reply);
            FixOutcome::Suggested {
                record,
                suggestion: FixSuggestion {
                    proposed_patch,
                    explanation,
                    model: provider.model_id().to_string(),
                    provider: provider.name().to_string(),
                    confidence: None,
                },
                context_attached: context.is_some(),
            }
        }
        // Provider calls are never auto-retried: a duplicate billed
        // request is worse than a per-record failure entry
        Err(err) => FixOutcome::Failed {
            record,
            error: err.to_string(),
        },
    }
}

/// Fetch the bounded context window for a resolved record, retrying
/// once on transient failures (the fetch is an idempotent read)
async fn fetch_context(
    gitlab: &GitLabClient,
    connection: &GitLabConnection,
    repository: &Repository,
    record: &ErrorRecord,
) -> Option<CodeContext> {
    let (Some(file_path), Some(line)) = (record.file_path.as_deref(), record.line_number) else {
        return None;
    };

    let mut last_err: Option<GitLabError> = None;
    for attempt in 0..2 {
        match gitlab
            .fetch_lines(
                connection,
                repository,
                file_path,
                line,
                DEFAULT_CONTEXT_SPAN,
                None,
            )
            .await
        {
            Ok(context) => return Some(context),
            Err(err) if err.is_transient() && attempt == 0 => {
                log::warn!("context fetch for {} failed, retrying once: {}", file_path, err);
                last_err = Some(err);
            }
            Err(err) => {
                last_err = Some(err);
                break;
            }
        }
    }

    if let Some(err) = last_err {
        log::warn!(
            "could not fetch context for {}: {}; prompt degrades to context-free",
            file_path,
            err
        );
    }
    None
}

/// One prompt per record: raw error text, classification, and the
/// fetched context, or a context-free template when unresolved
fn build_prompt(record: &ErrorRecord, context: Option<&CodeContext>) -> CompletionRequest {
    let mut user = format!(
        "An error was extracted from a production log.\n\n\
         Classification: {} (severity: {:?})\n",
        record.error_kind, record.severity
    );
    if let (Some(path), Some(line)) = (record.file_path.as_deref(), record.line_number) {
        user.push_str(&format!("Location: {}:{}\n", path, line));
    }
    user.push_str(&format!("\nError text:\n```\n{}\n```\n", record.raw_text));

    match context {
        Some(context) => {
            let window = context
                .line_window
                .map(|w| format!(" (lines {}..{})", w.start, w.end))
                .unwrap_or_default();
            user.push_str(&format!(
                "\nSource context from {}@{}{}:\n```\n{}\n```\n",
                context.file_path, context.git_ref, window, context.content
            ));
        }
        None => {
            user.push_str(
                "\nNo source context is available for this error; \
                 reason from the error text alone.\n",
            );
        }
    }
    user.push_str("\nExplain the likely root cause and propose a fix.");

    CompletionRequest {
        system: Some(SYSTEM_PROMPT.to_string()),
        user,
    }
}

/// Normalize a model reply: the first fenced code block becomes the
/// proposed patch, everything else the explanation
fn split_patch(reply: &str) -> (Option<String>, String) {
    let Some(open) = reply.find("```") else {
        return (None, reply.trim().to_string());
    };
    let rest = &reply[open + 3..];
    let Some(close) = rest.find("```") else {
        return (None, reply.trim().to_string());
    };

    let mut block = &rest[..close];
    // Drop a language tag on the opening fence
    if let Some(newline) = block.find('\n') {
        let tag = block[..newline].trim();
        if !tag.is_empty() && tag.len() <= 16 && !tag.contains(char::is_whitespace) {
            block = &block[newline + 1..];
        }
    }

    let explanation = format!(
        "{} {}",
        reply[..open].trim(),
        rest[close + 3..].trim()
    )
    .trim()
    .to_string();

    let patch = block.trim_matches('\n').to_string();
    if patch.is_empty() {
        (None, explanation)
    } else {
        (Some(patch), explanation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ErrorKind, ModelConfig, ProviderConfig, RequestShape, Severity};
    use base64::Engine as _;
    use std::io::Write;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record(kind: ErrorKind, file: Option<&str>, line: Option<u32>) -> ErrorRecord {
        ErrorRecord {
            source_line_start: 1,
            source_line_end: 2,
            raw_text: "boom".to_string(),
            file_path: file.map(str::to_string),
            line_number: line,
            error_kind: kind,
            severity: Severity::Critical,
        }
    }

    #[test]
    fn test_split_patch_extracts_fenced_block() {
        let reply = "The divisor can be zero.\n```python\nif divisor == 0:\n    return None\n```\nGuard before dividing.";
        let (patch, explanation) = split_patch(reply);
        assert_eq!(patch.as_deref(), Some("if divisor == 0:\n    return None"));
        assert!(explanation.contains("divisor can be zero"));
        assert!(explanation.contains("Guard before dividing"));
        assert!(!explanation.contains("```"));
    }

    #[test]
    fn test_split_patch_without_code_block() {
        let (patch, explanation) = split_patch("Just restart the worker.");
        assert!(patch.is_none());
        assert_eq!(explanation, "Just restart the worker.");
    }

    #[test]
    fn test_prompt_includes_context_when_present() {
        let context = CodeContext {
            file_path: "app.py".to_string(),
            git_ref: "main".to_string(),
            content: "result = a / b".to_string(),
            line_window: Some(crate::models::LineWindow { start: 5, end: 16 }),
        };
        let prompt = build_prompt(
            &record(ErrorKind::PythonTraceback, Some("app.py"), Some(10)),
            Some(&context),
        );
        assert!(prompt.user.contains("app.py:10"));
        assert!(prompt.user.contains("result = a / b"));
        assert!(prompt.user.contains("python_traceback"));
    }

    #[test]
    fn test_prompt_degrades_without_context() {
        let prompt = build_prompt(&record(ErrorKind::Generic, None, None), None);
        assert!(prompt.user.contains("No source context is available"));
    }

    // End-to-end harness: a temp log, a mock GitLab and a mock Ollama

    struct Harness {
        gitlab_server: MockServer,
        ollama_server: MockServer,
        config: BridgeConfig,
        connection: GitLabConnection,
        repository: Repository,
    }

    async fn harness() -> Harness {
        let gitlab_server = MockServer::start().await;
        let ollama_server = MockServer::start().await;

        let connection = GitLabConnection {
            name: "main".to_string(),
            instance_url: gitlab_server.uri(),
            access_token: Some("glpat-test".to_string()),
        };
        let repository = Repository {
            connection: "main".to_string(),
            local_name: "backend".to_string(),
            project_id: 42,
            project_path: "group/backend".to_string(),
            default_ref: "main".to_string(),
            privacy_mode: false,
        };
        let config = BridgeConfig {
            connections: vec![connection.clone()],
            repositories: vec![repository.clone()],
            providers: vec![ProviderConfig {
                name: "local".to_string(),
                shape: RequestShape::OllamaGenerate,
                base_endpoint: ollama_server.uri(),
                api_key: None,
            }],
            models: vec![ModelConfig {
                provider: "local".to_string(),
                model_id: "qwen2.5-coder:7b".to_string(),
                display_name: "Qwen Coder".to_string(),
                is_default: true,
            }],
            ..Default::default()
        };

        Harness {
            gitlab_server,
            ollama_server,
            config,
            connection,
            repository,
        }
    }

    fn traceback(file: &str, line: u32) -> String {
        format!(
            "Traceback (most recent call last):\n  File \"{}\", line {}, in <module>\n    go()\nValueError: bad\n",
            file, line
        )
    }

    fn write_log(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp log");
        file.write_all(content.as_bytes()).expect("write log");
        file
    }

    fn gitlab_file_json(content: &str) -> serde_json::Value {
        serde_json::json!({
            "file_path": "x",
            "size": content.len(),
            "encoding": "base64",
            "content": base64::engine::general_purpose::STANDARD.encode(content),
        })
    }

    fn ollama_reply(text: &str) -> serde_json::Value {
        serde_json::json!({"model": "qwen2.5-coder:7b", "response": text, "done": true})
    }

    #[tokio::test]
    async fn test_missing_log_file_fails_the_call() {
        let h = harness().await;
        let err = generate_fix(
            Arc::new(GitLabClient::new()),
            "/nonexistent/run.log",
            &h.connection,
            &h.repository,
            None,
            &h.config,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FixError::LogNotReadable { .. }));
    }

    #[tokio::test]
    async fn test_clean_log_is_nothing_to_fix() {
        let h = harness().await;
        let log = write_log("INFO all good\nINFO still good\n");
        let err = generate_fix(
            Arc::new(GitLabClient::new()),
            log.path().to_str().unwrap(),
            &h.connection,
            &h.repository,
            None,
            &h.config,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FixError::NothingToFix));
    }

    #[tokio::test]
    async fn test_fan_out_preserves_record_order() {
        let h = harness().await;
        let log_text = format!(
            "{}\n{}\n{}",
            traceback("a.py", 1),
            traceback("b.py", 2),
            traceback("c.py", 3)
        );
        let log = write_log(&log_text);

        for file in ["a.py", "b.py", "c.py"] {
            Mock::given(method("GET"))
                .and(path(format!("/api/v4/projects/42/repository/files/{}", file)))
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(gitlab_file_json("code here")),
                )
                .expect(1)
                .mount(&h.gitlab_server)
                .await;
        }

        // Deliberately skewed delays: the first record completes last
        for (file, delay_ms) in [("a.py", 300u64), ("b.py", 100), ("c.py", 10)] {
            Mock::given(method("POST"))
                .and(path("/api/generate"))
                .and(body_string_contains(file))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(ollama_reply(&format!("fix for {}", file)))
                        .set_delay(Duration::from_millis(delay_ms)),
                )
                .expect(1)
                .mount(&h.ollama_server)
                .await;
        }

        let report = generate_fix(
            Arc::new(GitLabClient::new()),
            log.path().to_str().unwrap(),
            &h.connection,
            &h.repository,
            None,
            &h.config,
        )
        .await
        .unwrap();

        assert_eq!(report.outcomes.len(), 3);
        for (outcome, file) in report.outcomes.iter().zip(["a.py", "b.py", "c.py"]) {
            assert_eq!(outcome.record().file_path.as_deref(), Some(file));
            match outcome {
                FixOutcome::Suggested {
                    suggestion,
                    context_attached,
                    ..
                } => {
                    assert_eq!(suggestion.explanation, format!("fix for {}", file));
                    assert!(context_attached);
                }
                FixOutcome::Failed { error, .. } => panic!("unexpected failure: {}", error),
            }
        }
    }

    #[tokio::test]
    async fn test_context_fetch_failure_degrades_to_context_free() {
        let h = harness().await;
        let log = write_log(&traceback("gone.py", 9));

        Mock::given(method("GET"))
            .and(path_regex(r"^/api/v4/projects/42/repository/files/.*$"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&h.gitlab_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ollama_reply("blind fix")))
            .mount(&h.ollama_server)
            .await;

        let report = generate_fix(
            Arc::new(GitLabClient::new()),
            log.path().to_str().unwrap(),
            &h.connection,
            &h.repository,
            None,
            &h.config,
        )
        .await
        .unwrap();

        assert_eq!(report.outcomes.len(), 1);
        match &report.outcomes[0] {
            FixOutcome::Suggested {
                context_attached, ..
            } => assert!(!context_attached),
            FixOutcome::Failed { error, .. } => panic!("unexpected failure: {}", error),
        }
    }

    #[tokio::test]
    async fn test_provider_failure_is_a_per_record_entry() {
        let h = harness().await;
        let log = write_log(&format!(
            "{}\n{}",
            traceback("ok.py", 1),
            traceback("bad.py", 2)
        ));

        Mock::given(method("GET"))
            .and(path_regex(r"^/api/v4/projects/42/repository/files/.*$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(gitlab_file_json("code")))
            .mount(&h.gitlab_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_string_contains("ok.py"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ollama_reply("a fix")))
            .mount(&h.ollama_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_string_contains("bad.py"))
            .respond_with(ResponseTemplate::new(500).set_body_string("exploded"))
            .mount(&h.ollama_server)
            .await;

        let report = generate_fix(
            Arc::new(GitLabClient::new()),
            log.path().to_str().unwrap(),
            &h.connection,
            &h.repository,
            None,
            &h.config,
        )
        .await
        .unwrap();

        assert_eq!(report.outcomes.len(), 2);
        assert!(matches!(report.outcomes[0], FixOutcome::Suggested { .. }));
        assert!(matches!(report.outcomes[1], FixOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_record_cap_bounds_external_calls() {
        let h = harness().await;
        // Seven keyword-only records, all unresolved: no GitLab calls at
        // all, and at most MAX_RECORDS_PER_RUN provider calls
        let log = write_log(
            &(0..7)
                .map(|i| format!("ERROR failure number {}\n", i))
                .collect::<String>(),
        );

        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ollama_reply("generic fix")))
            .expect(MAX_RECORDS_PER_RUN as u64)
            .mount(&h.ollama_server)
            .await;

        let report = generate_fix(
            Arc::new(GitLabClient::new()),
            log.path().to_str().unwrap(),
            &h.connection,
            &h.repository,
            None,
            &h.config,
        )
        .await
        .unwrap();

        assert_eq!(report.outcomes.len(), MAX_RECORDS_PER_RUN);
        assert_eq!(h.gitlab_server.received_requests().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_privacy_mode_rejects_cloud_override() {
        let mut h = harness().await;
        h.repository.privacy_mode = true;
        h.config.providers.push(ProviderConfig {
            name: "cloud".to_string(),
            shape: RequestShape::OpenAiChat,
            base_endpoint: "https://api.openai.com/v1".to_string(),
            api_key: Some("sk-test".to_string()),
        });
        h.config.models.push(ModelConfig {
            provider: "cloud".to_string(),
            model_id: "gpt-4o-mini".to_string(),
            display_name: "GPT-4o Mini".to_string(),
            is_default: false,
        });

        let log = write_log(&traceback("app.py", 10));
        let err = generate_fix(
            Arc::new(GitLabClient::new()),
            log.path().to_str().unwrap(),
            &h.connection,
            &h.repository,
            Some("gpt-4o-mini"),
            &h.config,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FixError::Model(AiError::PrivacyViolation(_))));
    }
}
