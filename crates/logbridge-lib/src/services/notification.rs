// Notification Service
//
// Delivers messages to incoming-webhook channels. Slack channels get a
// Block Kit payload, Teams channels a MessageCard. Delivery is
// best-effort: failures are logged and reported as a boolean, never
// propagated as errors into the calling pipeline.

use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::models::{ChannelKind, FixOutcome, FixReport, NotificationChannel};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest code excerpt a chat message will carry
const MAX_EXCERPT_CHARS: usize = 1000;

/// Channel-independent message content; the per-channel payload shape
/// is the notifier's concern
#[derive(Debug, Clone)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Short label/value pairs rendered as fields or facts
    pub fields: Vec<(String, String)>,
    /// Optional code excerpt rendered as a fenced block
    pub excerpt: Option<String>,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            fields: Vec::new(),
            excerpt: None,
        }
    }

    /// Summarize a fix-generation run for chat delivery
    pub fn from_report(report: &FixReport) -> Self {
        let suggested = report
            .outcomes
            .iter()
            .filter(|o| matches!(o, FixOutcome::Suggested { .. }))
            .count();
        let failed = report.outcomes.len() - suggested;

        let mut body = format!(
            "{} fix suggestion(s) generated from `{}`",
            suggested, report.log_file
        );
        if failed > 0 {
            body.push_str(&format!(", {} record(s) failed", failed));
        }

        let mut notification = Notification::new("Fix suggestions ready", body);
        notification.fields = vec![
            ("Model".to_string(), report.model.clone()),
            ("Provider".to_string(), report.provider.clone()),
            (
                "Errors analyzed".to_string(),
                report.outcomes.len().to_string(),
            ),
        ];
        if let Some(first) = report.outcomes.iter().find_map(|o| match o {
            FixOutcome::Suggested { suggestion, .. } => suggestion.proposed_patch.as_deref(),
            FixOutcome::Failed { .. } => None,
        }) {
            notification.excerpt = Some(truncate_excerpt(first));
        }
        notification
    }
}

fn truncate_excerpt(text: &str) -> String {
    if text.chars().count() <= MAX_EXCERPT_CHARS {
        return text.to_string();
    }
    let mut excerpt: String = text.chars().take(MAX_EXCERPT_CHARS).collect();
    excerpt.push_str("\n...");
    excerpt
}

pub struct Notifier {
    client: Client,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Post a notification to one channel. Returns whether the webhook
    /// accepted the payload.
    pub async fn deliver(&self, channel: &NotificationChannel, notification: &Notification) -> bool {
        let payload = match channel.kind {
            ChannelKind::Slack => slack_payload(notification),
            ChannelKind::Teams => teams_payload(notification),
        };

        let result = self
            .client
            .post(&channel.webhook_url)
            .json(&payload)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                log::info!("notification delivered to channel '{}'", channel.name);
                true
            }
            Ok(response) => {
                log::warn!(
                    "channel '{}' rejected notification: status {}",
                    channel.name,
                    response.status()
                );
                false
            }
            Err(err) => {
                log::warn!("notification to channel '{}' failed: {}", channel.name, err);
                false
            }
        }
    }
}

fn slack_payload(notification: &Notification) -> Value {
    let mut blocks = vec![
        json!({
            "type": "header",
            "text": {"type": "plain_text", "text": notification.title, "emoji": true}
        }),
        json!({
            "type": "section",
            "text": {"type": "mrkdwn", "text": notification.body}
        }),
    ];

    if !notification.fields.is_empty() {
        let fields: Vec<Value> = notification
            .fields
            .iter()
            .map(|(label, value)| {
                json!({"type": "mrkdwn", "text": format!("*{}:*\n{}", label, value)})
            })
            .collect();
        blocks.push(json!({"type": "section", "fields": fields}));
    }

    if let Some(excerpt) = &notification.excerpt {
        blocks.push(json!({
            "type": "section",
            "text": {"type": "mrkdwn", "text": format!("```{}```", excerpt)}
        }));
    }

    json!({"text": notification.title, "blocks": blocks})
}

fn teams_payload(notification: &Notification) -> Value {
    let facts: Vec<Value> = notification
        .fields
        .iter()
        .map(|(label, value)| json!({"name": label, "value": value}))
        .collect();

    let mut section = json!({
        "activityTitle": notification.title,
        "activitySubtitle": notification.body,
        "facts": facts,
        "markdown": true,
    });
    if let Some(excerpt) = &notification.excerpt {
        section["text"] = json!(format!("```\n{}\n```", excerpt));
    }

    json!({
        "@type": "MessageCard",
        "@context": "http://schema.org/extensions",
        "themeColor": "D63A3A",
        "summary": notification.title,
        "sections": [section],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ErrorKind, ErrorRecord, FixSuggestion, Severity};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn channel(kind: ChannelKind, url: &str) -> NotificationChannel {
        NotificationChannel {
            name: "dev-alerts".to_string(),
            kind,
            webhook_url: format!("{}/webhook", url),
        }
    }

    fn sample_report() -> FixReport {
        let record = ErrorRecord {
            source_line_start: 1,
            source_line_end: 5,
            raw_text: "ZeroDivisionError: division by zero".to_string(),
            file_path: Some("app.py".to_string()),
            line_number: Some(10),
            error_kind: ErrorKind::PythonTraceback,
            severity: Severity::Critical,
        };
        FixReport {
            log_file: "/var/log/app.log".to_string(),
            model: "qwen2.5-coder:7b".to_string(),
            provider: "local".to_string(),
            outcomes: vec![
                FixOutcome::Suggested {
                    record: record.clone(),
                    suggestion: FixSuggestion {
                        proposed_patch: Some("if b == 0:\n    return None".to_string()),
                        explanation: "Guard the divisor.".to_string(),
                        model: "qwen2.5-coder:7b".to_string(),
                        provider: "local".to_string(),
                        confidence: None,
                    },
                    context_attached: true,
                },
                FixOutcome::Failed {
                    record,
                    error: "rate limited".to_string(),
                },
            ],
        }
    }

    #[test]
    fn test_report_notification_counts_outcomes() {
        let notification = Notification::from_report(&sample_report());
        assert!(notification.body.contains("1 fix suggestion(s)"));
        assert!(notification.body.contains("1 record(s) failed"));
        assert_eq!(
            notification.excerpt.as_deref(),
            Some("if b == 0:\n    return None")
        );
    }

    #[test]
    fn test_long_excerpt_is_truncated() {
        let long = "x".repeat(5000);
        let excerpt = truncate_excerpt(&long);
        assert!(excerpt.chars().count() <= MAX_EXCERPT_CHARS + 4);
        assert!(excerpt.ends_with("..."));
    }

    #[test]
    fn test_slack_payload_shape() {
        let mut notification = Notification::new("Title", "Body");
        notification.fields = vec![("Model".to_string(), "gpt-4o-mini".to_string())];
        let payload = slack_payload(&notification);
        assert_eq!(payload["blocks"][0]["type"], "header");
        assert_eq!(payload["blocks"][1]["text"]["text"], "Body");
        assert_eq!(
            payload["blocks"][2]["fields"][0]["text"],
            "*Model:*\ngpt-4o-mini"
        );
    }

    #[test]
    fn test_teams_payload_shape() {
        let payload = teams_payload(&Notification::new("Title", "Body"));
        assert_eq!(payload["@type"], "MessageCard");
        assert_eq!(payload["sections"][0]["activityTitle"], "Title");
    }

    #[tokio::test]
    async fn test_deliver_posts_slack_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webhook"))
            .and(body_partial_json(serde_json::json!({"text": "Title"})))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let delivered = Notifier::new()
            .deliver(
                &channel(ChannelKind::Slack, &server.uri()),
                &Notification::new("Title", "Body"),
            )
            .await;
        assert!(delivered);
    }

    #[tokio::test]
    async fn test_deliver_reports_webhook_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_payload"))
            .mount(&server)
            .await;

        let delivered = Notifier::new()
            .deliver(
                &channel(ChannelKind::Teams, &server.uri()),
                &Notification::new("Title", "Body"),
            )
            .await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn test_deliver_survives_unreachable_webhook() {
        let channel = NotificationChannel {
            name: "dead".to_string(),
            kind: ChannelKind::Slack,
            webhook_url: "http://127.0.0.1:9/webhook".to_string(),
        };
        let delivered = Notifier::new()
            .deliver(&channel, &Notification::new("Title", "Body"))
            .await;
        assert!(!delivered);
    }
}
