// Fix generation data models
//
// CodeContext lives only for the duration of one fix-generation call;
// FixSuggestion is the terminal artifact returned to the caller.

use serde::{Deserialize, Serialize};

use super::error_record::ErrorRecord;

/// Half-open, 1-indexed line window inside a fetched file
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LineWindow {
    pub start: u32,
    pub end: u32,
}

/// Source content fetched from the code host for one error record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeContext {
    pub file_path: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_window: Option<LineWindow>,
}

/// AI-authored fix suggestion for a single error record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixSuggestion {
    /// Code block extracted from the model reply, if it produced one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposed_patch: Option<String>,
    pub explanation: String,
    pub model: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// Per-record result entry, ordered by original record appearance
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FixOutcome {
    Suggested {
        record: ErrorRecord,
        suggestion: FixSuggestion,
        /// Whether code context was attached to the prompt
        context_attached: bool,
    },
    Failed {
        record: ErrorRecord,
        error: String,
    },
}

impl FixOutcome {
    pub fn record(&self) -> &ErrorRecord {
        match self {
            FixOutcome::Suggested { record, .. } => record,
            FixOutcome::Failed { record, .. } => record,
        }
    }
}

/// Result of one `generate_fix` call
#[derive(Debug, Clone, Serialize)]
pub struct FixReport {
    pub log_file: String,
    pub model: String,
    pub provider: String,
    pub outcomes: Vec<FixOutcome>,
}
