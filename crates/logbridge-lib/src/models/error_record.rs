// Log analysis data models
//
// ErrorRecord is the unit of output of the log analyzer: one located,
// classified error extracted from a log file. LogSummary is a pure
// reduction over a record sequence.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Classification assigned by the recognizer that claimed the error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PythonTraceback,
    JsError,
    JavaStacktrace,
    Generic,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::PythonTraceback => "python_traceback",
            ErrorKind::JsError => "js_error",
            ErrorKind::JavaStacktrace => "java_stacktrace",
            ErrorKind::Generic => "generic",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity derived from the classification, not from free-text parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Uncaught exception / fatal patterns
    Critical,
    Error,
    /// Matched-but-caught warning lines
    Warning,
}

/// One structured error extracted from a log
///
/// `source_line_start..source_line_end` is the half-open, 1-indexed range
/// of log lines the record was extracted from. A record without both
/// `file_path` and `line_number` is unresolved: the fix orchestrator will
/// never attempt a code context fetch for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub source_line_start: usize,
    pub source_line_end: usize,
    pub raw_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    pub error_kind: ErrorKind,
    pub severity: Severity,
}

impl ErrorRecord {
    /// Whether the record carries a usable file reference
    pub fn is_resolved(&self) -> bool {
        self.file_path.is_some() && self.line_number.is_some()
    }
}

/// Aggregate counts per error kind plus the total record count
///
/// Derived from a record sequence and never persisted. The counts must
/// always be recomputable from the records alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogSummary {
    pub total: usize,
    pub counts: BTreeMap<String, usize>,
}

impl LogSummary {
    pub fn count_for(&self, kind: ErrorKind) -> usize {
        self.counts.get(kind.as_str()).copied().unwrap_or(0)
    }
}
