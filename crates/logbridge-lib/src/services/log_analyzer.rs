// Log Analyzer Service
//
// Pure function over log text: applies an ordered set of format
// recognizers (python tracebacks, JS stacks, Java stacktraces, generic
// path:line prefixes, error-keyword sweep) and emits ErrorRecords
// ordered by first appearance. Never fails on malformed input; text no
// recognizer claims is simply ignored.
//
// Overlap policy: each log line can be claimed by at most one
// recognizer. Higher-priority recognizers run first and mark their
// lines claimed so a single error is never counted twice under two
// classifications.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{ErrorKind, ErrorRecord, LogSummary, Severity};

static PY_TB_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Traceback \(most recent call last\):").expect("static regex"));

static PY_FRAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s+File "([^"]+)", line (\d+)"#).expect("static regex"));

/// `at fn (file:line:col)` or `at file:line:col`
static JS_FRAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s+at\s+(?:.*?\()?([^()\s]+?):(\d+):(\d+)\)?\s*$").expect("static regex")
});

/// `TypeError: ...`, `Uncaught RangeError: ...`, `Error: ...`
static JS_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:Uncaught\s+)?(?:[A-Za-z]+Error|Error):\s+.+$").expect("static regex")
});

/// `at com.example.Main.run(Main.java:42)`
static JAVA_FRAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s+at\s+[\w$.<>/]+\(([^():]+):(\d+)\)").expect("static regex")
});

/// Exception header line of a Java stacktrace
static JAVA_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:Exception in thread .+|Caused by: .+|[\w$.]+(?:Exception|Error)(?::.*)?)$")
        .expect("static regex")
});

/// `src/app.py:10:` style references with a known source extension
static GENERIC_EXT_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([A-Za-z0-9_@~./\\-]+\.(?:py|js|jsx|ts|tsx|go|rs|rb|php|java|c|cc|cpp|h)):(\d+)")
        .expect("static regex")
});

/// `some/path:10` references identified by a path separator
static GENERIC_PATH_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([^\s:]+/[^\s:]+):(\d+)").expect("static regex"));

static WARN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bwarn(?:ing)?\b").expect("static regex"));

/// Keywords used by the final sweep over otherwise-unclaimed lines
const ERROR_KEYWORDS: &[&str] = &["ERROR", "EXCEPTION", "FAILED", "CRITICAL", "FATAL"];
const FATAL_KEYWORDS: &[&str] = &["CRITICAL", "FATAL"];

/// Extract error records from raw log text, plus their summary
///
/// Records are ordered by first appearance in the log. An input with no
/// recognizable patterns yields an empty sequence and an all-zero
/// summary, never an error.
pub fn extract_errors(log_text: &str) -> (Vec<ErrorRecord>, LogSummary) {
    let lines: Vec<&str> = log_text.lines().collect();
    let mut claimed = vec![false; lines.len()];
    let mut records = Vec::new();

    extract_python_tracebacks(&lines, &mut claimed, &mut records);
    extract_java_stacktraces(&lines, &mut claimed, &mut records);
    extract_js_errors(&lines, &mut claimed, &mut records);
    extract_generic_references(&lines, &mut claimed, &mut records);
    sweep_error_keywords(&lines, &mut claimed, &mut records);

    // Recognizers run in priority order, not positional order
    records.sort_by_key(|r| r.source_line_start);

    let summary = summarize(&records);
    (records, summary)
}

/// Pure reduction over a record sequence
pub fn summarize(records: &[ErrorRecord]) -> LogSummary {
    let mut summary = LogSummary {
        total: records.len(),
        ..Default::default()
    };
    for record in records {
        *summary
            .counts
            .entry(record.error_kind.as_str().to_string())
            .or_insert(0) += 1;
    }
    summary
}

fn make_record(
    lines: &[&str],
    start: usize,
    end: usize,
    file_ref: Option<(String, u32)>,
    kind: ErrorKind,
    severity: Severity,
) -> ErrorRecord {
    let (file_path, line_number) = match file_ref {
        Some((path, line)) => (Some(path.trim().to_string()), Some(line)),
        None => (None, None),
    };
    ErrorRecord {
        source_line_start: start + 1,
        source_line_end: end + 1,
        raw_text: lines[start..end].join("\n"),
        file_path,
        line_number,
        error_kind: kind,
        severity,
    }
}

fn claim(claimed: &mut [bool], start: usize, end: usize) {
    for flag in &mut claimed[start..end] {
        *flag = true;
    }
}

/// Multi-line python traceback blocks
///
/// The extracted reference is the deepest frame: the last `File "...",
/// line N` before the exception line, i.e. the frame closest to the
/// fault rather than the entry point.
fn extract_python_tracebacks(lines: &[&str], claimed: &mut [bool], records: &mut Vec<ErrorRecord>) {
    let mut i = 0;
    while i < lines.len() {
        if claimed[i] || !PY_TB_HEADER.is_match(lines[i]) {
            i += 1;
            continue;
        }

        let start = i;
        let mut deepest: Option<(String, u32)> = None;
        let mut j = i + 1;
        while j < lines.len() {
            let line = lines[j];
            if let Some(caps) = PY_FRAME.captures(line) {
                if let Ok(num) = caps[2].parse::<u32>() {
                    deepest = Some((caps[1].to_string(), num));
                }
                j += 1;
                continue;
            }
            if line.trim().is_empty() {
                break;
            }
            if line.starts_with(char::is_whitespace) {
                // Source snippet under a frame
                j += 1;
                continue;
            }
            // Non-indented line ends the block: the exception message
            j += 1;
            break;
        }

        records.push(make_record(
            lines,
            start,
            j,
            deepest,
            ErrorKind::PythonTraceback,
            Severity::Critical,
        ));
        claim(claimed, start, j);
        i = j;
    }
}

/// Java stacktraces: exception header plus consecutive `at ...(File:line)`
/// frames. Java lists the innermost frame first, so the reference comes
/// from the first frame of the block.
fn extract_java_stacktraces(lines: &[&str], claimed: &mut [bool], records: &mut Vec<ErrorRecord>) {
    let mut i = 0;
    while i < lines.len() {
        if claimed[i] {
            i += 1;
            continue;
        }
        let Some(caps) = JAVA_FRAME.captures(lines[i]) else {
            i += 1;
            continue;
        };

        // Pull in the exception header directly above the first frame
        let mut start = i;
        if start > 0 && !claimed[start - 1] && JAVA_HEADER.is_match(lines[start - 1]) {
            start -= 1;
        }

        let innermost = caps[2]
            .parse::<u32>()
            .ok()
            .map(|num| (caps[1].to_string(), num));

        let mut j = i + 1;
        while j < lines.len()
            && !claimed[j]
            && (JAVA_FRAME.is_match(lines[j])
                || lines[j].trim_start().starts_with("... ")
                || lines[j].starts_with("Caused by:"))
        {
            j += 1;
        }

        records.push(make_record(
            lines,
            start,
            j,
            innermost,
            ErrorKind::JavaStacktrace,
            Severity::Critical,
        ));
        claim(claimed, start, j);
        i = j;
    }
}

/// JS/Node errors: an `XxxError:` header with optional `at file:line:col`
/// frames, or a bare frame line. Node also lists the innermost frame
/// first, so the reference comes from the first frame.
fn extract_js_errors(lines: &[&str], claimed: &mut [bool], records: &mut Vec<ErrorRecord>) {
    let mut i = 0;
    while i < lines.len() {
        if claimed[i] {
            i += 1;
            continue;
        }

        if JS_HEADER.is_match(lines[i]) {
            let start = i;
            let mut first_frame: Option<(String, u32)> = None;
            let mut j = i + 1;
            while j < lines.len() && !claimed[j] {
                let Some(caps) = JS_FRAME.captures(lines[j]) else {
                    break;
                };
                if first_frame.is_none() {
                    first_frame = caps[2].parse::<u32>().ok().map(|n| (caps[1].to_string(), n));
                }
                j += 1;
            }
            records.push(make_record(
                lines,
                start,
                j,
                first_frame,
                ErrorKind::JsError,
                Severity::Critical,
            ));
            claim(claimed, start, j);
            i = j;
            continue;
        }

        if let Some(caps) = JS_FRAME.captures(lines[i]) {
            let frame = caps[2].parse::<u32>().ok().map(|n| (caps[1].to_string(), n));
            records.push(make_record(
                lines,
                i,
                i + 1,
                frame,
                ErrorKind::JsError,
                Severity::Error,
            ));
            claimed[i] = true;
        }
        i += 1;
    }
}

/// Single-line `path:line` references that no stack recognizer claimed
fn extract_generic_references(
    lines: &[&str],
    claimed: &mut [bool],
    records: &mut Vec<ErrorRecord>,
) {
    for (i, line) in lines.iter().enumerate() {
        if claimed[i] {
            continue;
        }
        let caps = GENERIC_EXT_REF
            .captures(line)
            .or_else(|| GENERIC_PATH_REF.captures(line));
        let Some(caps) = caps else { continue };
        let Ok(num) = caps[2].parse::<u32>() else {
            continue;
        };

        let severity = if WARN_RE.is_match(line) {
            Severity::Warning
        } else {
            Severity::Error
        };
        records.push(make_record(
            lines,
            i,
            i + 1,
            Some((caps[1].to_string(), num)),
            ErrorKind::Generic,
            severity,
        ));
        claimed[i] = true;
    }
}

/// Final sweep: unclaimed lines carrying loud error keywords become
/// unresolved generic records
fn sweep_error_keywords(lines: &[&str], claimed: &mut [bool], records: &mut Vec<ErrorRecord>) {
    for (i, line) in lines.iter().enumerate() {
        if claimed[i] {
            continue;
        }
        let upper = line.to_uppercase();
        if !ERROR_KEYWORDS.iter().any(|k| upper.contains(k)) {
            continue;
        }

        let severity = if FATAL_KEYWORDS.iter().any(|k| upper.contains(k)) {
            Severity::Critical
        } else if WARN_RE.is_match(line) {
            Severity::Warning
        } else {
            Severity::Error
        };
        records.push(make_record(
            lines,
            i,
            i + 1,
            None,
            ErrorKind::Generic,
            severity,
        ));
        claimed[i] = true;
    }
}
