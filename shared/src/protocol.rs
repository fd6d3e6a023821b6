//! Text wire protocol between node processes and the runner
//!
//! These formats are byte-compatible across runner/node versions:
//!
//! ```text
//! [NODE{index}:{role}][{timestamp}]: {message}
//! [Node{index}:{role}][PASS] {displayName}
//! [Node{index}:{role}][FAIL] {displayName}
//! [Node{index}:{role}][FAIL-EXCEPTION] Type: {type}
//! --> [Node{index}:{role}][FAIL-EXCEPTION] Message: {msg}
//! --> [Node{index}:{role}][FAIL-EXCEPTION] StackTrace: {trace}
//! [RUNNER][{timestamp}][{LEVEL}][{source}]: {message}
//! ```
//!
//! Node indices on the wire are 1-based. Multi-line values (messages, stack
//! traces) continue on lines indented with [`CONTINUATION_INDENT`].

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::types::{LogLevel, RoleName};

/// Read size at or above which a chunk is treated as a fragment of a longer message
pub const FRAGMENT_THRESHOLD: usize = 10 * 1024;

/// Indentation marking a continuation line of a multi-line value
pub const CONTINUATION_INDENT: &str = "    ";

pub const FAIL_EXCEPTION_MARKER: &str = "[FAIL-EXCEPTION]";

static RUNNER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\[RUNNER\]\[([^\]]*)\]\[([A-Za-z]+)\]\[([^\]]*)\]:\s?(.*)$").expect("runner pattern")
});

static PASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[Node(\d+):([^\]]+)\]\[PASS\]\s?(.*)$").expect("pass pattern"));

static FAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[Node(\d+):([^\]]+)\]\[FAIL\]\s?(.*)$").expect("fail pattern"));

static FAIL_EXCEPTION_HEAD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:-->\s*)?\[Node(\d+):([^\]]+)\]\[FAIL-EXCEPTION\]").expect("fail-exception pattern")
});

static FAIL_EXCEPTION_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:-->\s*)?\[Node\d+:[^\]]+\]\[FAIL-EXCEPTION\]\s?(Type|Message|StackTrace):\s?(.*)$")
        .expect("fail-exception line pattern")
});

static FRAGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\[(?i:node)(\d+):([^\]]+)\](.*)$").expect("fragment pattern"));

static LEADING_BRACKET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\[([^\]]*)\](.*)$").expect("bracket pattern"));

/// Format a timestamp the way every wire line carries it
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn timestamp_now() -> String {
    format_timestamp(Utc::now())
}

/// Parse an embedded timestamp; RFC 3339 or `YYYY-MM-DD HH:MM:SS[.fff]` (UTC)
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn indent_continuations(text: &str) -> String {
    text.replace('\n', &format!("\n{CONTINUATION_INDENT}"))
}

pub fn node_fragment(index: u32, role: &RoleName, at: DateTime<Utc>, message: &str) -> String {
    format!(
        "[NODE{index}:{role}][{}]: {}",
        format_timestamp(at),
        indent_continuations(message)
    )
}

pub fn node_pass(index: u32, role: &RoleName, display_name: &str) -> String {
    format!("[Node{index}:{role}][PASS] {display_name}")
}

/// The multi-line FAIL block, one `FAIL-EXCEPTION` triple per failure
pub fn node_fail(index: u32, role: &RoleName, display_name: &str, failures: &[FailureDetail]) -> String {
    let mut block = format!("[Node{index}:{role}][FAIL] {display_name}");
    for failure in failures {
        block.push_str(&format!(
            "\n[Node{index}:{role}]{FAIL_EXCEPTION_MARKER} Type: {}",
            failure.exception_type
        ));
        block.push_str(&format!(
            "\n--> [Node{index}:{role}]{FAIL_EXCEPTION_MARKER} Message: {}",
            indent_continuations(&failure.message)
        ));
        block.push_str(&format!(
            "\n--> [Node{index}:{role}]{FAIL_EXCEPTION_MARKER} StackTrace: {}",
            indent_continuations(&failure.stack_trace)
        ));
    }
    block
}

pub fn runner_message(at: DateTime<Utc>, level: LogLevel, source: &str, message: &str) -> String {
    format!(
        "[RUNNER][{}][{level}][{source}]: {}",
        format_timestamp(at),
        indent_continuations(message)
    )
}

/// Structured detail recovered from a `[FAIL-EXCEPTION]` block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub exception_type: String,
    pub message: String,
    pub stack_trace: String,
}

impl FailureDetail {
    pub fn new(exception_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            exception_type: exception_type.into(),
            message: message.into(),
            stack_trace: String::new(),
        }
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = stack_trace.into();
        self
    }

    /// One-line summary for result messages
    pub fn summary(&self) -> String {
        if self.message.is_empty() {
            self.exception_type.clone()
        } else {
            format!("{}: {}", self.exception_type, self.message)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureField {
    Type,
    Message,
    StackTrace,
}

/// Line-fed parser for `[FAIL-EXCEPTION]` blocks.
///
/// Works on complete records and on a raw stdout stream alike: unrelated lines
/// are ignored, indented lines extend whichever field was seen last.
#[derive(Debug, Default)]
pub struct FailureDetailParser {
    details: Vec<FailureDetail>,
    field: Option<FailureField>,
}

impl FailureDetailParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, line: &str) {
        if let Some(captures) = FAIL_EXCEPTION_LINE_RE.captures(line) {
            let value = captures[2].to_string();
            match &captures[1] {
                "Type" => {
                    self.details.push(FailureDetail {
                        exception_type: value,
                        ..FailureDetail::default()
                    });
                    self.field = Some(FailureField::Type);
                }
                "Message" => {
                    self.current().message = value;
                    self.field = Some(FailureField::Message);
                }
                _ => {
                    self.current().stack_trace = value;
                    self.field = Some(FailureField::StackTrace);
                }
            }
            return;
        }

        if line.starts_with(char::is_whitespace) {
            if let (Some(field), Some(detail)) = (self.field, self.details.last_mut()) {
                let continuation = line.strip_prefix(CONTINUATION_INDENT).unwrap_or(line);
                let target = match field {
                    FailureField::Type => &mut detail.exception_type,
                    FailureField::Message => &mut detail.message,
                    FailureField::StackTrace => &mut detail.stack_trace,
                };
                target.push('\n');
                target.push_str(continuation);
            }
            return;
        }

        self.field = None;
    }

    fn current(&mut self) -> &mut FailureDetail {
        if self.details.is_empty() {
            self.details.push(FailureDetail::default());
        }
        let last = self.details.len() - 1;
        &mut self.details[last]
    }

    pub fn details(&self) -> &[FailureDetail] {
        &self.details
    }

    pub fn into_details(self) -> Vec<FailureDetail> {
        self.details
    }
}

pub fn parse_failures(record: &str) -> Vec<FailureDetail> {
    let mut parser = FailureDetailParser::new();
    for line in record.lines() {
        parser.feed(line);
    }
    parser.into_details()
}

/// Result of classifying one wire record
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifiedMessage {
    RunnerLog {
        timestamp: Option<DateTime<Utc>>,
        level: LogLevel,
        source: String,
        message: String,
    },
    NodePass {
        index: u32,
        role: RoleName,
        display_name: String,
    },
    NodeFail {
        index: u32,
        role: RoleName,
        display_name: String,
        failures: Vec<FailureDetail>,
    },
    /// A `[FAIL-EXCEPTION]` block that arrived without its FAIL header
    NodeFailureException {
        index: u32,
        role: RoleName,
        failures: Vec<FailureDetail>,
    },
    NodeLogFragment {
        index: u32,
        role: RoleName,
        timestamp: Option<DateTime<Utc>>,
        message: String,
    },
    Unknown(String),
}

fn first_line(record: &str) -> &str {
    record.lines().next().unwrap_or("")
}

/// Classify a single record; anything unrecognised is `Unknown`, never an error
pub fn classify(record: &str) -> ClassifiedMessage {
    let head = first_line(record);

    if let Some(captures) = RUNNER_RE.captures(record) {
        return ClassifiedMessage::RunnerLog {
            timestamp: parse_timestamp(&captures[1]),
            level: captures[2].parse().unwrap_or_default(),
            source: captures[3].to_string(),
            message: captures[4].to_string(),
        };
    }

    if let Some(captures) = PASS_RE.captures(head) {
        if let Ok(index) = captures[1].parse() {
            return ClassifiedMessage::NodePass {
                index,
                role: RoleName::new(&captures[2]),
                display_name: captures[3].trim().to_string(),
            };
        }
    }

    if let Some(captures) = FAIL_RE.captures(head) {
        if let Ok(index) = captures[1].parse() {
            return ClassifiedMessage::NodeFail {
                index,
                role: RoleName::new(&captures[2]),
                display_name: captures[3].trim().to_string(),
                failures: parse_failures(record),
            };
        }
    }

    if let Some(captures) = FAIL_EXCEPTION_HEAD_RE.captures(head) {
        if let Ok(index) = captures[1].parse() {
            return ClassifiedMessage::NodeFailureException {
                index,
                role: RoleName::new(&captures[2]),
                failures: parse_failures(record),
            };
        }
    }

    if let Some(captures) = FRAGMENT_RE.captures(record) {
        if let Ok(index) = captures[1].parse() {
            let (timestamp, message) = split_leading_timestamp(&captures[3]);
            return ClassifiedMessage::NodeLogFragment {
                index,
                role: RoleName::new(&captures[2]),
                timestamp,
                message,
            };
        }
    }

    ClassifiedMessage::Unknown(record.to_string())
}

fn split_leading_timestamp(rest: &str) -> (Option<DateTime<Utc>>, String) {
    let (timestamp, rest) = match LEADING_BRACKET_RE.captures(rest) {
        Some(captures) => match parse_timestamp(&captures[1]) {
            Some(at) => (Some(at), captures.get(2).map_or("", |m| m.as_str())),
            None => (None, rest),
        },
        None => (None, rest),
    };
    let message = rest.strip_prefix(':').unwrap_or(rest).trim_start();
    (timestamp, message.to_string())
}

/// `[NodeN:role]` tag at the head of a node result line, if any
fn node_tag(line: &str) -> Option<&str> {
    let line = line.strip_prefix("-->").map(str::trim_start).unwrap_or(line);
    if !line.starts_with("[Node") {
        return None;
    }
    line.find(']').map(|end| &line[..=end])
}

fn is_continuation(current: &str, line: &str) -> bool {
    if line.starts_with(char::is_whitespace) || line.starts_with("-->") {
        return true;
    }
    if !line.contains(FAIL_EXCEPTION_MARKER) {
        return false;
    }
    let head = first_line(current);
    let opens_fail_block = FAIL_RE.is_match(head) || FAIL_EXCEPTION_HEAD_RE.is_match(head);
    match (node_tag(head), node_tag(line)) {
        (Some(current_tag), Some(line_tag)) => opens_fail_block && current_tag == line_tag,
        _ => false,
    }
}

/// Split one logical message into records.
///
/// A logical message may carry several wire lines. A record starts at every
/// line except continuations: indented lines, `-->` lines, and
/// `[FAIL-EXCEPTION]` lines of the same node following its FAIL header.
pub fn split_records(text: &str) -> Vec<String> {
    let mut records: Vec<String> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match records.last_mut() {
            Some(current) if is_continuation(current, line) => {
                current.push('\n');
                current.push_str(line);
            }
            _ => records.push(line.to_string()),
        }
    }
    records
}
