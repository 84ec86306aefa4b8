//! Heuristic artifact extraction.
//!
//! [`extract_artifacts`] is a pure function over one canonical [`Log`]. It
//! only recognizes fixed lexical shapes: text that matches nothing produces
//! no artifact, never a guess.
//!
//! - **Transcript**: one per non-empty message.
//! - **Decision / constraint / open thread**: assistant lines whose body
//!   (after bullet or numbering markers) starts with a known prefix.
//! - **Outcome**: one per run, summarizing status, files, commands and errors.

use std::collections::HashSet;
use std::sync::LazyLock;

use mnemo_canon::{
    Item, ItemKind, Log, Message, ProvenanceSpan, Role, ToolCall, ToolResult, TraceSpan,
};
use mnemo_core::text::{line_ranges, truncate_with_suffix};
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::merge::merge_artifacts;
use crate::types::{
    Artifact, ArtifactContent, ArtifactProvenance, ArtifactType, CommandRecord, OutcomeStatus,
    artifact_id, constraint_scope,
};

const MAX_SUMMARY_BULLETS: usize = 3;
const MAX_ERROR_LINES: usize = 5;
const MAX_ERROR_LINE_BYTES: usize = 200;

/// Tool name fragments that mark a shell-like tool.
const COMMAND_TOOLS: &[&str] = &["command", "shell", "exec", "bash"];

/// How a matched prefix relates to the statement.
#[derive(Clone, Copy)]
enum Prefix {
    /// A label such as `decision:`; stripped from the statement.
    Label(&'static str),
    /// A phrase such as `we decided`; part of the statement.
    Phrase(&'static str),
}

impl Prefix {
    fn text(self) -> &'static str {
        match self {
            Self::Label(s) | Self::Phrase(s) => s,
        }
    }
}

/// Lowercase prefixes per kind, checked in order; first match wins.
const LEXICAL_RULES: &[(ArtifactType, &[Prefix])] = &[
    (
        ArtifactType::Decision,
        &[
            Prefix::Label("decision:"),
            Prefix::Label("decided:"),
            Prefix::Phrase("we decided"),
            Prefix::Phrase("we've decided"),
            Prefix::Phrase("i decided"),
            Prefix::Phrase("we chose"),
            Prefix::Phrase("we will use"),
            Prefix::Phrase("we'll use"),
            Prefix::Phrase("let's go with"),
            Prefix::Phrase("going with"),
        ],
    ),
    (
        ArtifactType::Constraint,
        &[
            Prefix::Label("constraint:"),
            Prefix::Label("requirement:"),
            Prefix::Phrase("must "),
            Prefix::Phrase("never "),
            Prefix::Phrase("always "),
            Prefix::Phrase("don't "),
            Prefix::Phrase("do not "),
            Prefix::Phrase("avoid "),
        ],
    ),
    (
        ArtifactType::OpenThread,
        &[
            Prefix::Label("todo:"),
            Prefix::Label("todo"),
            Prefix::Label("open question:"),
            Prefix::Label("question:"),
            Prefix::Label("follow-up:"),
            Prefix::Label("followup:"),
            Prefix::Label("next step:"),
            Prefix::Label("[ ]"),
            Prefix::Phrase("blocked by"),
            Prefix::Phrase("still need to"),
            Prefix::Phrase("need to "),
            Prefix::Phrase("tbd"),
        ],
    ),
];

static RATIONALE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:because|since|due to|so that)\b").expect("valid regex"));

static BLOCKED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:blocked|blocker|cannot proceed|can't proceed|unable to proceed)\b")
        .expect("valid regex")
});

static FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:error|errors|failed|failure|failures|fails|failing|panicked|panic|exception|traceback|fatal)\b",
    )
    .expect("valid regex")
});

static EXIT_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bexit(?:ed)?[ _](?:with )?(?:code|status)"?\s*[:=]?\s*(-?\d+)"#)
        .expect("valid regex")
});

static DIFF_GIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^diff --git a/\S+ b/(\S+)").expect("valid regex"));

static DIFF_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\+\+\+|---) (?:[ab]/)?(\S+)").expect("valid regex"));

static STATUS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[MADRCU?!]{1,2}|modified:|new file:|deleted:|renamed:)\s+(?:\S+ -> )?(\S+)\s*$")
        .expect("valid regex")
});

/// Extract every artifact from one log, folded through the merge engine so
/// IDs are unique.
pub fn extract_artifacts(log: &Log) -> Vec<Artifact> {
    let mut raw = Vec::new();
    for (index, item) in log.items.iter().enumerate() {
        let Item::Message(message) = item else {
            continue;
        };
        raw.extend(transcript(log, index, message));
        if message.role == Role::Assistant {
            raw.extend(lexical(log, index, message));
        }
    }
    raw.extend(outcome(log));

    let artifacts = merge_artifacts(&[], &raw);
    debug!(
        run_id = %log.run_id,
        candidates = raw.len(),
        artifacts = artifacts.len(),
        "artifacts extracted"
    );
    artifacts
}

fn build(
    log: &Log,
    kind: ArtifactType,
    identity: &str,
    content: ArtifactContent,
    provenance: ArtifactProvenance,
) -> Artifact {
    Artifact {
        id: artifact_id(kind, &log.session_id, &log.task_id, &log.run_id, identity),
        artifact_type: kind,
        session_id: log.session_id.clone(),
        task_id: log.task_id.clone(),
        run_id: log.run_id.clone(),
        created_at: None,
        content,
        provenance: vec![provenance],
        supersedes: Vec::new(),
        superseded_by: Vec::new(),
    }
}

fn message_provenance(
    log: &Log,
    index: usize,
    message: &Message,
    start: usize,
    end: usize,
) -> ArtifactProvenance {
    ArtifactProvenance {
        run_id: log.run_id.clone(),
        item_index: index,
        item_kind: ItemKind::Message,
        start,
        end,
        request_id: message.request_id.clone(),
        traces: overlapping_traces(&message.spans, start, end),
    }
}

/// Traces of every span overlapping `start..end`, first-seen order.
fn overlapping_traces(spans: &[ProvenanceSpan], start: usize, end: usize) -> Vec<TraceSpan> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for span in spans.iter().filter(|s| s.start < end && start < s.end) {
        for trace in &span.traces {
            if seen.insert(trace.clone()) {
                out.push(trace.clone());
            }
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Transcript
// ─────────────────────────────────────────────────────────────────────────────

fn transcript(log: &Log, index: usize, message: &Message) -> Option<Artifact> {
    if message.content.trim().is_empty() {
        return None;
    }
    let content = ArtifactContent {
        text: message.content.clone(),
        role: Some(message.role),
        ..ArtifactContent::default()
    };
    let identity = format!("{} {}", message.role.as_str(), message.content);
    let provenance = message_provenance(log, index, message, 0, message.content.len());
    Some(build(log, ArtifactType::Transcript, &identity, content, provenance))
}

// ─────────────────────────────────────────────────────────────────────────────
// Decisions, constraints, open threads
// ─────────────────────────────────────────────────────────────────────────────

fn lexical(log: &Log, index: usize, message: &Message) -> Vec<Artifact> {
    let text = &message.content;
    let mut out = Vec::new();
    let mut in_fence = false;
    for (line_start, line_end) in line_ranges(text) {
        let line = &text[line_start..line_end];
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let body_start = line_start + marker_len(line);
        let body = text[body_start..line_end].trim_end();
        let Some((kind, skip)) = match_prefix(body) else {
            continue;
        };
        let rest = &body[skip..];
        let trimmed = rest.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ':' | '*'));
        let stmt_start = body_start + skip + (rest.len() - trimmed.len());
        let Some(clause) = split_rationale(trimmed) else {
            continue;
        };
        let stmt_end = stmt_start + clause.statement_len;

        let mut content = ArtifactContent {
            text: text[stmt_start..stmt_end].to_string(),
            rationale: clause.rationale.map(str::to_string),
            ..ArtifactContent::default()
        };
        if kind == ArtifactType::Constraint {
            content.scope = Some(constraint_scope(&log.session_id, &log.task_id));
        }
        let identity = content.text.clone();
        let provenance = message_provenance(log, index, message, stmt_start, stmt_end);
        out.push(build(log, kind, &identity, content, provenance));
    }
    out
}

/// Bytes of leading whitespace, one bullet or numbering marker, and bold
/// markup. Checkboxes (`[ ]`) are left in place.
fn marker_len(line: &str) -> usize {
    let mut i = list_marker_len(line).unwrap_or(line.len() - line.trim_start().len());
    if line[i..].starts_with("**") {
        i += 2;
    }
    i
}

/// Bytes of leading whitespace plus a bullet (`-`, `*`, `+`, `•`) or
/// numbering (`1.`, `2)`) marker and its trailing space. `None` when the
/// line is not a list entry.
fn list_marker_len(line: &str) -> Option<usize> {
    let indent = line.len() - line.trim_start().len();
    let rest = &line[indent..];
    let marker = match rest.chars().next() {
        Some(c @ ('-' | '*' | '+' | '•')) => c.len_utf8(),
        _ => {
            let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
            let punct = rest[digits..].chars().next();
            if !(1..=3).contains(&digits) || !matches!(punct, Some('.' | ')')) {
                return None;
            }
            digits + 1
        }
    };
    let after = &rest[marker..];
    if !after.starts_with(char::is_whitespace) {
        return None;
    }
    Some(indent + marker + (after.len() - after.trim_start().len()))
}

/// First matching rule: the kind and how many bytes of `body` to skip.
fn match_prefix(body: &str) -> Option<(ArtifactType, usize)> {
    let lower = body.to_ascii_lowercase();
    for &(kind, prefixes) in LEXICAL_RULES {
        for &prefix in prefixes {
            let p = prefix.text();
            if !lower.starts_with(p) || !at_word_boundary(&lower, p) {
                continue;
            }
            let skip = match prefix {
                Prefix::Label(p) => p.len(),
                Prefix::Phrase(_) => 0,
            };
            return Some((kind, skip));
        }
    }
    None
}

/// A prefix ending in a word character must not run into another one
/// (`todo` matches `todo fix` but not `todos`).
fn at_word_boundary(lower: &str, prefix: &str) -> bool {
    let ends_in_word = prefix
        .chars()
        .next_back()
        .is_some_and(|c| c.is_alphanumeric());
    !ends_in_word
        || !lower[prefix.len()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
}

struct Clause<'a> {
    statement_len: usize,
    rationale: Option<&'a str>,
}

/// Split `body` into statement and rationale at the first connective.
/// `None` when the statement would be empty.
fn split_rationale(body: &str) -> Option<Clause<'_>> {
    if let Some(m) = RATIONALE.find(body).filter(|m| m.start() > 0) {
        let statement = body[..m.start()]
            .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':' | '-'));
        let rationale = body[m.end()..].trim();
        if !statement.is_empty() {
            return Some(Clause {
                statement_len: statement.len(),
                rationale: (!rationale.is_empty()).then_some(rationale),
            });
        }
    }
    (!body.is_empty()).then_some(Clause {
        statement_len: body.len(),
        rationale: None,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcome
// ─────────────────────────────────────────────────────────────────────────────

fn outcome(log: &Log) -> Option<Artifact> {
    let assistant: Vec<(usize, &Message)> = log
        .messages()
        .filter(|(_, m)| m.role == Role::Assistant && !m.content.trim().is_empty())
        .collect();
    let results: Vec<(usize, &ToolResult)> = log
        .items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| match item {
            Item::ToolResult(r) => Some((i, r)),
            _ => None,
        })
        .collect();
    if assistant.is_empty() && results.is_empty() {
        return None;
    }

    let texts: Vec<&str> = assistant
        .iter()
        .map(|(_, m)| m.content.as_str())
        .chain(results.iter().map(|(_, r)| r.content.as_str()))
        .collect();
    let commands = commands(log);

    let status = if texts.iter().any(|t| BLOCKED.is_match(t)) {
        OutcomeStatus::Blocked
    } else if results.iter().any(|(_, r)| r.is_error)
        || commands.iter().any(|c| c.exit_code.is_some_and(|code| code != 0))
        || texts.iter().any(|t| mentions_failure(t))
    {
        OutcomeStatus::Fail
    } else {
        OutcomeStatus::Success
    };

    let summary = assistant.last().and_then(|(_, m)| summarize(&m.content));
    let mut file_sources: Vec<String> = texts.iter().map(|t| (*t).to_string()).collect();
    for item in &log.items {
        if let Item::ToolCall(call) = item {
            collect_strings(&parse_arguments(call), &mut file_sources);
        }
    }
    let files = mine_files(file_sources.iter().map(String::as_str));
    let errors = error_lines(results.iter().map(|(_, r)| r.content.as_str()));

    let provenance = if let Some(&(index, message)) = assistant.last() {
        message_provenance(log, index, message, 0, message.content.len())
    } else {
        let &(index, result) = results.last()?;
        ArtifactProvenance {
            run_id: log.run_id.clone(),
            item_index: index,
            item_kind: ItemKind::ToolResult,
            start: 0,
            end: result.content.len(),
            request_id: result.request_id.clone(),
            traces: Vec::new(),
        }
    };

    let content = ArtifactContent {
        text: summary
            .clone()
            .unwrap_or_else(|| format!("run {}", status.as_str())),
        status: Some(status),
        summary,
        files,
        commands,
        errors,
        ..ArtifactContent::default()
    };
    Some(build(log, ArtifactType::Outcome, "outcome", content, provenance))
}

/// Failure language, ignoring negated counts such as `0 failed` or `no errors`.
fn mentions_failure(text: &str) -> bool {
    FAILURE.find_iter(text).any(|m| {
        let previous = text[..m.start()]
            .split_whitespace()
            .next_back()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_ascii_lowercase());
        !matches!(previous.as_deref(), Some("0" | "no" | "without" | "zero"))
    })
}

/// Bulleted lines (up to three), else the first sentence, else the text.
fn summarize(text: &str) -> Option<String> {
    let bullets: Vec<&str> = text
        .lines()
        .filter_map(|line| {
            let stripped = line[list_marker_len(line)?..].trim();
            (!stripped.is_empty()).then_some(stripped)
        })
        .take(MAX_SUMMARY_BULLETS)
        .collect();
    if !bullets.is_empty() {
        return Some(bullets.join("; "));
    }
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let sentence_end = trimmed.char_indices().find_map(|(i, c)| {
        let next = trimmed[i + c.len_utf8()..].chars().next();
        (matches!(c, '.' | '!' | '?') && next.is_none_or(char::is_whitespace)).then_some(i + c.len_utf8())
    });
    Some(sentence_end.map_or(trimmed, |end| &trimmed[..end]).to_string())
}

fn parse_arguments(call: &ToolCall) -> Value {
    serde_json::from_str(&call.arguments).unwrap_or(Value::Null)
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

/// Paths from diff headers and status-letter lines, first-seen order.
fn mine_files<'a>(texts: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();
    for line in texts.flat_map(str::lines) {
        let captured = DIFF_GIT
            .captures(line)
            .or_else(|| DIFF_HEADER.captures(line))
            .or_else(|| STATUS_LINE.captures(line))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str());
        let Some(path) = captured.filter(|p| looks_like_path(p)) else {
            continue;
        };
        if seen.insert(path.to_string()) {
            files.push(path.to_string());
        }
    }
    files
}

fn looks_like_path(s: &str) -> bool {
    s != "/dev/null"
        && !s.contains("://")
        && (s.contains('/') || s.contains('.'))
        && !s.ends_with('.')
        && s.chars().any(char::is_alphanumeric)
}

/// Commands run by shell-like tools, paired with exit codes from their
/// results (matched by call ID, else the next tool result).
fn commands(log: &Log) -> Vec<CommandRecord> {
    let mut out = Vec::new();
    for (index, item) in log.items.iter().enumerate() {
        let Item::ToolCall(call) = item else {
            continue;
        };
        let name = call.name.to_ascii_lowercase();
        if !COMMAND_TOOLS.iter().any(|t| name.contains(t)) {
            continue;
        }
        let Some(command) = command_line(call) else {
            continue;
        };
        let by_id = (!call.id.is_empty())
            .then(|| {
                log.items.iter().find_map(|item| match item {
                    Item::ToolResult(r) if r.tool_call_id == call.id => Some(r),
                    _ => None,
                })
            })
            .flatten();
        let result = by_id.or_else(|| {
            log.items[index + 1..].iter().find_map(|item| match item {
                Item::ToolResult(r) => Some(r),
                _ => None,
            })
        });
        out.push(CommandRecord {
            command,
            tool_call_id: call.id.clone(),
            exit_code: result.and_then(|r| parse_exit_code(&r.content)),
        });
    }
    out
}

/// Command line from the call arguments: a `command`/`cmd`/`script` field
/// (string or argv array), a bare JSON string, or the raw non-JSON text.
fn command_line(call: &ToolCall) -> Option<String> {
    let args = parse_arguments(call);
    let command = match &args {
        Value::Null => call.arguments.clone(),
        Value::String(s) => s.clone(),
        _ => ["command", "cmd", "script"]
            .iter()
            .find_map(|k| args.get(k))
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Array(parts) => Some(
                    parts
                        .iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join(" "),
                ),
                _ => None,
            })
            .unwrap_or_default(),
    };
    let command = command.trim();
    (!command.is_empty()).then(|| command.to_string())
}

fn parse_exit_code(text: &str) -> Option<i64> {
    EXIT_CODE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Up to five distinct lines mentioning failure.
fn error_lines<'a>(texts: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for line in texts.flat_map(str::lines).map(str::trim) {
        if out.len() == MAX_ERROR_LINES {
            break;
        }
        if line.is_empty() || !mentions_failure(line) {
            continue;
        }
        let line = truncate_with_suffix(line, MAX_ERROR_LINE_BYTES, "...");
        if seen.insert(line.clone()) {
            out.push(line);
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
