//! Artifact model.
//!
//! An [`Artifact`] is a typed semantic unit mined from a canonical log. IDs
//! are content hashes (see [`artifact_id`]) so re-extracting the same log is
//! idempotent. Artifacts are never deleted: they are merged (provenance
//! union) or marked superseded.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use mnemo_canon::{ItemKind, Role, TraceSpan};
use mnemo_core::text::normalize_statement;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Schema version written to, and required from, artifact store documents.
pub const ARTIFACT_SCHEMA_VERSION: u32 = 1;

/// Hex characters of the content hash kept in an artifact ID.
const ID_HASH_LEN: usize = 24;

/// Scope recorded on constraints that have neither a task nor a session.
pub const GLOBAL_SCOPE: &str = "global";

/// Artifact kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    /// What a run achieved: status, summary, files, commands.
    Outcome,
    /// A choice that was made.
    Decision,
    /// A rule the work must respect.
    Constraint,
    /// Unfinished work or an unanswered question.
    OpenThread,
    /// A conversation message kept verbatim.
    Transcript,
}

impl ArtifactType {
    /// Every kind, in display order.
    pub const ALL: [Self; 5] = [
        Self::Outcome,
        Self::Decision,
        Self::Constraint,
        Self::OpenThread,
        Self::Transcript,
    ];

    /// Stable string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Outcome => "outcome",
            Self::Decision => "decision",
            Self::Constraint => "constraint",
            Self::OpenThread => "open_thread",
            Self::Transcript => "transcript",
        }
    }

    /// Short ID prefix.
    pub fn id_prefix(self) -> &'static str {
        match self {
            Self::Outcome => "out",
            Self::Decision => "dec",
            Self::Constraint => "con",
            Self::OpenThread => "thr",
            Self::Transcript => "trn",
        }
    }

    /// Whether the ID hash includes the run even when a task is present.
    ///
    /// Outcomes and transcripts describe one run; the lexical kinds describe
    /// the task and collapse across its runs.
    fn run_scoped(self) -> bool {
        matches!(self, Self::Outcome | Self::Transcript)
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown artifact type: {s}"))
    }
}

/// Outcome status. Precedence when several signals appear:
/// blocked, then fail, then success.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Nothing indicated a problem.
    Success,
    /// An error, failure, or nonzero exit code was seen.
    Fail,
    /// Work could not proceed.
    Blocked,
}

impl OutcomeStatus {
    /// Stable string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Fail => "fail",
            Self::Blocked => "blocked",
        }
    }
}

/// A shell-like command the run executed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CommandRecord {
    /// Command line.
    pub command: String,
    /// Tool call that ran it.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_call_id: String,
    /// Exit code parsed from the tool result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
}

/// Typed artifact payload. Which fields are set depends on the kind.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ArtifactContent {
    /// Statement, message text, or outcome summary.
    pub text: String,
    /// Reason given for a decision or constraint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    /// Outcome status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<OutcomeStatus>,
    /// Outcome summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Files touched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    /// Commands run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<CommandRecord>,
    /// Error lines seen.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Constraint scope: task, session, or [`GLOBAL_SCOPE`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Message author, for transcripts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// Pointer from an artifact into a canonical log item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ArtifactProvenance {
    /// Run whose log holds the item.
    pub run_id: String,
    /// Item position in the log.
    pub item_index: usize,
    /// Item kind.
    pub item_kind: ItemKind,
    /// Start byte offset in the item content.
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
    /// Request that produced the item.
    pub request_id: String,
    /// WAL byte ranges of the item spans overlapping `start..end`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traces: Vec<TraceSpan>,
}

impl ArtifactProvenance {
    /// Identity used when unioning provenance lists.
    pub fn key(&self) -> (&str, usize, ItemKind, usize, usize) {
        (&self.run_id, self.item_index, self.item_kind, self.start, self.end)
    }
}

/// A typed semantic unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Artifact {
    /// Content-hash ID.
    pub id: String,
    /// Kind.
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    /// Agent session.
    pub session_id: String,
    /// Task within the session.
    pub task_id: String,
    /// Run that first produced the artifact.
    pub run_id: String,
    /// When the producing run happened, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Payload.
    pub content: ArtifactContent,
    /// Where the artifact came from.
    pub provenance: Vec<ArtifactProvenance>,
    /// Artifacts this one replaces.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supersedes: Vec<String>,
    /// Artifacts that replace this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub superseded_by: Vec<String>,
}

impl Artifact {
    /// Whether a later artifact replaced this one.
    pub fn is_superseded(&self) -> bool {
        !self.superseded_by.is_empty()
    }

    /// Flattened searchable text: statement, rationale, outcome fields.
    pub fn search_text(&self) -> String {
        let c = &self.content;
        let mut parts: Vec<&str> = vec![c.text.as_str()];
        parts.extend(c.rationale.as_deref());
        parts.extend(c.summary.as_deref().filter(|s| *s != c.text));
        parts.extend(c.files.iter().map(String::as_str));
        parts.extend(c.commands.iter().map(|cmd| cmd.command.as_str()));
        parts.extend(c.errors.iter().map(String::as_str));
        parts.retain(|p| !p.trim().is_empty());
        parts.join("\n")
    }

    /// Add provenance entries not already present. An entry for an item
    /// already present takes the incoming request and traces, since those
    /// come from the latest replay. Returns how many entries were added.
    pub fn union_provenance(&mut self, incoming: &[ArtifactProvenance]) -> usize {
        let mut added = 0;
        for prov in incoming {
            match self.provenance.iter_mut().find(|p| p.key() == prov.key()) {
                Some(existing) => {
                    existing.request_id.clone_from(&prov.request_id);
                    existing.traces.clone_from(&prov.traces);
                }
                None => {
                    self.provenance.push(prov.clone());
                    added += 1;
                }
            }
        }
        added
    }
}

/// Deterministic artifact ID.
///
/// Hashes the kind, session, task, run (only when the task is empty or the
/// kind is run-scoped), and the normalized statement.
pub fn artifact_id(
    artifact_type: ArtifactType,
    session_id: &str,
    task_id: &str,
    run_id: &str,
    statement: &str,
) -> String {
    let run = if task_id.is_empty() || artifact_type.run_scoped() {
        run_id
    } else {
        ""
    };
    let mut hasher = Sha256::new();
    for part in [
        artifact_type.as_str(),
        session_id,
        task_id,
        run,
        normalize_statement(statement).as_str(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    let hex = format!("{:x}", hasher.finalize());
    format!("{}_{}", artifact_type.id_prefix(), &hex[..ID_HASH_LEN])
}

/// Scope for a constraint: the task, else the session, else [`GLOBAL_SCOPE`].
pub fn constraint_scope(session_id: &str, task_id: &str) -> String {
    if !task_id.is_empty() {
        task_id.to_string()
    } else if !session_id.is_empty() {
        session_id.to_string()
    } else {
        GLOBAL_SCOPE.to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
