//! Canonical log model.
//!
//! A [`Log`] is one reconstructed conversation per run. Every type here is
//! persisted by the canonical store and decoded strictly: unknown fields
//! are rejected.

use mnemo_wal::EventType;
use serde::{Deserialize, Serialize};

/// Schema version written to, and required from, canonical log documents.
pub const CANONICAL_SCHEMA_VERSION: u32 = 1;

/// One reconstructed conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Log {
    /// Document schema version.
    pub schema_version: u32,
    /// Agent session.
    pub session_id: String,
    /// Task within the session.
    pub task_id: String,
    /// Run key (the run ID, or the sole request ID when none was given).
    pub run_id: String,
    /// Contributing requests in first-seen order.
    pub request_ids: Vec<String>,
    /// Run-level metadata.
    pub metadata: LogMetadata,
    /// Ordered conversation items.
    pub items: Vec<Item>,
}

impl Log {
    /// Empty log for a run.
    pub fn new(session_id: &str, task_id: &str, run_id: &str) -> Self {
        Self {
            schema_version: CANONICAL_SCHEMA_VERSION,
            session_id: session_id.to_string(),
            task_id: task_id.to_string(),
            run_id: run_id.to_string(),
            request_ids: Vec::new(),
            metadata: LogMetadata::default(),
            items: Vec::new(),
        }
    }

    /// Messages with their item positions.
    pub fn messages(&self) -> impl Iterator<Item = (usize, &Message)> {
        self.items.iter().enumerate().filter_map(|(i, item)| match item {
            Item::Message(m) => Some((i, m)),
            _ => None,
        })
    }
}

/// Model parameters and usage declared by requests and responses.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LogMetadata {
    /// Model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Output token cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    /// Provider-reported token usage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Provider-reported token usage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Usage {
    /// Prompt tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    /// Completion tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    /// Total tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

impl Usage {
    /// Whether no counter is set.
    pub fn is_empty(&self) -> bool {
        self.input_tokens.is_none() && self.output_tokens.is_none() && self.total_tokens.is_none()
    }

    /// Fill unset counters from `other`.
    pub fn fill_from(&mut self, other: &Self) {
        self.input_tokens = self.input_tokens.or(other.input_tokens);
        self.output_tokens = self.output_tokens.or(other.output_tokens);
        self.total_tokens = self.total_tokens.or(other.total_tokens);
    }
}

/// Conversation item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Item {
    /// A chat message.
    Message(Message),
    /// A tool invocation requested by the assistant.
    ToolCall(ToolCall),
    /// The output of a tool invocation.
    ToolResult(ToolResult),
}

impl Item {
    /// Discriminant of this item.
    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Message(_) => ItemKind::Message,
            Self::ToolCall(_) => ItemKind::ToolCall,
            Self::ToolResult(_) => ItemKind::ToolResult,
        }
    }

    /// Provenance spans, if the item kind carries them.
    pub fn spans(&self) -> &[ProvenanceSpan] {
        match self {
            Self::Message(m) => &m.spans,
            Self::ToolCall(c) => &c.spans,
            Self::ToolResult(_) => &[],
        }
    }

    /// Request that produced this item.
    pub fn request_id(&self) -> &str {
        match self {
            Self::Message(m) => &m.request_id,
            Self::ToolCall(c) => &c.request_id,
            Self::ToolResult(r) => &r.request_id,
        }
    }
}

/// Item discriminant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// [`Item::Message`].
    Message,
    /// [`Item::ToolCall`].
    ToolCall,
    /// [`Item::ToolResult`].
    ToolResult,
}

impl ItemKind {
    /// Stable string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
        }
    }
}

/// Message author.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// System or developer instructions.
    System,
    /// The human or agent driver.
    User,
    /// The model.
    Assistant,
    /// Tool output carried as a message.
    Tool,
}

impl Role {
    /// Map a wire role name. `developer` is treated as `system`.
    pub fn parse(role: &str) -> Option<Self> {
        match role {
            "system" | "developer" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" | "model" => Some(Self::Assistant),
            "tool" | "function" => Some(Self::Tool),
            _ => None,
        }
    }

    /// Stable string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A chat message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Message {
    /// Author.
    pub role: Role,
    /// Full text content.
    pub content: String,
    /// Request that carried (or produced) this message.
    pub request_id: String,
    /// Content ranges traced back to WAL bytes. Empty for request-side and
    /// non-streamed messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<ProvenanceSpan>,
}

/// A tool invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ToolCall {
    /// Call ID (may be empty if the provider never sent one).
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Raw JSON argument string.
    pub arguments: String,
    /// Request that carried (or produced) this call.
    pub request_id: String,
    /// Argument ranges traced back to WAL bytes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<ProvenanceSpan>,
}

/// A tool result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ToolResult {
    /// Call this result answers.
    pub tool_call_id: String,
    /// Output text.
    pub content: String,
    /// Provider-declared error flag.
    #[serde(default)]
    pub is_error: bool,
    /// Request that carried this result.
    pub request_id: String,
}

/// A byte range of reconstructed content and the WAL bytes it came from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProvenanceSpan {
    /// Start byte offset in the item content.
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
    /// Originating WAL byte ranges, one per overlapping chunk.
    pub traces: Vec<TraceSpan>,
}

/// A byte range within one WAL event's decoded body.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TraceSpan {
    /// Request the event belongs to.
    pub request_id: String,
    /// Global replay index of the event.
    pub event_index: usize,
    /// Event kind (always a body chunk kind).
    pub event_type: EventType,
    /// Chunk sequence number.
    pub seq: u64,
    /// Start byte offset in the event body.
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
