//! WAL event record.
//!
//! One [`Event`] is one line of the log. Body bytes travel as standard
//! base64 so arbitrary (non-UTF-8) chunks survive the JSON encoding.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mnemo_core::Provider;
use serde::{Deserialize, Serialize};

/// Schema version stamped on events that do not carry one.
pub const WAL_SCHEMA_VERSION: u32 = 1;

/// Kind of intercepted traffic event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Request headers received from the agent.
    RequestStart,
    /// One chunk of the request body.
    RequestBody,
    /// Request body complete.
    RequestEnd,
    /// Response headers received from the provider.
    ResponseStart,
    /// One chunk of the response body.
    ResponseBody,
    /// Response body complete.
    ResponseEnd,
    /// Transport failure.
    Error,
}

impl EventType {
    /// Whether this event carries a body chunk.
    pub fn is_body_chunk(self) -> bool {
        matches!(self, Self::RequestBody | Self::ResponseBody)
    }

    /// Stable string form (matches the wire encoding).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequestStart => "request_start",
            Self::RequestBody => "request_body",
            Self::RequestEnd => "request_end",
            Self::ResponseStart => "response_start",
            Self::ResponseBody => "response_body",
            Self::ResponseEnd => "response_end",
            Self::Error => "error",
        }
    }
}

/// One WAL record. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Record schema version; `0` means "fill on append".
    #[serde(default)]
    pub schema_version: u32,
    /// Capture time; `None` means "fill on append".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Event kind.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Agent session.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_id: String,
    /// Task within the session.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub task_id: String,
    /// Run within the task.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub run_id: String,
    /// Proxy-assigned request correlation ID.
    pub request_id: String,
    /// Provider the request was routed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    /// HTTP method.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    /// HTTP path.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    /// HTTP status (response events).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Header name to values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, Vec<String>>,
    /// Body chunk bytes.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "body_base64")]
    pub body: Vec<u8>,
    /// Per-request, per-direction chunk sequence number.
    #[serde(default)]
    pub seq: u64,
    /// Running byte counter reported by the proxy.
    #[serde(default)]
    pub bytes: u64,
    /// Elapsed time reported on end events.
    #[serde(default)]
    pub duration_ms: u64,
    /// Error text for [`EventType::Error`].
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl Event {
    /// Create an event of `event_type` for `request_id` with every other
    /// field empty.
    pub fn new(event_type: EventType, request_id: impl Into<String>) -> Self {
        Self {
            schema_version: 0,
            timestamp: None,
            event_type,
            session_id: String::new(),
            task_id: String::new(),
            run_id: String::new(),
            request_id: request_id.into(),
            provider: None,
            method: String::new(),
            path: String::new(),
            status: None,
            headers: BTreeMap::new(),
            body: Vec::new(),
            seq: 0,
            bytes: 0,
            duration_ms: 0,
            error: String::new(),
        }
    }

    /// Set session/task/run correlation IDs.
    #[must_use]
    pub fn with_scope(
        mut self,
        session_id: impl Into<String>,
        task_id: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        self.session_id = session_id.into();
        self.task_id = task_id.into();
        self.run_id = run_id.into();
        self
    }

    /// Set the body chunk and its sequence number.
    #[must_use]
    pub fn with_body(mut self, seq: u64, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self.seq = seq;
        self
    }

    /// Add one header value.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.entry(name.into()).or_default().push(value.into());
        self
    }
}

mod body_base64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
