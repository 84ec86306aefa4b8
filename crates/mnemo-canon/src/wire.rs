//! # Wire formats
//!
//! Decodes provider response payloads (streamed SSE data and whole JSON
//! bodies) into a small set of [`StreamDelta`]s the accumulator understands.
//!
//! Streamed payloads are dispatched by [`WireFormat`]:
//! - `type` starting with `response.` → structured response events
//! - Anthropic message event types → Anthropic message stream
//! - no `type` → chat-completion chunk (`choices[0].delta`)

use serde_json::Value;

use crate::types::Usage;

/// Response payload family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireFormat {
    /// Structured response events (`response.output_text.delta`, ...).
    Responses,
    /// Anthropic message stream (`message_start`, `content_block_delta`, ...).
    Anthropic,
    /// Chat-completion chunks.
    ChatCompletions,
}

const ANTHROPIC_EVENTS: &[&str] = &[
    "message_start",
    "message_delta",
    "message_stop",
    "content_block_start",
    "content_block_delta",
    "content_block_stop",
    "ping",
    "error",
];

impl WireFormat {
    /// Classify a streamed payload. `None` for an unrecognized `type`.
    pub fn detect(payload: &Value) -> Option<Self> {
        match payload.get("type").and_then(Value::as_str) {
            None => Some(Self::ChatCompletions),
            Some(t) if t.starts_with("response.") => Some(Self::Responses),
            Some(t) if ANTHROPIC_EVENTS.contains(&t) => Some(Self::Anthropic),
            Some(_) => None,
        }
    }
}

/// Tool-call fragment. Fragments unify on `call_id`, then `item_id`, then
/// `index`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ToolFragment {
    /// Provider call ID.
    pub call_id: Option<String>,
    /// Output item ID (structured responses address argument deltas by it).
    pub item_id: Option<String>,
    /// Positional index within the response.
    pub index: Option<u64>,
    /// Tool name.
    pub name: Option<String>,
    /// Argument text.
    pub arguments: String,
    /// `arguments` is the complete argument string, not a delta.
    pub complete: bool,
}

/// Model and usage declared by a response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    /// Model name.
    pub model: Option<String>,
    /// Token usage.
    pub usage: Usage,
}

impl ResponseMeta {
    fn is_empty(&self) -> bool {
        self.model.is_none() && self.usage.is_empty()
    }
}

/// One unit of decoded response content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamDelta {
    /// Appended assistant text.
    Text(String),
    /// Full text of the current block; used only when the block streamed
    /// no deltas.
    TextDone(String),
    /// A new text block or output message starts. Its text is kept on a
    /// separate line from earlier text.
    TextBlock,
    /// Tool-call fragment.
    Tool(ToolFragment),
    /// Model / usage declaration.
    Meta(ResponseMeta),
}

/// Decode one streamed payload.
pub fn decode_stream_payload(payload: &Value) -> Vec<StreamDelta> {
    match WireFormat::detect(payload) {
        Some(WireFormat::Responses) => decode_responses_event(payload),
        Some(WireFormat::Anthropic) => decode_anthropic_event(payload),
        Some(WireFormat::ChatCompletions) => decode_chat_chunk(payload),
        None => Vec::new(),
    }
}

fn decode_chat_chunk(payload: &Value) -> Vec<StreamDelta> {
    let mut out = Vec::new();
    let meta = ResponseMeta {
        model: str_field(payload, "model"),
        usage: payload.get("usage").map(parse_usage).unwrap_or_default(),
    };
    if !meta.is_empty() {
        out.push(StreamDelta::Meta(meta));
    }

    let Some(delta) = payload.pointer("/choices/0/delta") else {
        return out;
    };
    if let Some(text) = delta.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            out.push(StreamDelta::Text(text.to_string()));
        }
    }
    for call in delta
        .get("tool_calls")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        out.push(StreamDelta::Tool(ToolFragment {
            call_id: str_field(call, "id"),
            item_id: None,
            index: call.get("index").and_then(Value::as_u64),
            name: call.pointer("/function/name").and_then(non_empty_str),
            arguments: call
                .pointer("/function/arguments")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            complete: false,
        }));
    }
    out
}

fn decode_responses_event(payload: &Value) -> Vec<StreamDelta> {
    let event_type = payload.get("type").and_then(Value::as_str).unwrap_or_default();
    match event_type {
        "response.output_text.delta" => str_field(payload, "delta")
            .map(StreamDelta::Text)
            .into_iter()
            .collect(),
        "response.output_text.done" => str_field(payload, "text")
            .map(StreamDelta::TextDone)
            .into_iter()
            .collect(),
        "response.content_part.added" => vec![StreamDelta::TextBlock],
        "response.output_item.added" | "response.output_item.done" => {
            let Some(item) = payload.get("item") else {
                return Vec::new();
            };
            let item_type = item.get("type").and_then(Value::as_str);
            if event_type == "response.output_item.added" && item_type == Some("message") {
                return vec![StreamDelta::TextBlock];
            }
            if item_type != Some("function_call") {
                return Vec::new();
            }
            let arguments = item
                .get("arguments")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            vec![StreamDelta::Tool(ToolFragment {
                call_id: str_field(item, "call_id"),
                item_id: str_field(item, "id"),
                index: payload.get("output_index").and_then(Value::as_u64),
                name: str_field(item, "name"),
                complete: event_type == "response.output_item.done" && !arguments.is_empty(),
                arguments,
            })]
        }
        "response.function_call_arguments.delta" | "response.function_call_arguments.done" => {
            let done = event_type.ends_with(".done");
            let key = if done { "arguments" } else { "delta" };
            vec![StreamDelta::Tool(ToolFragment {
                call_id: str_field(payload, "call_id"),
                item_id: str_field(payload, "item_id"),
                index: payload.get("output_index").and_then(Value::as_u64),
                name: None,
                arguments: str_field(payload, key).unwrap_or_default(),
                complete: done,
            })]
        }
        "response.created"
        | "response.in_progress"
        | "response.completed"
        | "response.failed"
        | "response.incomplete" => {
            let Some(response) = payload.get("response") else {
                return Vec::new();
            };
            let meta = ResponseMeta {
                model: str_field(response, "model"),
                usage: response.get("usage").map(parse_usage).unwrap_or_default(),
            };
            if meta.is_empty() {
                Vec::new()
            } else {
                vec![StreamDelta::Meta(meta)]
            }
        }
        _ => Vec::new(),
    }
}

fn decode_anthropic_event(payload: &Value) -> Vec<StreamDelta> {
    let event_type = payload.get("type").and_then(Value::as_str).unwrap_or_default();
    let index = payload.get("index").and_then(Value::as_u64);
    match event_type {
        "message_start" => {
            let Some(message) = payload.get("message") else {
                return Vec::new();
            };
            let meta = ResponseMeta {
                model: str_field(message, "model"),
                usage: message.get("usage").map(parse_usage).unwrap_or_default(),
            };
            if meta.is_empty() {
                Vec::new()
            } else {
                vec![StreamDelta::Meta(meta)]
            }
        }
        "message_delta" => {
            let usage = payload.get("usage").map(parse_usage).unwrap_or_default();
            if usage.is_empty() {
                Vec::new()
            } else {
                vec![StreamDelta::Meta(ResponseMeta { model: None, usage })]
            }
        }
        "content_block_start" => {
            let Some(block) = payload.get("content_block") else {
                return Vec::new();
            };
            match block.get("type").and_then(Value::as_str) {
                Some("text") => std::iter::once(StreamDelta::TextBlock)
                    .chain(str_field(block, "text").map(StreamDelta::Text))
                    .collect(),
                Some("tool_use") => {
                    // `input` on start is an empty placeholder; arguments
                    // arrive through `input_json_delta`.
                    let arguments = match block.get("input") {
                        Some(Value::Object(map)) if !map.is_empty() => {
                            Value::Object(map.clone()).to_string()
                        }
                        _ => String::new(),
                    };
                    vec![StreamDelta::Tool(ToolFragment {
                        call_id: str_field(block, "id"),
                        item_id: None,
                        index,
                        name: str_field(block, "name"),
                        complete: !arguments.is_empty(),
                        arguments,
                    })]
                }
                _ => Vec::new(),
            }
        }
        "content_block_delta" => {
            let Some(delta) = payload.get("delta") else {
                return Vec::new();
            };
            match delta.get("type").and_then(Value::as_str) {
                Some("text_delta") => str_field(delta, "text")
                    .map(StreamDelta::Text)
                    .into_iter()
                    .collect(),
                Some("input_json_delta") => vec![StreamDelta::Tool(ToolFragment {
                    index,
                    arguments: str_field(delta, "partial_json").unwrap_or_default(),
                    ..ToolFragment::default()
                })],
                _ => Vec::new(),
            }
        }
        _ => Vec::new(),
    }
}

/// A whole (non-streamed) response body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WholeResponse {
    /// Assistant text.
    pub text: String,
    /// Complete tool calls.
    pub tool_calls: Vec<ToolFragment>,
    /// Model and usage.
    pub meta: ResponseMeta,
}

/// Parse a non-streamed JSON response in chat, structured-response or
/// Anthropic shape. `None` if the body matches none of them.
pub fn parse_whole_response(body: &Value) -> Option<WholeResponse> {
    let meta = ResponseMeta {
        model: str_field(body, "model"),
        usage: body.get("usage").map(parse_usage).unwrap_or_default(),
    };

    if let Some(message) = body.pointer("/choices/0/message") {
        let text = message
            .get("content")
            .map(content_text)
            .unwrap_or_default();
        let tool_calls = message
            .get("tool_calls")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .enumerate()
            .map(|(i, call)| {
                complete_call(
                    str_field(call, "id"),
                    i,
                    call.pointer("/function/name"),
                    call.pointer("/function/arguments").map(value_text),
                )
            })
            .collect();
        return Some(WholeResponse {
            text,
            tool_calls,
            meta,
        });
    }

    if let Some(output) = body.get("output").and_then(Value::as_array) {
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for (i, item) in output.iter().enumerate() {
            match item.get("type").and_then(Value::as_str) {
                Some("message") => {
                    if let Some(content) = item.get("content") {
                        push_block(&mut text, &content_text(content));
                    }
                }
                Some("function_call") => tool_calls.push(complete_call(
                    str_field(item, "call_id"),
                    i,
                    item.get("name"),
                    item.get("arguments").map(value_text),
                )),
                _ => {}
            }
        }
        if text.is_empty() {
            text = str_field(body, "output_text").unwrap_or_default();
        }
        return Some(WholeResponse {
            text,
            tool_calls,
            meta,
        });
    }

    if body.get("type").and_then(Value::as_str) == Some("message") {
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for (i, block) in body
            .get("content")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .enumerate()
        {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    push_block(
                        &mut text,
                        block.get("text").and_then(Value::as_str).unwrap_or_default(),
                    );
                }
                Some("tool_use") => tool_calls.push(complete_call(
                    str_field(block, "id"),
                    i,
                    block.get("name"),
                    block.get("input").map(Value::to_string),
                )),
                _ => {}
            }
        }
        return Some(WholeResponse {
            text,
            tool_calls,
            meta,
        });
    }

    None
}

fn complete_call(
    call_id: Option<String>,
    index: usize,
    name: Option<&Value>,
    arguments: Option<String>,
) -> ToolFragment {
    ToolFragment {
        call_id,
        item_id: None,
        index: Some(index as u64),
        name: name.and_then(non_empty_str),
        arguments: arguments.unwrap_or_default(),
        complete: true,
    }
}

/// Flatten message content: a string, or an array of text-bearing blocks.
pub(crate) fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => {
            let mut text = String::new();
            for block in blocks.iter().filter_map(block_text) {
                push_block(&mut text, block);
            }
            text
        }
        _ => String::new(),
    }
}

/// Append `block` on its own line.
pub(crate) fn push_block(text: &mut String, block: &str) {
    if block.is_empty() {
        return;
    }
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(block);
}

/// Text of one content block, if it is a text-bearing block.
pub(crate) fn block_text(block: &Value) -> Option<&str> {
    match block {
        Value::String(s) => Some(s.as_str()),
        Value::Object(_) => match block.get("type").and_then(Value::as_str) {
            Some("text" | "input_text" | "output_text") | None => {
                block.get("text").and_then(Value::as_str)
            }
            _ => None,
        },
        _ => None,
    }
}

/// A string value as-is, anything else as compact JSON.
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub(crate) fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(non_empty_str)
}

fn non_empty_str(value: &Value) -> Option<String> {
    value.as_str().filter(|s| !s.is_empty()).map(str::to_string)
}

/// Normalize chat (`prompt_tokens`) and structured/Anthropic
/// (`input_tokens`) usage objects.
pub(crate) fn parse_usage(usage: &Value) -> Usage {
    let field = |names: &[&str]| names.iter().find_map(|n| usage.get(*n).and_then(Value::as_u64));
    Usage {
        input_tokens: field(&["input_tokens", "prompt_tokens"]),
        output_tokens: field(&["output_tokens", "completion_tokens"]),
        total_tokens: field(&["total_tokens"]),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
