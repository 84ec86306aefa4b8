//! Request body parsing.
//!
//! Two body shapes are understood:
//! - a flat `messages` array (chat completions and Anthropic, including the
//!   Anthropic top-level `system` and content-block arrays)
//! - a structured `input` array of typed items (`message`, `function_call`,
//!   `function_call_output`) with `instructions` as the system message

use mnemo_core::RequestShape;
use serde_json::Value;
use tracing::debug;

use crate::types::{Item, Message, Role, ToolCall, ToolResult};
use crate::wire::{block_text, content_text, push_block, str_field, value_text};

/// Items and parameters declared by one request body.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedRequest {
    /// Conversation history carried by the request.
    pub items: Vec<Item>,
    /// Requested model.
    pub model: Option<String>,
    /// Requested temperature.
    pub temperature: Option<f64>,
    /// Requested output cap.
    pub max_tokens: Option<u64>,
}

/// Parse a request body. Items carry `request_id` and no provenance spans.
///
/// `shape` is the body shape the routed provider declares; without one the
/// shape is inferred from which of `messages` or `input` is present.
pub fn parse_request(body: &Value, request_id: &str, shape: Option<RequestShape>) -> ParsedRequest {
    let mut parsed = ParsedRequest {
        model: str_field(body, "model"),
        temperature: body.get("temperature").and_then(Value::as_f64),
        max_tokens: ["max_tokens", "max_output_tokens", "max_completion_tokens"]
            .iter()
            .find_map(|k| body.get(*k).and_then(Value::as_u64)),
        items: Vec::new(),
    };

    match shape.or_else(|| infer_shape(body)) {
        Some(RequestShape::MessageArray) => {
            let Some(messages) = body.get("messages").and_then(Value::as_array) else {
                debug!(request_id, "message-array request without messages");
                return parsed;
            };
            if let Some(system) = body.get("system") {
                push_message(&mut parsed.items, Role::System, content_text(system), request_id);
            }
            for message in messages {
                parse_message_entry(message, request_id, &mut parsed.items);
            }
        }
        Some(RequestShape::StructuredInput) => {
            if let Some(instructions) = str_field(body, "instructions") {
                push_message(&mut parsed.items, Role::System, instructions, request_id);
            }
            match body.get("input") {
                Some(Value::String(text)) => {
                    push_message(&mut parsed.items, Role::User, text.clone(), request_id);
                }
                Some(Value::Array(entries)) => {
                    for entry in entries {
                        parse_input_entry(entry, request_id, &mut parsed.items);
                    }
                }
                _ => debug!(request_id, "request input is neither string nor array"),
            }
        }
        None => {}
    }
    parsed
}

fn infer_shape(body: &Value) -> Option<RequestShape> {
    if body.get("messages").is_some_and(Value::is_array) {
        Some(RequestShape::MessageArray)
    } else if body.get("input").is_some() {
        Some(RequestShape::StructuredInput)
    } else {
        None
    }
}

fn parse_message_entry(message: &Value, request_id: &str, items: &mut Vec<Item>) {
    let Some(role) = message.get("role").and_then(Value::as_str).and_then(Role::parse) else {
        debug!(request_id, "skipping message with unknown role");
        return;
    };

    // Chat tool output.
    if role == Role::Tool {
        items.push(Item::ToolResult(ToolResult {
            tool_call_id: str_field(message, "tool_call_id").unwrap_or_default(),
            content: message.get("content").map(content_text).unwrap_or_default(),
            is_error: false,
            request_id: request_id.to_string(),
        }));
        return;
    }

    match message.get("content") {
        Some(Value::Array(blocks)) => parse_content_blocks(role, blocks, request_id, items),
        Some(content) => push_message(items, role, content_text(content), request_id),
        None => {}
    }

    // Chat assistant tool calls.
    for call in message
        .get("tool_calls")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        items.push(Item::ToolCall(ToolCall {
            id: str_field(call, "id").unwrap_or_default(),
            name: call
                .pointer("/function/name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            arguments: call
                .pointer("/function/arguments")
                .map(value_text)
                .unwrap_or_default(),
            request_id: request_id.to_string(),
            spans: Vec::new(),
        }));
    }
}

/// Anthropic-style content blocks: text joins into one message; tool blocks
/// become their own items in order.
fn parse_content_blocks(role: Role, blocks: &[Value], request_id: &str, items: &mut Vec<Item>) {
    let mut text = String::new();
    let mut trailing = Vec::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("tool_use") => trailing.push(Item::ToolCall(ToolCall {
                id: str_field(block, "id").unwrap_or_default(),
                name: str_field(block, "name").unwrap_or_default(),
                arguments: block.get("input").map(Value::to_string).unwrap_or_default(),
                request_id: request_id.to_string(),
                spans: Vec::new(),
            })),
            Some("tool_result") => trailing.push(Item::ToolResult(ToolResult {
                tool_call_id: str_field(block, "tool_use_id").unwrap_or_default(),
                content: block.get("content").map(content_text).unwrap_or_default(),
                is_error: block
                    .get("is_error")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                request_id: request_id.to_string(),
            })),
            _ => push_block(&mut text, block_text(block).unwrap_or_default()),
        }
    }
    push_message(items, role, text, request_id);
    items.extend(trailing);
}

fn parse_input_entry(entry: &Value, request_id: &str, items: &mut Vec<Item>) {
    let kind = entry.get("type").and_then(Value::as_str);
    match kind {
        Some("message") | None => {
            let Some(role) = entry.get("role").and_then(Value::as_str).and_then(Role::parse) else {
                debug!(request_id, "skipping input item without a known role");
                return;
            };
            let content = entry.get("content").map(content_text).unwrap_or_default();
            push_message(items, role, content, request_id);
        }
        Some("function_call") => items.push(Item::ToolCall(ToolCall {
            id: str_field(entry, "call_id").unwrap_or_default(),
            name: str_field(entry, "name").unwrap_or_default(),
            arguments: entry.get("arguments").map(value_text).unwrap_or_default(),
            request_id: request_id.to_string(),
            spans: Vec::new(),
        })),
        Some("function_call_output") => items.push(Item::ToolResult(ToolResult {
            tool_call_id: str_field(entry, "call_id").unwrap_or_default(),
            content: entry.get("output").map(value_text).unwrap_or_default(),
            is_error: false,
            request_id: request_id.to_string(),
        })),
        Some(other) => debug!(request_id, item_type = other, "skipping input item"),
    }
}

fn push_message(items: &mut Vec<Item>, role: Role, content: String, request_id: &str) {
    if content.trim().is_empty() {
        return;
    }
    items.push(Item::Message(Message {
        role,
        content,
        request_id: request_id.to_string(),
        spans: Vec::new(),
    }));
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
