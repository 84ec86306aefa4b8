//! Per-request accumulation.
//!
//! One [`RequestAccumulator`] exists per in-flight request. It owns the
//! request body bytes, the response SSE decoder, the physical chunk windows
//! of the response stream, and the builders for assistant text and tool-call
//! arguments. It is consumed by [`RequestAccumulator::finish`] and never
//! shared across requests.

use std::collections::HashMap;
use std::ops::Range;

use mnemo_core::Provider;
use mnemo_core::text::truncate_str;
use mnemo_wal::{Event, EventType};
use serde_json::Value;
use tracing::{debug, warn};

use crate::request::{ParsedRequest, parse_request};
use crate::sse::{SseDecoder, SseEvent};
use crate::types::{Item, Message, ProvenanceSpan, Role, ToolCall, TraceSpan};
use crate::wire::{ResponseMeta, StreamDelta, ToolFragment, decode_stream_payload, parse_whole_response};

/// Where one response-body chunk sits in the ungapped response stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ChunkWindow {
    stream: Range<usize>,
    event_index: usize,
    event_type: EventType,
    seq: u64,
}

/// Map stream byte ranges onto chunk-relative trace spans, one per
/// overlapping chunk.
pub(crate) fn trace_segments(
    request_id: &str,
    segments: &[Range<usize>],
    windows: &[ChunkWindow],
) -> Vec<TraceSpan> {
    let mut traces = Vec::new();
    for segment in segments {
        for window in windows {
            let start = segment.start.max(window.stream.start);
            let end = segment.end.min(window.stream.end);
            if start >= end {
                continue;
            }
            traces.push(TraceSpan {
                request_id: request_id.to_string(),
                event_index: window.event_index,
                event_type: window.event_type,
                seq: window.seq,
                start: start - window.stream.start,
                end: end - window.stream.start,
            });
        }
    }
    traces
}

/// Growing text with provenance for each appended piece.
#[derive(Debug, Default)]
struct SpannedText {
    text: String,
    spans: Vec<ProvenanceSpan>,
}

impl SpannedText {
    fn push(&mut self, piece: &str, traces: &[TraceSpan]) {
        if piece.is_empty() {
            return;
        }
        let start = self.text.len();
        self.text.push_str(piece);
        if !traces.is_empty() {
            self.spans.push(ProvenanceSpan {
                start,
                end: self.text.len(),
                traces: traces.to_vec(),
            });
        }
    }

    /// Start a new line unless the text is empty or already ends one.
    fn break_line(&mut self) {
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
    }

    fn replace(&mut self, full: &str, traces: &[TraceSpan]) {
        self.text.clear();
        self.spans.clear();
        self.push(full, traces);
    }
}

#[derive(Debug, Default)]
struct ToolBuilder {
    id: String,
    name: String,
    arguments: SpannedText,
}

/// Tool-call builders unified by call ID, item ID, then positional index.
#[derive(Debug, Default)]
pub(crate) struct ToolCallSet {
    builders: Vec<ToolBuilder>,
    by_id: HashMap<String, usize>,
    by_index: HashMap<u64, usize>,
}

impl ToolCallSet {
    pub(crate) fn apply(&mut self, fragment: ToolFragment, traces: &[TraceSpan]) {
        let slot = self.lookup(&fragment).unwrap_or_else(|| {
            self.builders.push(ToolBuilder::default());
            self.builders.len() - 1
        });

        // Register every key this fragment carries, backfilling IDs onto a
        // builder first seen by index only.
        for key in [&fragment.call_id, &fragment.item_id].into_iter().flatten() {
            let _ = self.by_id.entry(key.clone()).or_insert(slot);
        }
        if let Some(index) = fragment.index {
            let _ = self.by_index.entry(index).or_insert(slot);
        }

        let builder = &mut self.builders[slot];
        if builder.id.is_empty() {
            if let Some(id) = fragment.call_id.or(fragment.item_id) {
                builder.id = id;
            }
        }
        if builder.name.is_empty() {
            if let Some(name) = fragment.name {
                builder.name = name;
            }
        }
        if fragment.complete {
            if builder.arguments.text.is_empty() {
                builder.arguments.replace(&fragment.arguments, traces);
            }
        } else {
            builder.arguments.push(&fragment.arguments, traces);
        }
    }

    fn lookup(&self, fragment: &ToolFragment) -> Option<usize> {
        [&fragment.call_id, &fragment.item_id]
            .into_iter()
            .flatten()
            .find_map(|key| self.by_id.get(key).copied())
            .or_else(|| fragment.index.and_then(|i| self.by_index.get(&i).copied()))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    fn into_items(self, request_id: &str) -> impl Iterator<Item = Item> + '_ {
        self.builders.into_iter().map(move |b| {
            Item::ToolCall(ToolCall {
                id: b.id,
                name: b.name,
                arguments: b.arguments.text,
                request_id: request_id.to_string(),
                spans: b.arguments.spans,
            })
        })
    }
}

/// Correlation IDs seen on a request's events (first non-empty wins).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Scope {
    pub(crate) session_id: String,
    pub(crate) task_id: String,
    pub(crate) run_id: String,
}

impl Scope {
    fn observe(&mut self, event: &Event) {
        for (slot, value) in [
            (&mut self.session_id, &event.session_id),
            (&mut self.task_id, &event.task_id),
            (&mut self.run_id, &event.run_id),
        ] {
            if slot.is_empty() && !value.is_empty() {
                slot.clone_from(value);
            }
        }
    }
}

/// Everything one request contributes to its run.
#[derive(Debug)]
pub(crate) struct RequestOutput {
    pub(crate) request_id: String,
    pub(crate) first_event_index: usize,
    pub(crate) scope: Scope,
    pub(crate) request: ParsedRequest,
    pub(crate) response_items: Vec<Item>,
    pub(crate) response_meta: ResponseMeta,
}

/// Owned state for one in-flight request.
#[derive(Debug)]
pub(crate) struct RequestAccumulator {
    request_id: String,
    first_event_index: usize,
    scope: Scope,
    provider: Option<Provider>,
    request_body: Vec<u8>,
    response_body: Vec<u8>,
    decoder: SseDecoder,
    windows: Vec<ChunkWindow>,
    text: SpannedText,
    new_block: bool,
    block_has_text: bool,
    tools: ToolCallSet,
    meta: ResponseMeta,
}

impl RequestAccumulator {
    pub(crate) fn new(request_id: &str, first_event_index: usize) -> Self {
        Self {
            request_id: request_id.to_string(),
            first_event_index,
            scope: Scope::default(),
            provider: None,
            request_body: Vec::new(),
            response_body: Vec::new(),
            decoder: SseDecoder::new(),
            windows: Vec::new(),
            text: SpannedText::default(),
            new_block: false,
            block_has_text: false,
            tools: ToolCallSet::default(),
            meta: ResponseMeta::default(),
        }
    }

    /// Replay index of the request's first event.
    pub(crate) fn first_event_index(&self) -> usize {
        self.first_event_index
    }

    /// Fold one event into the request state.
    pub(crate) fn observe(&mut self, index: usize, event: &Event) {
        self.scope.observe(event);
        if self.provider.is_none() {
            self.provider = event.provider.or_else(|| Provider::from_path(&event.path));
        }
        match event.event_type {
            EventType::RequestBody => self.request_body.extend_from_slice(&event.body),
            EventType::ResponseBody => {
                let start = self.response_body.len();
                self.response_body.extend_from_slice(&event.body);
                self.windows.push(ChunkWindow {
                    stream: start..self.response_body.len(),
                    event_index: index,
                    event_type: event.event_type,
                    seq: event.seq,
                });
                let events = self.decoder.feed(&event.body);
                for sse in events {
                    self.handle_sse(&sse);
                }
            }
            EventType::Error => {
                warn!(request_id = %self.request_id, error = %event.error, "request failed upstream");
            }
            EventType::RequestStart
            | EventType::RequestEnd
            | EventType::ResponseStart
            | EventType::ResponseEnd => {}
        }
    }

    fn handle_sse(&mut self, sse: &SseEvent) {
        let data = sse.data.trim();
        if data.is_empty() || data == "[DONE]" {
            return;
        }
        let payload: Value = match serde_json::from_str(data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    request_id = %self.request_id,
                    error = %e,
                    data_preview = truncate_str(data, 100),
                    "unparsable SSE payload, skipping"
                );
                return;
            }
        };
        let traces = trace_segments(&self.request_id, &sse.segments, &self.windows);
        for delta in decode_stream_payload(&payload) {
            match delta {
                StreamDelta::TextBlock => {
                    self.new_block = true;
                    self.block_has_text = false;
                }
                StreamDelta::Text(piece) => self.append_text(&piece, &traces),
                StreamDelta::TextDone(full) => {
                    if !self.block_has_text {
                        self.append_text(&full, &traces);
                    }
                }
                StreamDelta::Tool(fragment) => self.tools.apply(fragment, &traces),
                StreamDelta::Meta(meta) => {
                    if self.meta.model.is_none() {
                        self.meta.model = meta.model;
                    }
                    self.meta.usage.fill_from(&meta.usage);
                }
            }
        }
    }

    fn append_text(&mut self, piece: &str, traces: &[TraceSpan]) {
        if piece.is_empty() {
            return;
        }
        if self.new_block {
            self.text.break_line();
            self.new_block = false;
        }
        self.text.push(piece, traces);
        self.block_has_text = true;
    }

    /// Drain the decoder (synthesized end-of-stream for un-terminated
    /// requests) and emit this request's contribution.
    pub(crate) fn finish(mut self) -> RequestOutput {
        let tail = self.decoder.finish();
        for sse in tail {
            self.handle_sse(&sse);
        }

        let request = if self.request_body.is_empty() {
            ParsedRequest::default()
        } else {
            match serde_json::from_slice::<Value>(&self.request_body) {
                Ok(body) => parse_request(
                    &body,
                    &self.request_id,
                    self.provider.map(Provider::request_shape),
                ),
                Err(e) => {
                    warn!(request_id = %self.request_id, error = %e, "request body is not JSON");
                    ParsedRequest::default()
                }
            }
        };

        if self.text.text.is_empty() && self.tools.is_empty() && !self.response_body.is_empty() {
            self.apply_whole_response();
        }

        let mut response_items = Vec::new();
        if !self.text.text.trim().is_empty() {
            response_items.push(Item::Message(Message {
                role: Role::Assistant,
                content: self.text.text,
                request_id: self.request_id.clone(),
                spans: self.text.spans,
            }));
        }
        response_items.extend(self.tools.into_items(&self.request_id));

        debug!(
            request_id = %self.request_id,
            request_items = request.items.len(),
            response_items = response_items.len(),
            chunks = self.windows.len(),
            "request accumulated"
        );

        RequestOutput {
            request_id: self.request_id,
            first_event_index: self.first_event_index,
            scope: self.scope,
            request,
            response_items,
            response_meta: self.meta,
        }
    }

    /// Non-streamed fallback: the buffered body as one JSON response. The
    /// resulting message carries no trace spans.
    fn apply_whole_response(&mut self) {
        let Ok(body) = serde_json::from_slice::<Value>(&self.response_body) else {
            debug!(request_id = %self.request_id, "response body is neither SSE nor JSON");
            return;
        };
        let Some(whole) = parse_whole_response(&body) else {
            return;
        };
        self.text.replace(&whole.text, &[]);
        for call in whole.tool_calls {
            self.tools.apply(call, &[]);
        }
        if self.meta.model.is_none() {
            self.meta.model = whole.meta.model;
        }
        self.meta.usage.fill_from(&whole.meta.usage);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn window(stream: Range<usize>, event_index: usize, seq: u64) -> ChunkWindow {
        ChunkWindow {
            stream,
            event_index,
            event_type: EventType::ResponseBody,
            seq,
        }
    }

    #[test]
    fn segment_inside_one_chunk() {
        let windows = [window(0..20, 3, 0), window(20..40, 5, 1)];
        let traces = trace_segments("r", &[24..30], &windows);
        assert_eq!(traces.len(), 1);
        assert_eq!(
            (traces[0].event_index, traces[0].seq, traces[0].start, traces[0].end),
            (5, 1, 4, 10)
        );
    }

    #[test]
    fn segment_straddling_chunks_yields_one_trace_per_chunk() {
        let windows = [window(0..10, 1, 0), window(10..15, 2, 1), window(15..30, 4, 2)];
        let traces = trace_segments("r", &[8..20], &windows);
        let got: Vec<(usize, usize, usize)> = traces
            .iter()
            .map(|t| (t.event_index, t.start, t.end))
            .collect();
        assert_eq!(got, vec![(1, 8, 10), (2, 0, 5), (4, 0, 5)]);
    }

    #[test]
    fn tool_fragments_backfill_id_from_index() {
        let mut set = ToolCallSet::default();
        set.apply(
            ToolFragment {
                index: Some(0),
                name: Some("shell".into()),
                arguments: "{\"cmd\":".into(),
                ..ToolFragment::default()
            },
            &[],
        );
        set.apply(
            ToolFragment {
                call_id: Some("call_7".into()),
                index: Some(0),
                arguments: "\"ls\"".into(),
                ..ToolFragment::default()
            },
            &[],
        );
        set.apply(
            ToolFragment {
                call_id: Some("call_7".into()),
                arguments: "}".into(),
                ..ToolFragment::default()
            },
            &[],
        );
        let items: Vec<Item> = set.into_items("r").collect();
        assert_eq!(items.len(), 1);
        let Item::ToolCall(call) = &items[0] else { panic!() };
        assert_eq!(call.id, "call_7");
        assert_eq!(call.name, "shell");
        assert_eq!(call.arguments, "{\"cmd\":\"ls\"}");
    }

    #[test]
    fn complete_arguments_do_not_duplicate_deltas() {
        let mut set = ToolCallSet::default();
        set.apply(
            ToolFragment {
                item_id: Some("fc_1".into()),
                call_id: Some("call_1".into()),
                name: Some("exec".into()),
                ..ToolFragment::default()
            },
            &[],
        );
        set.apply(
            ToolFragment {
                item_id: Some("fc_1".into()),
                arguments: "{}".into(),
                ..ToolFragment::default()
            },
            &[],
        );
        set.apply(
            ToolFragment {
                item_id: Some("fc_1".into()),
                arguments: "{}".into(),
                complete: true,
                ..ToolFragment::default()
            },
            &[],
        );
        let items: Vec<Item> = set.into_items("r").collect();
        let Item::ToolCall(call) = &items[0] else { panic!() };
        assert_eq!((call.id.as_str(), call.arguments.as_str()), ("call_1", "{}"));
    }

    #[test]
    fn whole_json_fallback_has_no_spans() {
        let mut acc = RequestAccumulator::new("r1", 0);
        let body = br#"{"choices":[{"message":{"role":"assistant","content":"All done."}}],"model":"m"}"#;
        acc.observe(
            0,
            &Event::new(EventType::ResponseBody, "r1").with_body(0, body.to_vec()),
        );
        let out = acc.finish();
        assert_eq!(out.response_items.len(), 1);
        let Item::Message(m) = &out.response_items[0] else { panic!() };
        assert_eq!(m.content, "All done.");
        assert!(m.spans.is_empty());
        assert_eq!(out.response_meta.model.as_deref(), Some("m"));
    }
}
