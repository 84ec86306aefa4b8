//! Event replay to canonical logs.
//!
//! Events are grouped by request ID into [`RequestAccumulator`]s and requests
//! by run ID (falling back to the request ID) into [`Log`]s. A request is
//! finished on `response_end` or `error`; requests still open when the batch
//! ends get a synthesized end-of-stream flush.

use std::collections::{HashMap, HashSet};

use mnemo_wal::{Event, EventType, ReplayedEvent};
use tracing::{debug, info};

use crate::accumulate::{RequestAccumulator, RequestOutput};
use crate::request::ParsedRequest;
use crate::types::{Item, Log, LogMetadata, Usage};
use crate::wire::ResponseMeta;

/// Canonicalize events indexed by their position in `events`.
pub fn canonicalize(events: &[Event]) -> Vec<Log> {
    canonicalize_indexed(events.iter().enumerate())
}

/// Canonicalize replayed events, keeping their global replay indices.
pub fn canonicalize_replayed(events: &[ReplayedEvent]) -> Vec<Log> {
    canonicalize_indexed(events.iter().map(|e| (e.index, &e.event)))
}

fn canonicalize_indexed<'a>(events: impl Iterator<Item = (usize, &'a Event)>) -> Vec<Log> {
    let mut open: HashMap<String, RequestAccumulator> = HashMap::new();
    let mut finished: HashSet<String> = HashSet::new();
    let mut runs = RunSet::default();
    let mut seen = 0usize;

    for (index, event) in events {
        seen += 1;
        let request_id = event.request_id.as_str();
        if finished.contains(request_id) {
            debug!(request_id, event_index = index, "event after request end, ignoring");
            continue;
        }
        let acc = open
            .entry(request_id.to_string())
            .or_insert_with(|| RequestAccumulator::new(request_id, index));
        acc.observe(index, event);

        if matches!(event.event_type, EventType::ResponseEnd | EventType::Error) {
            if let Some(acc) = open.remove(request_id) {
                runs.fold(acc.finish());
            }
            let _ = finished.insert(request_id.to_string());
        }
    }

    // Un-terminated requests, in first-seen order.
    let mut pending: Vec<RequestAccumulator> = open.into_values().collect();
    pending.sort_by_key(RequestAccumulator::first_event_index);
    let unterminated = pending.len();
    for acc in pending {
        runs.fold(acc.finish());
    }

    let logs = runs.into_logs();
    info!(
        events = seen,
        logs = logs.len(),
        unterminated,
        "canonicalization complete"
    );
    logs
}

/// A metadata value remembering whether a response declared it.
#[derive(Debug, Default)]
struct Declared<T> {
    value: Option<T>,
    from_response: bool,
}

impl<T> Declared<T> {
    /// First non-empty request value wins.
    fn from_request(&mut self, value: Option<T>) {
        if self.value.is_none() {
            self.value = value;
        }
    }

    /// The first response value overrides a request value; later response
    /// values do not.
    fn from_response(&mut self, value: Option<T>) {
        if value.is_some() && !self.from_response {
            self.value = value;
            self.from_response = true;
        }
    }
}

#[derive(Debug, Default)]
struct RunBuilder {
    first_event_index: usize,
    session_id: String,
    task_id: String,
    run_id: String,
    requests: Vec<(usize, String)>,
    items: Vec<Item>,
    model: Declared<String>,
    temperature: Declared<f64>,
    max_tokens: Declared<u64>,
    usage: Usage,
}

impl RunBuilder {
    fn add_request_items(&mut self, request: ParsedRequest) {
        // Each request resends the history; skip the prefix already present.
        let shared = request
            .items
            .iter()
            .zip(&self.items)
            .take_while(|(a, b)| same_item(a, b))
            .count();
        self.items.extend(request.items.into_iter().skip(shared));
    }

    fn add_meta(&mut self, request: &ParsedRequest, response: ResponseMeta) {
        self.model.from_request(request.model.clone());
        self.temperature.from_request(request.temperature);
        self.max_tokens.from_request(request.max_tokens);
        self.model.from_response(response.model);
        self.usage.fill_from(&response.usage);
    }

    fn into_log(mut self) -> Log {
        self.requests.sort();
        let mut log = Log::new(&self.session_id, &self.task_id, &self.run_id);
        log.request_ids = self.requests.into_iter().map(|(_, id)| id).collect();
        log.metadata = LogMetadata {
            model: self.model.value,
            temperature: self.temperature.value,
            max_tokens: self.max_tokens.value,
            usage: (!self.usage.is_empty()).then_some(self.usage),
        };
        log.items = self.items;
        log
    }
}

/// Items compare by kind and content, ignoring provenance and request ID.
fn same_item(a: &Item, b: &Item) -> bool {
    match (a, b) {
        (Item::Message(a), Item::Message(b)) => {
            a.role == b.role && a.content.trim() == b.content.trim()
        }
        (Item::ToolCall(a), Item::ToolCall(b)) => {
            a.name == b.name
                && (a.id == b.id || a.id.is_empty() || b.id.is_empty())
                && same_arguments(&a.arguments, &b.arguments)
        }
        (Item::ToolResult(a), Item::ToolResult(b)) => {
            a.tool_call_id == b.tool_call_id && a.content.trim() == b.content.trim()
        }
        _ => false,
    }
}

/// Argument strings are equal verbatim or as parsed JSON (providers
/// re-serialize arguments when echoing history).
fn same_arguments(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (
        serde_json::from_str::<serde_json::Value>(a),
        serde_json::from_str::<serde_json::Value>(b),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[derive(Debug, Default)]
struct RunSet {
    runs: Vec<RunBuilder>,
    by_key: HashMap<String, usize>,
}

impl RunSet {
    fn fold(&mut self, output: RequestOutput) {
        let key = if output.scope.run_id.is_empty() {
            output.request_id.clone()
        } else {
            output.scope.run_id.clone()
        };
        let slot = *self.by_key.entry(key.clone()).or_insert_with(|| {
            self.runs.push(RunBuilder {
                first_event_index: output.first_event_index,
                run_id: key,
                ..RunBuilder::default()
            });
            self.runs.len() - 1
        });
        let run = &mut self.runs[slot];
        run.first_event_index = run.first_event_index.min(output.first_event_index);
        if run.session_id.is_empty() {
            run.session_id.clone_from(&output.scope.session_id);
        }
        if run.task_id.is_empty() {
            run.task_id.clone_from(&output.scope.task_id);
        }
        run.requests
            .push((output.first_event_index, output.request_id.clone()));

        run.add_meta(&output.request, output.response_meta);
        run.add_request_items(output.request);
        run.items.extend(output.response_items);
    }

    fn into_logs(mut self) -> Vec<Log> {
        self.runs.sort_by_key(|r| r.first_event_index);
        self.runs.into_iter().map(RunBuilder::into_log).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ItemKind, Role, ToolCall};
    use mnemo_core::Provider;
    use serde_json::{Value, json};

    fn scoped(event: Event) -> Event {
        event.with_scope("s1", "t1", "run-1")
    }

    fn request_events(request_id: &str, body: &serde_json::Value) -> Vec<Event> {
        vec![
            scoped(Event::new(EventType::RequestStart, request_id)),
            scoped(Event::new(EventType::RequestBody, request_id).with_body(0, body.to_string())),
            scoped(Event::new(EventType::RequestEnd, request_id)),
        ]
    }

    fn chat_delta(text: &str) -> String {
        format!(
            "data: {}\n\n",
            json!({"choices": [{"delta": {"content": text}}]})
        )
    }

    /// A full streamed exchange: request events, one response chunk per
    /// payload, then `response_end`. The first chunk is event 4.
    fn streamed_exchange(provider: Provider, body: &Value, payloads: &[Value]) -> Vec<Event> {
        let mut events = request_events("req-1", body);
        events[0].provider = Some(provider);
        events.push(scoped(Event::new(EventType::ResponseStart, "req-1")));
        for (seq, payload) in payloads.iter().enumerate() {
            events.push(scoped(
                Event::new(EventType::ResponseBody, "req-1")
                    .with_body(seq as u64, format!("data: {payload}\n\n")),
            ));
        }
        events.push(scoped(Event::new(EventType::ResponseEnd, "req-1")));
        events
    }

    /// Decode the SSE payload each trace of `spans` points at.
    fn traced_payloads(events: &[Event], spans: &[crate::types::ProvenanceSpan]) -> Vec<Value> {
        spans
            .iter()
            .flat_map(|span| &span.traces)
            .map(|trace| {
                let event = &events[trace.event_index];
                assert_eq!(event.request_id, trace.request_id);
                assert_eq!(event.seq, trace.seq);
                serde_json::from_slice(&event.body[trace.start..trace.end]).unwrap()
            })
            .collect()
    }

    fn only_tool_call(log: &Log) -> &ToolCall {
        let calls: Vec<&ToolCall> = log
            .items
            .iter()
            .filter_map(|item| match item {
                Item::ToolCall(call) => Some(call),
                _ => None,
            })
            .collect();
        assert_eq!(calls.len(), 1);
        calls[0]
    }

    #[test]
    fn responses_stream_reconstructs_items_with_provenance() {
        let body = json!({
            "model": "o3",
            "input": [{"type": "message", "role": "user", "content": [{"type": "input_text", "text": "go"}]}]
        });
        let payloads = [
            json!({"type": "response.output_item.added", "output_index": 0, "item": {"type": "message", "id": "msg_1"}}),
            json!({"type": "response.output_text.delta", "item_id": "msg_1", "delta": "Checking."}),
            json!({"type": "response.output_text.done", "item_id": "msg_1", "text": "Checking."}),
            json!({"type": "response.output_item.added", "output_index": 1, "item": {"type": "message", "id": "msg_2"}}),
            json!({"type": "response.output_text.delta", "item_id": "msg_2", "delta": "Decision: use X"}),
            json!({"type": "response.output_item.added", "output_index": 2,
                   "item": {"type": "function_call", "id": "fc_1", "call_id": "call_1", "name": "bash", "arguments": ""}}),
            json!({"type": "response.function_call_arguments.delta", "item_id": "fc_1", "output_index": 2, "delta": "{\"cmd\":"}),
            json!({"type": "response.function_call_arguments.delta", "item_id": "fc_1", "output_index": 2, "delta": "\"ls\"}"}),
            json!({"type": "response.function_call_arguments.done", "item_id": "fc_1", "output_index": 2, "arguments": "{\"cmd\":\"ls\"}"}),
            json!({"type": "response.completed", "response": {"model": "o3-2025", "usage": {"input_tokens": 3, "output_tokens": 9}}}),
        ];
        let events = streamed_exchange(Provider::OpenAiResponses, &body, &payloads);

        let logs = canonicalize(&events);
        assert_eq!(logs.len(), 1);
        let log = &logs[0];
        let contents: Vec<(Role, &str)> = log.messages().map(|(_, m)| (m.role, m.content.as_str())).collect();
        assert_eq!(
            contents,
            vec![(Role::User, "go"), (Role::Assistant, "Checking.\nDecision: use X")]
        );

        let (_, answer) = log.messages().find(|(_, m)| m.role == Role::Assistant).unwrap();
        let ranges: Vec<(usize, usize)> = answer.spans.iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(ranges, vec![(0, 9), (10, 25)]);
        for (span, payload) in answer.spans.iter().zip(traced_payloads(&events, &answer.spans)) {
            assert_eq!(payload["type"], "response.output_text.delta");
            assert_eq!(payload["delta"], &answer.content[span.start..span.end]);
        }

        let call = only_tool_call(log);
        assert_eq!((call.id.as_str(), call.name.as_str()), ("call_1", "bash"));
        assert_eq!(call.arguments, "{\"cmd\":\"ls\"}");
        let deltas: Vec<Value> = traced_payloads(&events, &call.spans)
            .into_iter()
            .map(|p| p["delta"].clone())
            .collect();
        assert_eq!(deltas, vec![json!("{\"cmd\":"), json!("\"ls\"}")]);

        assert_eq!(log.metadata.model.as_deref(), Some("o3-2025"));
        assert_eq!(log.metadata.usage.unwrap().output_tokens, Some(9));
    }

    #[test]
    fn anthropic_stream_reconstructs_items_with_provenance() {
        let body = json!({
            "model": "claude",
            "system": "be terse",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": "go"}]
        });
        let payloads = [
            json!({"type": "message_start", "message": {"model": "claude-x", "usage": {"input_tokens": 5}}}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Checking."}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "content_block_start", "index": 1, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "text_delta", "text": "Decision: use X"}}),
            json!({"type": "content_block_stop", "index": 1}),
            json!({"type": "content_block_start", "index": 2,
                   "content_block": {"type": "tool_use", "id": "toolu_1", "name": "bash", "input": {}}}),
            json!({"type": "content_block_delta", "index": 2,
                   "delta": {"type": "input_json_delta", "partial_json": "{\"cmd\":\"ls\"}"}}),
            json!({"type": "message_delta", "usage": {"output_tokens": 7}}),
            json!({"type": "message_stop"}),
        ];
        let events = streamed_exchange(Provider::Anthropic, &body, &payloads);

        let logs = canonicalize(&events);
        let log = &logs[0];
        let contents: Vec<(Role, &str)> = log.messages().map(|(_, m)| (m.role, m.content.as_str())).collect();
        assert_eq!(
            contents,
            vec![
                (Role::System, "be terse"),
                (Role::User, "go"),
                (Role::Assistant, "Checking.\nDecision: use X"),
            ]
        );

        let (_, answer) = log.messages().find(|(_, m)| m.role == Role::Assistant).unwrap();
        assert_eq!(answer.spans.len(), 2);
        for (span, payload) in answer.spans.iter().zip(traced_payloads(&events, &answer.spans)) {
            assert_eq!(payload["delta"]["text"], &answer.content[span.start..span.end]);
        }
        // Events 0-3 are request events and response_start.
        assert_eq!(answer.spans[1].traces[0].event_index, 4 + 5);

        let call = only_tool_call(log);
        assert_eq!(call.id, "toolu_1");
        assert_eq!(call.arguments, "{\"cmd\":\"ls\"}");
        let partials: Vec<Value> = traced_payloads(&events, &call.spans)
            .into_iter()
            .map(|p| p["delta"]["partial_json"].clone())
            .collect();
        assert_eq!(partials, vec![json!("{\"cmd\":\"ls\"}")]);

        let usage = log.metadata.usage.unwrap();
        assert_eq!((usage.input_tokens, usage.output_tokens), (Some(5), Some(7)));
        assert_eq!(log.metadata.model.as_deref(), Some("claude-x"));
        assert_eq!(log.metadata.max_tokens, Some(100));
    }

    #[test]
    fn two_chunks_reconstruct_one_message_with_two_spans() {
        let mut events = request_events("req-1", &json!({"messages": [{"role": "user", "content": "greet"}]}));
        events.push(scoped(Event::new(EventType::ResponseStart, "req-1")));
        let first = chat_delta("Hello ");
        let second = chat_delta("world");
        events.push(scoped(Event::new(EventType::ResponseBody, "req-1").with_body(0, first.clone())));
        events.push(scoped(Event::new(EventType::ResponseBody, "req-1").with_body(1, second.clone())));
        events.push(scoped(Event::new(EventType::ResponseEnd, "req-1")));

        let logs = canonicalize(&events);
        assert_eq!(logs.len(), 1);
        let log = &logs[0];
        assert_eq!(log.run_id, "run-1");
        assert_eq!(log.request_ids, vec!["req-1"]);

        let (_, message) = log
            .messages()
            .find(|(_, m)| m.role == Role::Assistant)
            .unwrap();
        assert_eq!(message.content, "Hello world");
        assert_eq!(message.spans.len(), 2);

        for (span, (event_index, seq, chunk)) in message
            .spans
            .iter()
            .zip([(4usize, 0u64, &first), (5, 1, &second)])
        {
            assert_eq!(span.traces.len(), 1);
            let trace = &span.traces[0];
            assert_eq!(trace.event_index, event_index);
            assert_eq!(trace.seq, seq);
            assert_eq!(trace.event_type, EventType::ResponseBody);
            let payload = &events[trace.event_index].body[trace.start..trace.end];
            let value: serde_json::Value = serde_json::from_slice(payload).unwrap();
            assert_eq!(
                value["choices"][0]["delta"]["content"],
                &message.content[span.start..span.end]
            );
            assert!(trace.end <= chunk.len());
        }
        assert_eq!((message.spans[0].start, message.spans[0].end), (0, 6));
        assert_eq!((message.spans[1].start, message.spans[1].end), (6, 11));
    }

    #[test]
    fn payload_split_across_chunks_traces_both() {
        let mut events = request_events("r", &json!({"messages": []}));
        let line = chat_delta("split");
        let (a, b) = line.split_at(20);
        events.push(scoped(Event::new(EventType::ResponseBody, "r").with_body(0, a)));
        events.push(scoped(Event::new(EventType::ResponseBody, "r").with_body(1, b)));
        events.push(scoped(Event::new(EventType::ResponseEnd, "r")));

        let logs = canonicalize(&events);
        let (_, message) = logs[0].messages().next().unwrap();
        assert_eq!(message.content, "split");
        let traces = &message.spans[0].traces;
        assert_eq!(traces.len(), 2);
        assert_eq!((traces[0].event_index, traces[0].start, traces[0].end), (3, 6, 20));
        assert_eq!((traces[1].event_index, traces[1].start), (4, 0));
    }

    #[test]
    fn resent_history_is_not_duplicated() {
        let mut events = request_events(
            "r1",
            &json!({"messages": [{"role": "user", "content": "step one"}]}),
        );
        events.push(scoped(Event::new(EventType::ResponseBody, "r1").with_body(0, chat_delta("ok one"))));
        events.push(scoped(Event::new(EventType::ResponseEnd, "r1")));
        events.extend(request_events(
            "r2",
            &json!({"messages": [
                {"role": "user", "content": "step one"},
                {"role": "assistant", "content": "ok one"},
                {"role": "user", "content": "step two"}
            ]}),
        ));
        events.push(scoped(Event::new(EventType::ResponseBody, "r2").with_body(0, chat_delta("ok two"))));
        events.push(scoped(Event::new(EventType::ResponseEnd, "r2")));

        let logs = canonicalize(&events);
        assert_eq!(logs.len(), 1);
        let contents: Vec<&str> = logs[0].messages().map(|(_, m)| m.content.as_str()).collect();
        assert_eq!(contents, vec!["step one", "ok one", "step two", "ok two"]);
        assert_eq!(logs[0].request_ids, vec!["r1", "r2"]);
    }

    #[test]
    fn tool_call_stream_with_index_backfill() {
        let mut events = request_events("r", &json!({"messages": []}));
        let chunks = [
            json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"name": "bash", "arguments": "{\"command\":"}}]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "id": "call_1", "function": {"arguments": "\"ls\"}"}}]}}]}),
        ];
        for (seq, chunk) in chunks.iter().enumerate() {
            events.push(scoped(
                Event::new(EventType::ResponseBody, "r").with_body(seq as u64, format!("data: {chunk}\n\n")),
            ));
        }
        events.push(scoped(Event::new(EventType::ResponseEnd, "r")));

        let logs = canonicalize(&events);
        let calls: Vec<&Item> = logs[0]
            .items
            .iter()
            .filter(|i| i.kind() == ItemKind::ToolCall)
            .collect();
        assert_eq!(calls.len(), 1);
        let Item::ToolCall(call) = calls[0] else { panic!() };
        assert_eq!(call.id, "call_1");
        assert_eq!(call.arguments, "{\"command\":\"ls\"}");
        assert_eq!(call.spans.len(), 2);
    }

    #[test]
    fn metadata_response_overrides_request_once() {
        let mut events = request_events(
            "r1",
            &json!({"model": "alias", "temperature": 0.5, "messages": []}),
        );
        let chunk = json!({"model": "concrete-1", "choices": [{"delta": {"content": "x"}}], "usage": {"prompt_tokens": 4}});
        events.push(scoped(Event::new(EventType::ResponseBody, "r1").with_body(0, format!("data: {chunk}\n\n"))));
        events.push(scoped(Event::new(EventType::ResponseEnd, "r1")));
        events.extend(request_events("r2", &json!({"model": "other", "messages": []})));
        let chunk = json!({"model": "concrete-2", "choices": [{"delta": {"content": "y"}}]});
        events.push(scoped(Event::new(EventType::ResponseBody, "r2").with_body(0, format!("data: {chunk}\n\n"))));
        events.push(scoped(Event::new(EventType::ResponseEnd, "r2")));

        let meta = &canonicalize(&events)[0].metadata;
        assert_eq!(meta.model.as_deref(), Some("concrete-1"));
        assert_eq!(meta.temperature, Some(0.5));
        assert_eq!(meta.usage.unwrap().input_tokens, Some(4));
    }

    #[test]
    fn unterminated_request_is_flushed() {
        let mut events = request_events("r", &json!({"messages": []}));
        events.push(scoped(Event::new(EventType::ResponseBody, "r").with_body(0, "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}")));

        let logs = canonicalize(&events);
        let (_, message) = logs[0].messages().next().unwrap();
        assert_eq!(message.content, "partial");
        assert_eq!(message.spans.len(), 1);
    }

    #[test]
    fn runs_fall_back_to_request_id() {
        let events = vec![
            Event::new(EventType::RequestBody, "solo")
                .with_body(0, json!({"messages": [{"role": "user", "content": "hi"}]}).to_string()),
            Event::new(EventType::ResponseEnd, "solo"),
        ];
        let logs = canonicalize(&events);
        assert_eq!(logs[0].run_id, "solo");
        assert_eq!(logs[0].session_id, "");
    }

    #[test]
    fn replayed_indices_are_preserved() {
        let events: Vec<ReplayedEvent> = [
            Event::new(EventType::ResponseBody, "r").with_body(0, chat_delta("hey")),
            Event::new(EventType::ResponseEnd, "r"),
        ]
        .into_iter()
        .enumerate()
        .map(|(i, event)| ReplayedEvent {
            index: i + 100,
            event,
        })
        .collect();
        let logs = canonicalize_replayed(&events);
        let (_, message) = logs[0].messages().next().unwrap();
        assert_eq!(message.spans[0].traces[0].event_index, 100);
    }

    #[test]
    fn canonicalization_is_deterministic() {
        let mut events = request_events("a", &json!({"messages": [{"role": "user", "content": "1"}]}));
        events.extend(request_events("b", &json!({"messages": [{"role": "user", "content": "2"}]})));
        events.push(scoped(Event::new(EventType::ResponseEnd, "b")));
        events.push(scoped(Event::new(EventType::ResponseEnd, "a")));
        let first = canonicalize(&events);
        let second = canonicalize(&events);
        assert_eq!(first, second);
        assert_eq!(first[0].request_ids, vec!["a", "b"]);
    }
}
