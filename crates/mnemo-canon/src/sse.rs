//! # SSE decoder
//!
//! Incremental Server-Sent Events decoder that remembers where every data
//! byte sits in the request's ungapped response stream.
//!
//! - Lines end at `\n` (a trailing `\r` is dropped)
//! - A blank line ends an event
//! - `data:` values are trimmed of at most one leading space; multiple data
//!   lines join with `\n`
//! - Partial lines are buffered across chunks; [`SseDecoder::finish`] drains
//!   whatever is left when the stream ends

use std::ops::Range;

use tracing::warn;

/// One decoded SSE event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `event:` field, if any.
    pub event: Option<String>,
    /// Joined data payload.
    pub data: String,
    /// Stream byte ranges holding the payload, one per `data:` line.
    pub segments: Vec<Range<usize>>,
}

/// Incremental decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    line_start: usize,
    offset: usize,
    event: Option<String>,
    data: Vec<u8>,
    segments: Vec<Range<usize>>,
}

impl SseDecoder {
    /// Fresh decoder positioned at stream offset zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Feed the next chunk; returns the events it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut out = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.line.extend_from_slice(&rest[..pos]);
            self.offset += pos + 1;
            self.take_line(&mut out);
            self.line_start = self.offset;
            rest = &rest[pos + 1..];
        }
        self.line.extend_from_slice(rest);
        self.offset += rest.len();
        out
    }

    /// Drain a trailing partial line and any pending event.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut out = Vec::new();
        if !self.line.is_empty() {
            self.take_line(&mut out);
            self.line_start = self.offset;
        }
        self.dispatch(&mut out);
        out
    }

    fn take_line(&mut self, out: &mut Vec<SseEvent>) {
        let mut line = std::mem::take(&mut self.line);
        if line.last() == Some(&b'\r') {
            let _ = line.pop();
        }
        if line.is_empty() {
            self.dispatch(out);
            return;
        }
        if line[0] == b':' {
            return;
        }

        let (field, value_start) = match line.iter().position(|&b| b == b':') {
            Some(colon) => {
                let mut start = colon + 1;
                if line.get(start) == Some(&b' ') {
                    start += 1;
                }
                (&line[..colon], start)
            }
            None => (&line[..], line.len()),
        };
        let value = &line[value_start..];

        match field {
            b"data" => {
                if !self.segments.is_empty() {
                    self.data.push(b'\n');
                }
                self.data.extend_from_slice(value);
                let start = self.line_start + value_start;
                self.segments.push(start..start + value.len());
            }
            b"event" => {
                self.event = Some(String::from_utf8_lossy(value).into_owned());
            }
            _ => {}
        }
    }

    fn dispatch(&mut self, out: &mut Vec<SseEvent>) {
        let event = self.event.take();
        let segments = std::mem::take(&mut self.segments);
        let data = std::mem::take(&mut self.data);
        if segments.is_empty() {
            return;
        }
        match String::from_utf8(data) {
            Ok(data) => out.push(SseEvent {
                event,
                data,
                segments,
            }),
            Err(e) => warn!(error = %e, "SSE payload is not UTF-8, skipping"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
