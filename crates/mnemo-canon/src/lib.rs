//! # mnemo-canon
//!
//! Reconstructs complete per-run conversation transcripts from the event log.
//!
//! - [`sse`]: incremental SSE decoder tracking stream byte offsets
//! - [`wire`]: provider payload shapes ([`WireFormat`]) decoded into deltas
//! - [`request`]: request body shapes (message array, structured input)
//! - [`canonicalize`]: per-request accumulation folded into per-run [`Log`]s,
//!   with every streamed text span traced back to WAL bytes
//! - [`store`]: strict, atomic per-run document store

#![deny(unsafe_code)]

mod accumulate;
pub mod canonicalize;
pub mod errors;
pub mod request;
pub mod sse;
pub mod store;
pub mod types;
pub mod wire;

pub use canonicalize::{canonicalize, canonicalize_replayed};
pub use errors::{CanonError, Result};
pub use store::CanonicalStore;
pub use types::{
    CANONICAL_SCHEMA_VERSION, Item, ItemKind, Log, LogMetadata, Message, ProvenanceSpan, Role,
    ToolCall, ToolResult, TraceSpan, Usage,
};
pub use wire::WireFormat;
