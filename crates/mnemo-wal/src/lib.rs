//! # mnemo-wal
//!
//! Durable, rotating, append-only record of every intercepted request and
//! response event.
//!
//! - [`EventLog`]: mutex-serialized writer with size/age rotation,
//!   retention pruning, header redaction and privacy mode
//! - [`WalReader`] / [`replay`]: one globally ordered event stream across
//!   all rotations
//! - [`Redactor`] / [`HeaderRedactor`]: header scrubbing before serialization

#![deny(unsafe_code)]

pub mod errors;
pub mod event;
mod naming;
pub mod reader;
pub mod redact;
pub mod writer;

pub use errors::{Result, WalError};
pub use event::{Event, EventType, WAL_SCHEMA_VERSION};
pub use reader::{ReplayedEvent, WalReader, replay};
pub use redact::{HeaderRedactor, REDACTED, Redactor};
pub use writer::{EventLog, WalConfig};
