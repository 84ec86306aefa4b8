//! Error types for the event log.
//!
//! Every I/O failure carries the operation and path that failed; nothing on
//! the append or replay path is swallowed.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the event log writer and reader.
#[derive(Debug, Error)]
pub enum WalError {
    /// Filesystem operation failed.
    #[error("{op} {}: {source}", path.display())]
    Io {
        /// Operation that failed (`open`, `write`, `fsync`, `rename`, ...).
        op: &'static str,
        /// Path the operation targeted.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An event could not be serialized.
    #[error("encode event: {0}")]
    Encode(#[from] serde_json::Error),

    /// A log line could not be decoded during replay.
    #[error("decode {}:{line}: {source}", path.display())]
    Decode {
        /// File holding the malformed line.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A redaction value pattern failed to compile.
    #[error("invalid redaction pattern {pattern:?}: {source}")]
    Pattern {
        /// The offending pattern.
        pattern: String,
        /// Regex compile error.
        #[source]
        source: regex::Error,
    },

    /// Append or rotate was called after [`close`](crate::EventLog::close).
    #[error("event log is closed")]
    Closed,
}

impl WalError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { op, path, source }
    }
}

/// Convenience type alias for event log results.
pub type Result<T> = std::result::Result<T, WalError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
