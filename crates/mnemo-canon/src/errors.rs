//! Error types for the canonical log store.
//!
//! Canonicalization itself cannot fail; only persisting and loading the
//! resulting documents can.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by [`CanonicalStore`](crate::CanonicalStore).
#[derive(Debug, Error)]
pub enum CanonError {
    /// Filesystem operation failed.
    #[error("{op} {}: {source}", path.display())]
    Io {
        /// Operation that failed.
        op: &'static str,
        /// Path the operation targeted.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A log could not be serialized.
    #[error("encode canonical log: {0}")]
    Encode(#[from] serde_json::Error),

    /// A stored document is malformed, has unknown fields, or trailing data.
    #[error("decode {}: {source}", path.display())]
    Decode {
        /// Offending document.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A stored document has an unsupported schema version.
    #[error("{}: schema version {found}, expected {expected}", path.display())]
    SchemaVersion {
        /// Offending document.
        path: PathBuf,
        /// Version found in the document.
        found: u32,
        /// Version this build reads.
        expected: u32,
    },
}

impl CanonError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { op, path, source }
    }
}

/// Convenience type alias for canonical store results.
pub type Result<T> = std::result::Result<T, CanonError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
