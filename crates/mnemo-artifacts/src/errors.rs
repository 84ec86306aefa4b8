//! Error types for the artifact store.
//!
//! Extraction and merging are infallible; only persistence can fail.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by [`ArtifactStore`](crate::ArtifactStore).
#[derive(Debug, Error)]
pub enum ArtifactError {
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

    /// The artifact list could not be serialized.
    #[error("encode artifacts: {0}")]
    Encode(#[from] serde_json::Error),

    /// The store document is malformed, has unknown fields, or trailing data.
    #[error("decode {}: {source}", path.display())]
    Decode {
        /// Store document.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The store document has an unsupported schema version.
    #[error("{}: schema version {found}, expected {expected}", path.display())]
    SchemaVersion {
        /// Store document.
        path: PathBuf,
        /// Version found in the document.
        found: u32,
        /// Version this build reads.
        expected: u32,
    },
}

impl ArtifactError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { op, path, source }
    }
}

/// Convenience type alias for artifact store results.
pub type Result<T> = std::result::Result<T, ArtifactError>;
