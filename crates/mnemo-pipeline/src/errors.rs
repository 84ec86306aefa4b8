//! Pipeline errors: one variant per stage, each wrapping that stage's error.

use thiserror::Error;

/// Errors raised by [`MemoryPipeline`](crate::MemoryPipeline).
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Settings could not be loaded.
    #[error("settings: {0}")]
    Settings(#[from] mnemo_settings::SettingsError),

    /// Event log replay or writer setup failed.
    #[error("event log: {0}")]
    Wal(#[from] mnemo_wal::WalError),

    /// Canonical log store failed.
    #[error("canonical store: {0}")]
    Canon(#[from] mnemo_canon::CanonError),

    /// Artifact store failed.
    #[error("artifact store: {0}")]
    Artifacts(#[from] mnemo_artifacts::ArtifactError),

    /// Index failed.
    #[error("index: {0}")]
    Index(#[from] mnemo_index::IndexError),
}

/// Convenience type alias for pipeline results.
pub type Result<T> = std::result::Result<T, PipelineError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
