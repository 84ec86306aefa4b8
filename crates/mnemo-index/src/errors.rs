//! Error types for the artifact index.
//!
//! Every variant names the index operation that failed (`"open"`,
//! `"rebuild"`, `"search"`, `"related"`, `"get"`, `"stats"`).

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by [`Index`](crate::Index).
#[derive(Debug, Error)]
pub enum IndexError {
    /// `SQLite` error.
    #[error("{op}: sqlite error: {source}")]
    Sqlite {
        /// Index operation.
        op: &'static str,
        /// Underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// Artifact JSON could not be encoded or decoded.
    #[error("{op}: serde error: {source}")]
    Json {
        /// Index operation.
        op: &'static str,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// What went wrong.
        message: String,
    },

    /// The index directory could not be prepared.
    #[error("open {}: {source}", path.display())]
    Io {
        /// Database path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl IndexError {
    pub(crate) fn sqlite(op: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Self::Sqlite { op, source }
    }

    pub(crate) fn json(op: &'static str) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| Self::Json { op, source }
    }
}

/// Convenience type alias for index results.
pub type Result<T> = std::result::Result<T, IndexError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_error_names_operation() {
        let err = IndexError::sqlite("search")(rusqlite::Error::QueryReturnedNoRows);
        assert!(err.to_string().starts_with("search: sqlite error"));
    }

    #[test]
    fn migration_display() {
        let err = IndexError::Migration {
            message: "v1 failed".into(),
        };
        assert_eq!(err.to_string(), "migration error: v1 failed");
    }
}
