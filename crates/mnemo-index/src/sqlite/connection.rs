//! `SQLite` connection setup.
//!
//! The index uses one connection per [`Index`](crate::Index), serialized by
//! a mutex. Pragmas run once at open.

use std::path::Path;

use rusqlite::Connection;

use crate::errors::{IndexError, Result};

const OP: &str = "open";

/// Connection tuning.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Busy timeout in milliseconds (default: 30000).
    pub busy_timeout_ms: u32,
    /// Page cache size in KiB (default: 8192 = 8 MB).
    pub cache_size_kib: i64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 30_000,
            cache_size_kib: 8192,
        }
    }
}

/// Open a file-backed connection, creating the parent directory.
pub fn open_file(path: &Path, config: &ConnectionConfig) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    }
    let conn = Connection::open(path).map_err(IndexError::sqlite(OP))?;
    apply_pragmas(&conn, config, true)?;
    Ok(conn)
}

/// Open an in-memory connection.
pub fn open_in_memory(config: &ConnectionConfig) -> Result<Connection> {
    let conn = Connection::open_in_memory().map_err(IndexError::sqlite(OP))?;
    apply_pragmas(&conn, config, false)?;
    Ok(conn)
}

fn apply_pragmas(conn: &Connection, config: &ConnectionConfig, wal: bool) -> Result<()> {
    let journal = if wal { "PRAGMA journal_mode = WAL;" } else { "" };
    conn.execute_batch(&format!(
        "{journal}\
         PRAGMA busy_timeout = {};\
         PRAGMA foreign_keys = ON;\
         PRAGMA cache_size = -{};\
         PRAGMA synchronous = NORMAL;",
        config.busy_timeout_ms, config.cache_size_kib
    ))
    .map_err(IndexError::sqlite(OP))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
