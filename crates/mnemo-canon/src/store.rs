//! Canonical log store.
//!
//! One JSON document per run under a directory. Writes are atomic; loads are
//! strict (unknown fields, trailing data and foreign schema versions are
//! errors). [`CanonicalStore::write_all`] replaces the whole set, removing
//! documents for runs no longer present.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use mnemo_core::fsutil::{sync_dir, write_atomic};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::errors::{CanonError, Result};
use crate::types::{CANONICAL_SCHEMA_VERSION, Log};

const EXTENSION: &str = "json";

/// Directory of per-run canonical log documents.
#[derive(Clone, Debug)]
pub struct CanonicalStore {
    dir: PathBuf,
}

impl CanonicalStore {
    /// Open (creating if needed) the store directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(CanonError::io("create dir", &dir))?;
        Ok(Self { dir })
    }

    /// Store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Document path for a run.
    pub fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{}.{EXTENSION}", file_stem(run_id)))
    }

    /// Write one log, replacing any previous document for its run.
    pub fn write(&self, log: &Log) -> Result<()> {
        let path = self.path_for(&log.run_id);
        let bytes = serde_json::to_vec_pretty(log)?;
        write_atomic(&path, &bytes).map_err(CanonError::io("write", &path))?;
        debug!(run_id = %log.run_id, path = %path.display(), "canonical log written");
        Ok(())
    }

    /// Replace the whole store with `logs`.
    pub fn write_all(&self, logs: &[Log]) -> Result<()> {
        let mut keep = BTreeSet::new();
        for log in logs {
            self.write(log)?;
            let _ = keep.insert(self.path_for(&log.run_id));
        }

        let mut removed = 0usize;
        for path in self.document_paths()? {
            if !keep.contains(&path) {
                fs::remove_file(&path).map_err(CanonError::io("remove", &path))?;
                removed += 1;
            }
        }
        if removed > 0 {
            sync_dir(&self.dir).map_err(CanonError::io("fsync dir", &self.dir))?;
        }
        info!(written = logs.len(), removed, "canonical store replaced");
        Ok(())
    }

    /// Load one run's log, `None` if absent.
    pub fn load(&self, run_id: &str) -> Result<Option<Log>> {
        let path = self.path_for(run_id);
        if !path.exists() {
            return Ok(None);
        }
        load_document(&path).map(Some)
    }

    /// Load every stored log, ordered by run ID.
    pub fn load_all(&self) -> Result<Vec<Log>> {
        let mut logs = self
            .document_paths()?
            .iter()
            .map(|p| load_document(p))
            .collect::<Result<Vec<_>>>()?;
        logs.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        Ok(logs)
    }

    /// Run IDs of every stored log, sorted.
    pub fn run_ids(&self) -> Result<Vec<String>> {
        Ok(self.load_all()?.into_iter().map(|l| l.run_id).collect())
    }

    fn document_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(CanonError::io("list", &self.dir))? {
            let path = entry.map_err(CanonError::io("list", &self.dir))?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(EXTENSION) && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

/// Strictly decode one document.
fn load_document(path: &Path) -> Result<Log> {
    let bytes = fs::read(path).map_err(CanonError::io("read", path))?;
    let decode = |source| CanonError::Decode {
        path: path.to_path_buf(),
        source,
    };
    let mut de = serde_json::Deserializer::from_slice(&bytes);
    let log = Log::deserialize(&mut de).map_err(decode)?;
    de.end().map_err(decode)?;
    if log.schema_version != CANONICAL_SCHEMA_VERSION {
        return Err(CanonError::SchemaVersion {
            path: path.to_path_buf(),
            found: log.schema_version,
            expected: CANONICAL_SCHEMA_VERSION,
        });
    }
    Ok(log)
}

/// Filesystem-safe stem for a run ID. IDs that need escaping get a hash
/// suffix so distinct IDs never collide.
fn file_stem(run_id: &str) -> String {
    let safe: String = run_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    if safe == run_id && !run_id.is_empty() && !run_id.starts_with('.') {
        return safe;
    }
    let hex = format!("{:x}", Sha256::digest(run_id.as_bytes()));
    format!("{safe}-{}", &hex[..12])
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
