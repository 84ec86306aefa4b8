//! Artifact store.
//!
//! The whole corpus lives in one schema-versioned JSON document, replaced
//! atomically on every save. Loading is strict.

use std::fs;
use std::path::{Path, PathBuf};

use mnemo_core::fsutil::write_atomic;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{ArtifactError, Result};
use crate::types::{ARTIFACT_SCHEMA_VERSION, Artifact};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentRef<'a> {
    schema_version: u32,
    artifacts: &'a [Artifact],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct Document {
    schema_version: u32,
    artifacts: Vec<Artifact>,
}

/// Durable store of every artifact.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    path: PathBuf,
}

impl ArtifactStore {
    /// Open the store at `path`, creating its parent directory.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(ArtifactError::io("create dir", parent))?;
        }
        Ok(Self { path })
    }

    /// Document path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every artifact. A missing document is an empty corpus.
    pub fn load(&self) -> Result<Vec<Artifact>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "artifact store absent, starting empty");
            return Ok(Vec::new());
        }
        let bytes = fs::read(&self.path).map_err(ArtifactError::io("read", &self.path))?;
        let decode = |source| ArtifactError::Decode {
            path: self.path.clone(),
            source,
        };
        let mut de = serde_json::Deserializer::from_slice(&bytes);
        let doc = Document::deserialize(&mut de).map_err(decode)?;
        de.end().map_err(decode)?;
        if doc.schema_version != ARTIFACT_SCHEMA_VERSION {
            return Err(ArtifactError::SchemaVersion {
                path: self.path.clone(),
                found: doc.schema_version,
                expected: ARTIFACT_SCHEMA_VERSION,
            });
        }
        Ok(doc.artifacts)
    }

    /// Replace the stored corpus with `artifacts`.
    pub fn save(&self, artifacts: &[Artifact]) -> Result<()> {
        let doc = DocumentRef {
            schema_version: ARTIFACT_SCHEMA_VERSION,
            artifacts,
        };
        let bytes = serde_json::to_vec_pretty(&doc)?;
        write_atomic(&self.path, &bytes).map_err(ArtifactError::io("write", &self.path))?;
        info!(path = %self.path.display(), count = artifacts.len(), "artifact store saved");
        Ok(())
    }
}

/// Artifacts no later artifact supersedes, in corpus order.
pub fn current(artifacts: &[Artifact]) -> Vec<&Artifact> {
    artifacts.iter().filter(|a| !a.is_superseded()).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
