//! Synchronous batch pipeline.
//!
//! One [`MemoryPipeline::run`] replays the event log, refreshes the
//! canonical logs, mines and merges artifacts, saves the artifact store,
//! and rebuilds the index. Every stage is idempotent, so re-running over
//! the same log leaves the stores unchanged.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mnemo_artifacts::{
    Artifact, ArtifactStore, extract_artifacts, merge_artifacts, reanchor_provenance,
};
use mnemo_canon::{CanonicalStore, canonicalize_replayed};
use mnemo_core::lookup::RunTimeLookup;
use mnemo_index::{Index, RankingConfig, RebuildReport};
use mnemo_pack::{Budget, ContextPack, PackRequest, build_context_pack};
use mnemo_settings::{MnemoSettings, WalSettings, load_settings};
use mnemo_wal::{EventLog, HeaderRedactor, WalConfig, WalReader};
use serde::Serialize;
use tracing::{debug, info};

use crate::errors::Result;

/// Where each stage keeps its data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelinePaths {
    /// Event log directory.
    pub wal_dir: PathBuf,
    /// Active event log file name.
    pub wal_file_name: String,
    /// Canonical log directory.
    pub canonical_dir: PathBuf,
    /// Artifact store document.
    pub artifacts_path: PathBuf,
    /// Index database.
    pub index_path: PathBuf,
}

impl PipelinePaths {
    /// Conventional layout under one root directory.
    pub fn under(root: &Path) -> Self {
        Self {
            wal_dir: root.join("wal"),
            wal_file_name: "events.jsonl".to_string(),
            canonical_dir: root.join("canonical"),
            artifacts_path: root.join("artifacts.json"),
            index_path: root.join("index.db"),
        }
    }
}

impl From<&MnemoSettings> for PipelinePaths {
    fn from(settings: &MnemoSettings) -> Self {
        Self {
            wal_dir: PathBuf::from(&settings.wal.dir),
            wal_file_name: settings.wal.file_name.clone(),
            canonical_dir: PathBuf::from(&settings.index.canonical_dir),
            artifacts_path: PathBuf::from(&settings.index.artifacts_path),
            index_path: PathBuf::from(&settings.index.path),
        }
    }
}

/// Counts from one pipeline run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    /// Events replayed from the log.
    pub events: usize,
    /// Canonical logs reconstructed from this replay.
    pub logs: usize,
    /// Artifacts extracted from those logs.
    pub extracted: usize,
    /// Artifacts in the store after merging.
    pub artifacts: usize,
    /// Index rebuild result.
    pub index: RebuildReport,
}

/// The memory pipeline over one set of paths.
#[derive(Clone, Debug)]
pub struct MemoryPipeline {
    paths: PipelinePaths,
    ranking: RankingConfig,
    budget: Budget,
}

impl MemoryPipeline {
    /// Pipeline with default ranking and budgets.
    pub fn new(paths: PipelinePaths) -> Self {
        Self {
            paths,
            ranking: RankingConfig::default(),
            budget: Budget::default(),
        }
    }

    /// Pipeline with paths, ranking, and budgets from settings.
    pub fn from_settings(settings: &MnemoSettings) -> Self {
        Self {
            paths: PipelinePaths::from(settings),
            ranking: RankingConfig::from(&settings.index),
            budget: Budget::from(&settings.pack),
        }
    }

    /// Pipeline configured from a settings file layered over defaults and
    /// `MNEMO_*` environment overrides. A missing file means defaults.
    pub fn from_settings_file(path: &Path) -> Result<Self> {
        let settings = load_settings(path)?;
        debug!(path = %path.display(), "pipeline configured from settings");
        Ok(Self::from_settings(&settings))
    }

    /// Stage paths.
    pub fn paths(&self) -> &PipelinePaths {
        &self.paths
    }

    /// Default pack budgets.
    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    /// Replay, canonicalize, extract, merge, save, and rebuild the index.
    ///
    /// The canonical store is replaced wholesale by this replay. Artifacts
    /// from runs whose event log files have aged out stay in the artifact
    /// store, since merging never drops entries, but their traces are
    /// cleared: every stored trace points into the current replay.
    /// Artifacts without `createdAt` are stamped from `lookup`.
    pub fn run(&self, lookup: &dyn RunTimeLookup) -> Result<PipelineReport> {
        // 1. Replay
        let events = if self.paths.wal_dir.is_dir() {
            WalReader::new(&self.paths.wal_dir, &self.paths.wal_file_name).replay()?
        } else {
            debug!(dir = %self.paths.wal_dir.display(), "no event log directory");
            Vec::new()
        };

        // 2. Canonicalize and snapshot
        let logs = canonicalize_replayed(&events);
        CanonicalStore::open(&self.paths.canonical_dir)?.write_all(&logs)?;

        // 3. Extract
        let mut incoming: Vec<Artifact> = logs.iter().flat_map(extract_artifacts).collect();
        for artifact in &mut incoming {
            if artifact.created_at.is_none() {
                artifact.created_at = lookup.run_time(&artifact.task_id, &artifact.run_id);
            }
        }

        // 4. Merge into the store
        let store = ArtifactStore::open(&self.paths.artifacts_path)?;
        let mut existing = store.load()?;
        let replayed: HashSet<&str> = logs.iter().map(|log| log.run_id.as_str()).collect();
        let _ = reanchor_provenance(&mut existing, &replayed);
        let merged = merge_artifacts(&existing, &incoming);
        store.save(&merged)?;

        // 5. Rebuild the index
        let index = self.open_index()?.rebuild(&merged)?;

        let report = PipelineReport {
            events: events.len(),
            logs: logs.len(),
            extracted: incoming.len(),
            artifacts: merged.len(),
            index,
        };
        info!(
            events = report.events,
            logs = report.logs,
            extracted = report.extracted,
            artifacts = report.artifacts,
            "pipeline run complete"
        );
        Ok(report)
    }

    /// Build a context pack from the artifact store.
    pub fn context_pack(
        &self,
        goal: &str,
        instructions: &str,
        budget: &Budget,
        lookup: &dyn RunTimeLookup,
    ) -> Result<ContextPack> {
        let artifacts = ArtifactStore::open(&self.paths.artifacts_path)?.load()?;
        Ok(build_context_pack(&PackRequest {
            goal,
            instructions,
            artifacts: &artifacts,
            budget,
            lookup,
        }))
    }

    /// Open the index with this pipeline's ranking.
    pub fn open_index(&self) -> Result<Index> {
        Ok(Index::open(&self.paths.index_path)?.with_ranking(self.ranking.clone()))
    }
}

/// Writer configuration from settings.
pub fn wal_config(settings: &WalSettings) -> WalConfig {
    WalConfig {
        dir: PathBuf::from(&settings.dir),
        file_name: settings.file_name.clone(),
        max_bytes: settings.max_bytes,
        max_age: Duration::from_secs(settings.max_age_secs),
        retention: Duration::from_secs(settings.retention_secs),
        fsync_each_append: settings.fsync_each_append,
        privacy_mode: settings.privacy_mode,
    }
}

/// Open the event log the proxy appends to, with the configured redaction.
pub fn open_event_log(settings: &WalSettings) -> Result<EventLog> {
    let redactor = HeaderRedactor::new(&settings.redact_headers, &settings.redact_value_patterns)?;
    Ok(EventLog::open(wal_config(settings), Box::new(redactor))?)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
