//! Settings types.
//!
//! Every struct uses `#[serde(rename_all = "camelCase", default)]` so a
//! partial JSON file deserializes with compiled defaults filling the gaps.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MnemoSettings {
    /// Event log settings.
    pub wal: WalSettings,
    /// Retrieval index settings.
    pub index: IndexSettings,
    /// Context pack budgets.
    pub pack: PackSettings,
}

impl MnemoSettings {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.wal.file_name.is_empty() {
            return Err(SettingsError::invalid("wal.fileName", "must not be empty"));
        }
        if let Some(bad) = self
            .wal
            .redact_value_patterns
            .iter()
            .find(|p| regex::Regex::new(p).is_err())
        {
            return Err(SettingsError::invalid(
                "wal.redactValuePatterns",
                format!("invalid regex {bad:?}"),
            ));
        }
        let days = self.index.half_life_days;
        if days.is_nan() || days < 0.0 {
            return Err(SettingsError::invalid(
                "index.halfLifeDays",
                format!("must be >= 0, got {days}"),
            ));
        }
        if self.index.candidate_min > self.index.candidate_max {
            return Err(SettingsError::invalid(
                "index.candidateMin",
                format!(
                    "{} exceeds candidateMax {}",
                    self.index.candidate_min, self.index.candidate_max
                ),
            ));
        }
        Ok(())
    }
}

/// Event log (WAL) settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WalSettings {
    /// Directory holding the active and rotated log files.
    pub dir: String,
    /// Active file name; rotated files derive their names from it.
    pub file_name: String,
    /// Rotate before an append would push the active file past this size.
    pub max_bytes: u64,
    /// Rotate once the active file is older than this.
    pub max_age_secs: u64,
    /// Rotated files older than this are pruned after a rotation.
    pub retention_secs: u64,
    /// Fsync after every append.
    pub fsync_each_append: bool,
    /// Drop request/response body chunks instead of writing them.
    pub privacy_mode: bool,
    /// Header names whose values are redacted (case-insensitive).
    pub redact_headers: Vec<String>,
    /// Regex patterns; any header value matching one is redacted.
    pub redact_value_patterns: Vec<String>,
}

impl Default for WalSettings {
    fn default() -> Self {
        Self {
            dir: mnemo_home().join("wal").to_string_lossy().into_owned(),
            file_name: "events.jsonl".to_string(),
            max_bytes: 64 * 1024 * 1024,
            max_age_secs: 86_400,
            retention_secs: 30 * 86_400,
            fsync_each_append: true,
            privacy_mode: false,
            redact_headers: mnemo_core::SENSITIVE_HEADERS
                .iter()
                .map(|h| (*h).to_string())
                .collect(),
            redact_value_patterns: Vec::new(),
        }
    }
}

/// Retrieval index settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IndexSettings {
    /// Path of the SQLite index database.
    pub path: String,
    /// Directory of per-run canonical log documents.
    pub canonical_dir: String,
    /// Path of the artifact store document.
    pub artifacts_path: String,
    /// Recency half-life in days. Zero disables recency decay.
    pub half_life_days: f64,
    /// Per-type score multipliers.
    pub type_weights: TypeWeights,
    /// Candidate window multiplier over `limit + offset`.
    pub candidate_factor: usize,
    /// Lower clamp of the candidate window.
    pub candidate_min: usize,
    /// Upper clamp of the candidate window.
    pub candidate_max: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        let home = mnemo_home();
        Self {
            path: home.join("index.db").to_string_lossy().into_owned(),
            canonical_dir: home.join("canonical").to_string_lossy().into_owned(),
            artifacts_path: home.join("artifacts.json").to_string_lossy().into_owned(),
            half_life_days: 14.0,
            type_weights: TypeWeights::default(),
            candidate_factor: 4,
            candidate_min: 50,
            candidate_max: 500,
        }
    }
}

/// Score multipliers per artifact type.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TypeWeights {
    /// Weight for decisions.
    pub decision: f64,
    /// Weight for outcomes.
    pub outcome: f64,
    /// Weight for constraints.
    pub constraint: f64,
    /// Weight for open threads.
    pub open_thread: f64,
    /// Weight for transcript excerpts.
    pub transcript: f64,
}

impl Default for TypeWeights {
    fn default() -> Self {
        Self {
            decision: 1.4,
            outcome: 1.2,
            constraint: 1.2,
            open_thread: 1.0,
            transcript: 0.6,
        }
    }
}

/// Context pack token budgets.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PackSettings {
    /// Decisions section budget.
    pub decisions: usize,
    /// Constraints section budget.
    pub constraints: usize,
    /// Outcomes section budget.
    pub outcomes: usize,
    /// Open threads section budget.
    pub open_threads: usize,
    /// Recent transcript excerpts budget.
    pub recent: usize,
    /// Artifact pointer section budget.
    pub pointers: usize,
    /// Ceiling across the whole pack, goal and instructions included.
    pub total_tokens: usize,
    /// Append `[id]` tags to section lines.
    pub include_ids: bool,
}

impl Default for PackSettings {
    fn default() -> Self {
        Self {
            decisions: 400,
            constraints: 300,
            outcomes: 300,
            open_threads: 200,
            recent: 300,
            pointers: 100,
            total_tokens: 1500,
            include_ids: true,
        }
    }
}

pub(crate) fn mnemo_home() -> std::path::PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    std::path::PathBuf::from(home).join(".mnemo")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
