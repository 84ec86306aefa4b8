//! Search repository: FTS5 candidate fetch plus in-memory re-ranking.
//!
//! The text engine returns a candidate window ordered by BM25. Each
//! candidate is then re-scored as
//! `1 / (1 + textScore) × typeWeight × 0.5^(ageDays / halfLifeDays)`,
//! where `textScore` is the candidate's BM25 distance from the best match
//! in the window. Results sort by score, then recency, then ID.

use std::cmp::Ordering;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use mnemo_artifacts::ArtifactType;
use mnemo_settings::{IndexSettings, TypeWeights};
use rusqlite::Connection;
use rusqlite::types::ToSql;
use serde::Serialize;
use tracing::debug;

use super::parse_time;
use crate::errors::{IndexError, Result};

const OP: &str = "search";

/// Snippet markers around matched terms.
pub const SNIPPET_OPEN: &str = "[";
/// Closing snippet marker.
pub const SNIPPET_CLOSE: &str = "]";
const SNIPPET_ELLIPSIS: &str = "…";
const SNIPPET_TOKENS: i32 = 16;

/// Ranking parameters.
#[derive(Clone, Debug)]
pub struct RankingConfig {
    /// Recency half-life in days; zero or negative disables decay.
    pub half_life_days: f64,
    /// Per-type multipliers.
    pub type_weights: TypeWeights,
    /// Candidate window multiplier over `limit + offset`.
    pub candidate_factor: usize,
    /// Lower clamp of the candidate window.
    pub candidate_min: usize,
    /// Upper clamp of the candidate window.
    pub candidate_max: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self::from(&IndexSettings::default())
    }
}

impl From<&IndexSettings> for RankingConfig {
    fn from(settings: &IndexSettings) -> Self {
        Self {
            half_life_days: settings.half_life_days,
            type_weights: settings.type_weights.clone(),
            candidate_factor: settings.candidate_factor,
            candidate_min: settings.candidate_min,
            candidate_max: settings.candidate_max,
        }
    }
}

impl RankingConfig {
    /// Multiplier for an artifact type.
    pub fn type_weight(&self, artifact_type: ArtifactType) -> f64 {
        let w = &self.type_weights;
        match artifact_type {
            ArtifactType::Decision => w.decision,
            ArtifactType::Outcome => w.outcome,
            ArtifactType::Constraint => w.constraint,
            ArtifactType::OpenThread => w.open_thread,
            ArtifactType::Transcript => w.transcript,
        }
    }

    /// Number of text-engine candidates fetched for a page.
    pub fn candidate_window(&self, limit: usize, offset: usize) -> usize {
        let min = self.candidate_min.min(self.candidate_max);
        limit
            .saturating_add(offset)
            .saturating_mul(self.candidate_factor)
            .clamp(min, self.candidate_max)
    }

    /// `0.5^(age / half-life)`; 1.0 when decay is disabled or the age is
    /// unknown. Future timestamps count as age zero.
    pub fn recency_factor(&self, created_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
        let Some(created_at) = created_at else {
            return 1.0;
        };
        if self.half_life_days <= 0.0 {
            return 1.0;
        }
        let age_days = (now - created_at).num_milliseconds().max(0) as f64 / 86_400_000.0;
        0.5_f64.powf(age_days / self.half_life_days)
    }
}

/// Search filters. Empty fields do not filter.
#[derive(Clone, Debug, Default)]
pub struct SearchFilters {
    /// Only this session.
    pub session_id: Option<String>,
    /// Only this task.
    pub task_id: Option<String>,
    /// Only this run.
    pub run_id: Option<String>,
    /// Only these types.
    pub types: Vec<ArtifactType>,
    /// Exclude superseded artifacts.
    pub current_only: bool,
}

/// A ranked search result.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    /// Artifact ID.
    pub id: String,
    /// Artifact type.
    pub artifact_type: ArtifactType,
    /// Session.
    pub session_id: String,
    /// Task.
    pub task_id: String,
    /// Run.
    pub run_id: String,
    /// Recency timestamp, if known.
    pub created_at: Option<DateTime<Utc>>,
    /// Whether a later artifact supersedes this one.
    pub superseded: bool,
    /// Matched text with `[`/`]` markers.
    pub snippet: String,
    /// BM25 distance from the best candidate (0 for the best).
    pub text_score: f64,
    /// Final score.
    pub score: f64,
}

/// Build an FTS5 query: every word quoted and OR-joined, so user input can
/// never be parsed as FTS syntax. `None` when the query has no words.
pub fn fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    (!terms.is_empty()).then(|| terms.join(" OR "))
}

struct Candidate {
    hit: SearchHit,
    bm25: f64,
}

/// Search repository.
pub struct SearchRepo;

impl SearchRepo {
    /// Ranked full-text search.
    pub fn search(
        conn: &Connection,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
        offset: usize,
        config: &RankingConfig,
        now: DateTime<Utc>,
    ) -> Result<Vec<SearchHit>> {
        let Some(fts) = fts_query(query) else {
            return Ok(Vec::new());
        };
        if limit == 0 {
            return Ok(Vec::new());
        }
        let window = config.candidate_window(limit, offset);

        let mut sql = format!(
            "SELECT a.id, a.type, a.session_id, a.task_id, a.run_id, a.created_at, a.superseded,
                    snippet(artifacts_fts, 0, '{SNIPPET_OPEN}', '{SNIPPET_CLOSE}', '{SNIPPET_ELLIPSIS}', {SNIPPET_TOKENS}),
                    bm25(artifacts_fts) AS rank
             FROM artifacts_fts
             JOIN artifacts a ON a.rowid = artifacts_fts.rowid
             WHERE artifacts_fts MATCH ?1"
        );
        let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(fts)];
        for (column, value) in [
            ("session_id", &filters.session_id),
            ("task_id", &filters.task_id),
            ("run_id", &filters.run_id),
        ] {
            if let Some(value) = value {
                let _ = write!(sql, " AND a.{column} = ?{}", values.len() + 1);
                values.push(Box::new(value.clone()));
            }
        }
        if !filters.types.is_empty() {
            let placeholders: Vec<String> = (0..filters.types.len())
                .map(|i| format!("?{}", values.len() + i + 1))
                .collect();
            let _ = write!(sql, " AND a.type IN ({})", placeholders.join(", "));
            for t in &filters.types {
                values.push(Box::new(t.as_str()));
            }
        }
        if filters.current_only {
            sql.push_str(" AND a.superseded = 0");
        }
        let _ = write!(sql, " ORDER BY rank, a.id LIMIT {window}");

        let mut stmt = conn.prepare(&sql).map_err(IndexError::sqlite(OP))?;
        let refs: Vec<&dyn ToSql> = values.iter().map(Box::as_ref).collect();
        let rows = stmt
            .query_map(refs.as_slice(), |row| {
                let kind: String = row.get(1)?;
                let created_at: Option<String> = row.get(5)?;
                Ok((
                    kind,
                    Candidate {
                        hit: SearchHit {
                            id: row.get(0)?,
                            artifact_type: ArtifactType::Transcript,
                            session_id: row.get(2)?,
                            task_id: row.get(3)?,
                            run_id: row.get(4)?,
                            created_at: created_at.as_deref().and_then(parse_time),
                            superseded: row.get(6)?,
                            snippet: row.get(7)?,
                            text_score: 0.0,
                            score: 0.0,
                        },
                        bm25: row.get(8)?,
                    },
                ))
            })
            .map_err(IndexError::sqlite(OP))?;

        let mut candidates = Vec::new();
        for row in rows {
            let (kind, mut candidate) = row.map_err(IndexError::sqlite(OP))?;
            let Ok(artifact_type) = kind.parse::<ArtifactType>() else {
                debug!(id = %candidate.hit.id, kind, "skipping row with unknown type");
                continue;
            };
            candidate.hit.artifact_type = artifact_type;
            candidates.push(candidate);
        }

        let best = candidates
            .iter()
            .map(|c| c.bm25)
            .fold(f64::INFINITY, f64::min);
        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .map(|Candidate { mut hit, bm25 }| {
                hit.text_score = (bm25 - best).max(0.0);
                hit.score = (1.0 / (1.0 + hit.text_score))
                    * config.type_weight(hit.artifact_type)
                    * config.recency_factor(hit.created_at, now);
                hit
            })
            .collect();
        hits.sort_by(compare_hits);

        debug!(query, window, candidates = hits.len(), limit, offset, "search ranked");
        Ok(hits.into_iter().skip(offset).take(limit).collect())
    }
}

/// Score descending, then recency descending (unknown last), then ID.
fn compare_hits(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| match (a.created_at, b.created_at) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.id.cmp(&b.id))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn fts_query_quotes_words() {
        assert_eq!(fts_query("sqlite OR -x").as_deref(), Some("\"sqlite\" OR \"OR\" OR \"x\""));
        assert_eq!(fts_query("  ***  "), None);
    }

    #[test]
    fn candidate_window_is_clamped() {
        let config = RankingConfig::default();
        assert_eq!(config.candidate_window(5, 0), 50);
        assert_eq!(config.candidate_window(20, 10), 120);
        assert_eq!(config.candidate_window(1000, 0), 500);
        assert_eq!(config.candidate_window(usize::MAX, 1), 500);
    }

    #[test]
    fn recency_factor_halves_per_half_life() {
        let config = RankingConfig::default();
        let now = Utc::now();
        let factor = config.recency_factor(Some(now - Duration::days(14)), now);
        assert!((factor - 0.5).abs() < 1e-9);
        assert!((config.recency_factor(None, now) - 1.0).abs() < f64::EPSILON);
        assert!((config.recency_factor(Some(now + Duration::days(3)), now) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_half_life_disables_decay() {
        let config = RankingConfig {
            half_life_days: 0.0,
            ..RankingConfig::default()
        };
        let now = Utc::now();
        assert!((config.recency_factor(Some(now - Duration::days(400)), now) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ties_break_on_recency_then_id() {
        let now = Utc::now();
        let hit = |id: &str, created_at| SearchHit {
            id: id.into(),
            artifact_type: ArtifactType::Decision,
            session_id: String::new(),
            task_id: String::new(),
            run_id: String::new(),
            created_at,
            superseded: false,
            snippet: String::new(),
            text_score: 0.0,
            score: 1.0,
        };
        let mut hits = vec![
            hit("c", None),
            hit("b", Some(now - Duration::days(1))),
            hit("a", None),
            hit("d", Some(now)),
        ];
        hits.sort_by(compare_hits);
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "b", "a", "c"]);
    }
}
