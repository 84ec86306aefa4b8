//! High-level [`Index`] API.
//!
//! Composes the stateless repositories over one serialized connection.
//! Rebuild runs inside a single transaction, so a failure leaves the
//! previous index contents in place.

use std::path::Path;

use chrono::Utc;
use mnemo_artifacts::Artifact;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::errors::{IndexError, Result};
use crate::sqlite::connection::{self, ConnectionConfig};
use crate::sqlite::migrations::{latest_version, run_migrations};
use crate::sqlite::repositories::artifact::{
    ArtifactRepo, IndexStats, META_GENERATION, META_REBUILT_AT, META_SCHEMA_VERSION,
};
use crate::sqlite::repositories::format_time;
use crate::sqlite::repositories::related::{RelatedHit, RelatedRepo};
use crate::sqlite::repositories::search::{RankingConfig, SearchFilters, SearchHit, SearchRepo};

/// Result of a completed rebuild.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildReport {
    /// Artifacts indexed.
    pub artifacts: usize,
    /// Link tuples indexed.
    pub links: usize,
    /// Generation after this rebuild.
    pub generation: u64,
}

/// Embedded artifact index.
pub struct Index {
    conn: Mutex<Connection>,
    ranking: RankingConfig,
}

impl Index {
    /// Open (or create) the index database at `path` and migrate it.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = connection::open_file(path, &ConnectionConfig::default())?;
        let applied = run_migrations(&conn)?;
        debug!(path = %path.display(), applied, "index opened");
        Ok(Self::from_connection(conn))
    }

    /// Open a migrated in-memory index.
    pub fn in_memory() -> Result<Self> {
        let conn = connection::open_in_memory(&ConnectionConfig::default())?;
        let _ = run_migrations(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            ranking: RankingConfig::default(),
        }
    }

    /// Replace the ranking parameters.
    #[must_use]
    pub fn with_ranking(mut self, ranking: RankingConfig) -> Self {
        self.ranking = ranking;
        self
    }

    /// Ranking parameters in use.
    pub fn ranking(&self) -> &RankingConfig {
        &self.ranking
    }

    /// Replace the indexed corpus with `artifacts`.
    ///
    /// Atomic: clearing, reinsertion, the full-text rebuild, and the
    /// metadata bump all commit together or not at all.
    pub fn rebuild(&self, artifacts: &[Artifact]) -> Result<RebuildReport> {
        let conn = self.conn.lock();
        let tx = conn
            .unchecked_transaction()
            .map_err(IndexError::sqlite("rebuild"))?;

        // 1. Drop every row
        ArtifactRepo::clear(&tx)?;

        // 2. Reinsert artifacts and their link tuples
        let mut links = 0;
        for artifact in artifacts {
            links += ArtifactRepo::insert(&tx, artifact)?;
        }

        // 3. Full-text table follows the content table
        ArtifactRepo::rebuild_fts(&tx)?;

        // 4. Metadata
        let generation = ArtifactRepo::get_meta(&tx, META_GENERATION)?
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        ArtifactRepo::set_meta(&tx, META_GENERATION, &generation.to_string())?;
        ArtifactRepo::set_meta(&tx, META_SCHEMA_VERSION, &latest_version().to_string())?;
        ArtifactRepo::set_meta(&tx, META_REBUILT_AT, &format_time(Utc::now()))?;

        tx.commit().map_err(IndexError::sqlite("rebuild"))?;
        info!(artifacts = artifacts.len(), links, generation, "index rebuilt");
        Ok(RebuildReport {
            artifacts: artifacts.len(),
            links,
            generation,
        })
    }

    /// Ranked full-text search.
    pub fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SearchHit>> {
        let conn = self.conn.lock();
        SearchRepo::search(&conn, query, filters, limit, offset, &self.ranking, Utc::now())
    }

    /// Full artifact by ID.
    pub fn get(&self, id: &str) -> Result<Option<Artifact>> {
        let conn = self.conn.lock();
        ArtifactRepo::get(&conn, id)
    }

    /// Artifacts sharing link tuples with `id`, best first.
    pub fn related(&self, id: &str, limit: usize) -> Result<Vec<RelatedHit>> {
        let conn = self.conn.lock();
        RelatedRepo::related(&conn, id, limit)
    }

    /// Row counts and rebuild metadata.
    pub fn stats(&self) -> Result<IndexStats> {
        let conn = self.conn.lock();
        ArtifactRepo::stats(&conn)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{DateTime, Duration};
    use mnemo_artifacts::{ArtifactContent, ArtifactType};

    fn artifact(
        id: &str,
        artifact_type: ArtifactType,
        scope: (&str, &str, &str),
        text: &str,
        created_at: Option<DateTime<Utc>>,
    ) -> Artifact {
        Artifact {
            id: id.into(),
            artifact_type,
            session_id: scope.0.into(),
            task_id: scope.1.into(),
            run_id: scope.2.into(),
            created_at,
            content: ArtifactContent {
                text: text.into(),
                ..ArtifactContent::default()
            },
            provenance: Vec::new(),
            supersedes: Vec::new(),
            superseded_by: Vec::new(),
        }
    }

    fn decision(id: &str, text: &str) -> Artifact {
        artifact(id, ArtifactType::Decision, ("s1", "t1", "r1"), text, None)
    }

    fn ids(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.id.as_str()).collect()
    }

    #[test]
    fn empty_index_searches_empty() {
        let index = Index::in_memory().unwrap();
        let hits = index.search("sqlite", &SearchFilters::default(), 10, 0).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn query_without_words_returns_nothing() {
        let index = Index::in_memory().unwrap();
        let _ = index.rebuild(&[decision("dec_a", "use sqlite")]).unwrap();
        let hits = index.search(" -- ", &SearchFilters::default(), 10, 0).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn recent_artifact_outranks_older_at_equal_text() {
        let now = Utc::now();
        let index = Index::in_memory().unwrap();
        let old = artifact(
            "dec_old",
            ArtifactType::Decision,
            ("s1", "t1", "r1"),
            "store artifacts in sqlite",
            Some(now - Duration::days(30)),
        );
        let new = artifact(
            "dec_new",
            ArtifactType::Decision,
            ("s1", "t1", "r2"),
            "store artifacts in sqlite",
            Some(now - Duration::days(1)),
        );
        let _ = index.rebuild(&[old, new]).unwrap();

        let hits = index.search("sqlite", &SearchFilters::default(), 10, 0).unwrap();
        assert_eq!(ids(&hits), vec!["dec_new", "dec_old"]);
        assert!(hits[0].score > hits[1].score);
        assert!(hits[0].text_score.abs() < 1e-9);
    }

    #[test]
    fn decision_outranks_transcript_at_equal_text() {
        let at = Some(Utc::now());
        let index = Index::in_memory().unwrap();
        let _ = index
            .rebuild(&[
                artifact("trn_a", ArtifactType::Transcript, ("s1", "t1", "r1"), "migrate to postgres", at),
                artifact("dec_a", ArtifactType::Decision, ("s1", "t1", "r1"), "migrate to postgres", at),
            ])
            .unwrap();
        let hits = index.search("postgres", &SearchFilters::default(), 10, 0).unwrap();
        assert_eq!(ids(&hits), vec!["dec_a", "trn_a"]);
    }

    #[test]
    fn snippet_marks_matched_terms() {
        let index = Index::in_memory().unwrap();
        let _ = index.rebuild(&[decision("dec_a", "use sqlite for the index")]).unwrap();
        let hits = index.search("sqlite", &SearchFilters::default(), 10, 0).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].snippet.contains("[sqlite]"), "{}", hits[0].snippet);
    }

    #[test]
    fn stemming_matches_inflections() {
        let index = Index::in_memory().unwrap();
        let _ = index.rebuild(&[decision("dec_a", "caching responses locally")]).unwrap();
        let hits = index.search("cached response", &SearchFilters::default(), 10, 0).unwrap();
        assert_eq!(ids(&hits), vec!["dec_a"]);
    }

    #[test]
    fn filters_restrict_scope_and_type() {
        let index = Index::in_memory().unwrap();
        let _ = index
            .rebuild(&[
                artifact("dec_1", ArtifactType::Decision, ("s1", "t1", "r1"), "cache layer", None),
                artifact("con_1", ArtifactType::Constraint, ("s1", "t2", "r2"), "cache layer", None),
                artifact("dec_2", ArtifactType::Decision, ("s2", "t3", "r3"), "cache layer", None),
            ])
            .unwrap();

        let by_session = SearchFilters {
            session_id: Some("s1".into()),
            ..SearchFilters::default()
        };
        let mut got = ids(&index.search("cache", &by_session, 10, 0).unwrap())
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        got.sort();
        assert_eq!(got, vec!["con_1", "dec_1"]);

        let by_type = SearchFilters {
            types: vec![ArtifactType::Constraint],
            ..SearchFilters::default()
        };
        assert_eq!(ids(&index.search("cache", &by_type, 10, 0).unwrap()), vec!["con_1"]);

        let by_run = SearchFilters {
            task_id: Some("t3".into()),
            run_id: Some("r3".into()),
            ..SearchFilters::default()
        };
        assert_eq!(ids(&index.search("cache", &by_run, 10, 0).unwrap()), vec!["dec_2"]);
    }

    #[test]
    fn current_only_excludes_superseded() {
        let index = Index::in_memory().unwrap();
        let mut old = decision("dec_old", "database is sqlite");
        let mut new = decision("dec_new", "database is postgres");
        old.superseded_by.push(new.id.clone());
        new.supersedes.push(old.id.clone());
        let _ = index.rebuild(&[old, new]).unwrap();

        let all = index.search("database", &SearchFilters::default(), 10, 0).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|h| h.superseded));

        let current = SearchFilters {
            current_only: true,
            ..SearchFilters::default()
        };
        assert_eq!(ids(&index.search("database", &current, 10, 0).unwrap()), vec!["dec_new"]);
    }

    #[test]
    fn offset_and_limit_page_results() {
        let index = Index::in_memory().unwrap();
        let artifacts: Vec<_> = (0..5)
            .map(|i| decision(&format!("dec_{i}"), "retry budget"))
            .collect();
        let _ = index.rebuild(&artifacts).unwrap();
        let first = index.search("retry", &SearchFilters::default(), 2, 0).unwrap();
        let second = index.search("retry", &SearchFilters::default(), 2, 2).unwrap();
        assert_eq!(ids(&first), vec!["dec_0", "dec_1"]);
        assert_eq!(ids(&second), vec!["dec_2", "dec_3"]);
    }

    #[test]
    fn get_returns_full_artifact() {
        let index = Index::in_memory().unwrap();
        let original = decision("dec_a", "use sqlite");
        let _ = index.rebuild(std::slice::from_ref(&original)).unwrap();
        assert_eq!(index.get("dec_a").unwrap(), Some(original));
        assert_eq!(index.get("dec_missing").unwrap(), None);
    }

    #[test]
    fn related_prefers_shared_run_and_task() {
        let index = Index::in_memory().unwrap();
        let _ = index
            .rebuild(&[
                artifact("seed", ArtifactType::Decision, ("s1", "t1", "r1"), "seed", None),
                artifact("same_run", ArtifactType::Outcome, ("s1", "t1", "r1"), "run", None),
                artifact("same_session", ArtifactType::Decision, ("s1", "t2", "r2"), "session", None),
                artifact("unrelated", ArtifactType::Decision, ("s2", "t3", "r3"), "other", None),
            ])
            .unwrap();
        let hits = index.related("seed", 10).unwrap();
        let got: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(got, vec!["same_run", "same_session"]);
        assert!(hits[0].shares_run && hits[0].shares_task);
        assert!((hits[0].score - 6.0).abs() < 1e-9);
        assert!((hits[1].score - 1.0).abs() < 1e-9);

        assert_eq!(index.related("seed", 1).unwrap().len(), 1);
        assert!(index.related("missing", 10).unwrap().is_empty());
    }

    #[test]
    fn failed_rebuild_keeps_previous_index() {
        let index = Index::in_memory().unwrap();
        let _ = index.rebuild(&[decision("dec_a", "use sqlite")]).unwrap();

        let dup = decision("dec_b", "use postgres");
        let result = index.rebuild(&[dup.clone(), dup]);
        assert_matches!(result, Err(IndexError::Sqlite { op: "rebuild", .. }));

        assert!(index.get("dec_a").unwrap().is_some());
        assert!(index.get("dec_b").unwrap().is_none());
        let hits = index.search("sqlite", &SearchFilters::default(), 10, 0).unwrap();
        assert_eq!(ids(&hits), vec!["dec_a"]);
        assert_eq!(index.stats().unwrap().generation, 1);
    }

    #[test]
    fn rebuild_bumps_generation_and_replaces_rows() {
        let index = Index::in_memory().unwrap();
        let first = index.rebuild(&[decision("dec_a", "use sqlite")]).unwrap();
        assert_eq!(first.generation, 1);
        let second = index
            .rebuild(&[
                decision("dec_b", "use postgres"),
                artifact("trn_b", ArtifactType::Transcript, ("s1", "t1", "r1"), "hello", None),
            ])
            .unwrap();
        assert_eq!(second.generation, 2);
        assert_eq!(second.artifacts, 2);

        let stats = index.stats().unwrap();
        assert_eq!(stats.artifacts, 2);
        assert_eq!(stats.generation, 2);
        assert_eq!(stats.schema_version, latest_version());
        assert_eq!(stats.by_type.get("decision"), Some(&1));
        assert_eq!(stats.by_type.get("transcript"), Some(&1));
        assert!(stats.rebuilt_at.is_some());
        assert_eq!(stats.links, second.links);

        assert!(index.search("sqlite", &SearchFilters::default(), 10, 0).unwrap().is_empty());
    }

    #[test]
    fn file_backed_index_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index/memory.db");
        {
            let index = Index::open(&path).unwrap();
            let _ = index.rebuild(&[decision("dec_a", "use sqlite")]).unwrap();
        }
        let index = Index::open(&path).unwrap();
        let hits = index.search("sqlite", &SearchFilters::default(), 10, 0).unwrap();
        assert_eq!(ids(&hits), vec!["dec_a"]);
        assert_eq!(index.stats().unwrap().generation, 1);
    }
}
