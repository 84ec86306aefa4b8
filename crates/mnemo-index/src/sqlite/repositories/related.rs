//! Related-artifact lookup over the link table.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use mnemo_artifacts::ArtifactType;
use rusqlite::{Connection, params};
use serde::Serialize;
use tracing::debug;

use crate::errors::{IndexError, Result};
use crate::links::LinkType;

const OP: &str = "related";
const PREVIEW_CHARS: i64 = 160;

/// A neighbor of the seed artifact.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedHit {
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
    /// Sum of the weights of every shared link tuple.
    pub score: f64,
    /// Shares at least one run with the seed.
    pub shares_run: bool,
    /// Shares the task with the seed.
    pub shares_task: bool,
    /// Leading characters of the searchable text.
    pub preview: String,
}

/// Related-artifact repository.
pub struct RelatedRepo;

impl RelatedRepo {
    /// Artifacts sharing at least one link tuple with `id`, best first.
    /// An unknown seed has no neighbors.
    pub fn related(conn: &Connection, id: &str, limit: usize) -> Result<Vec<RelatedHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut stmt = conn
            .prepare_cached(
                "SELECT n.artifact_id, n.link_type, a.type, a.session_id, a.task_id, a.run_id,
                        substr(a.search_text, 1, ?2)
                 FROM artifact_links s
                 JOIN artifact_links n
                   ON n.link_type = s.link_type AND n.link_value = s.link_value
                 JOIN artifacts a ON a.id = n.artifact_id
                 WHERE s.artifact_id = ?1 AND n.artifact_id <> ?1",
            )
            .map_err(IndexError::sqlite(OP))?;
        let rows = stmt
            .query_map(params![id, PREVIEW_CHARS], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .map_err(IndexError::sqlite(OP))?;

        let mut neighbors: BTreeMap<String, RelatedHit> = BTreeMap::new();
        for row in rows {
            let (neighbor, link, kind, session_id, task_id, run_id, preview) =
                row.map_err(IndexError::sqlite(OP))?;
            let Some(link) = LinkType::parse(&link) else {
                debug!(link, "ignoring unknown link type");
                continue;
            };
            let Ok(artifact_type) = kind.parse::<ArtifactType>() else {
                debug!(id = %neighbor, kind, "ignoring row with unknown type");
                continue;
            };
            let hit = neighbors
                .entry(neighbor.clone())
                .or_insert_with(|| RelatedHit {
                    id: neighbor,
                    artifact_type,
                    session_id,
                    task_id,
                    run_id,
                    score: 0.0,
                    shares_run: false,
                    shares_task: false,
                    preview,
                });
            hit.score += link.weight();
            hit.shares_run |= link == LinkType::Run;
            hit.shares_task |= link == LinkType::Task;
        }

        let mut hits: Vec<RelatedHit> = neighbors.into_values().collect();
        hits.sort_by(compare_related);
        hits.truncate(limit);
        debug!(seed = id, neighbors = hits.len(), "related ranked");
        Ok(hits)
    }
}

/// Shares-run first, then shares-task, then score descending, then ID.
fn compare_related(a: &RelatedHit, b: &RelatedHit) -> Ordering {
    b.shares_run
        .cmp(&a.shares_run)
        .then_with(|| b.shares_task.cmp(&a.shares_task))
        .then_with(|| b.score.total_cmp(&a.score))
        .then_with(|| a.id.cmp(&b.id))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
