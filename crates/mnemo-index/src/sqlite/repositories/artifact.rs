//! Artifact rows, link rows, and index metadata.

use std::collections::BTreeMap;

use mnemo_artifacts::Artifact;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use super::format_time;
use crate::errors::{IndexError, Result};
use crate::links::derive_links;

/// `index_meta` key counting completed rebuilds.
pub const META_GENERATION: &str = "generation";
/// `index_meta` key recording the schema version the rows were built with.
pub const META_SCHEMA_VERSION: &str = "schema_version";
/// `index_meta` key recording when the last rebuild committed.
pub const META_REBUILT_AT: &str = "rebuilt_at";

/// Row counts and metadata.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    /// Artifact rows.
    pub artifacts: usize,
    /// Link rows.
    pub links: usize,
    /// Artifact rows per type.
    pub by_type: BTreeMap<String, usize>,
    /// Superseded artifact rows.
    pub superseded: usize,
    /// Completed rebuilds.
    pub generation: u64,
    /// Schema version recorded by the last rebuild.
    pub schema_version: u32,
    /// When the last rebuild committed (RFC 3339).
    pub rebuilt_at: Option<String>,
}

/// Artifact repository.
pub struct ArtifactRepo;

impl ArtifactRepo {
    /// Remove every artifact and link row.
    pub fn clear(conn: &Connection) -> Result<()> {
        conn.execute_batch("DELETE FROM artifact_links; DELETE FROM artifacts;")
            .map_err(IndexError::sqlite("rebuild"))
    }

    /// Insert one artifact and its links. Returns the number of links.
    pub fn insert(conn: &Connection, artifact: &Artifact) -> Result<usize> {
        let provenance =
            serde_json::to_string(&artifact.provenance).map_err(IndexError::json("rebuild"))?;
        let full = serde_json::to_string(artifact).map_err(IndexError::json("rebuild"))?;
        let _ = conn
            .prepare_cached(
                "INSERT INTO artifacts
                   (id, type, session_id, task_id, run_id, created_at, superseded,
                    search_text, provenance_json, artifact_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )
            .and_then(|mut stmt| {
                stmt.execute(params![
                    artifact.id,
                    artifact.artifact_type.as_str(),
                    artifact.session_id,
                    artifact.task_id,
                    artifact.run_id,
                    artifact.created_at.map(format_time),
                    artifact.is_superseded(),
                    artifact.search_text(),
                    provenance,
                    full,
                ])
            })
            .map_err(IndexError::sqlite("rebuild"))?;

        let links = derive_links(artifact);
        let mut stmt = conn
            .prepare_cached(
                "INSERT INTO artifact_links (artifact_id, link_type, link_value) VALUES (?1, ?2, ?3)",
            )
            .map_err(IndexError::sqlite("rebuild"))?;
        for (kind, value) in &links {
            let _ = stmt
                .execute(params![artifact.id, kind.as_str(), value])
                .map_err(IndexError::sqlite("rebuild"))?;
        }
        Ok(links.len())
    }

    /// Repopulate the external-content full-text table from `artifacts`.
    pub fn rebuild_fts(conn: &Connection) -> Result<()> {
        conn.execute_batch("INSERT INTO artifacts_fts (artifacts_fts) VALUES ('rebuild');")
            .map_err(IndexError::sqlite("rebuild"))
    }

    /// Full artifact by ID.
    pub fn get(conn: &Connection, id: &str) -> Result<Option<Artifact>> {
        let json: Option<String> = conn
            .query_row(
                "SELECT artifact_json FROM artifacts WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(IndexError::sqlite("get"))?;
        json.map(|j| serde_json::from_str(&j).map_err(IndexError::json("get")))
            .transpose()
    }

    /// Read a metadata value.
    pub fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
        conn.query_row(
            "SELECT value FROM index_meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(IndexError::sqlite("stats"))
    }

    /// Write a metadata value.
    pub fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
        let _ = conn
            .execute(
                "INSERT INTO index_meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(IndexError::sqlite("rebuild"))?;
        Ok(())
    }

    /// Row counts and metadata.
    pub fn stats(conn: &Connection) -> Result<IndexStats> {
        let count = |sql: &str| -> Result<usize> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
                .map_err(IndexError::sqlite("stats"))
        };
        let mut stats = IndexStats {
            artifacts: count("SELECT COUNT(*) FROM artifacts")?,
            links: count("SELECT COUNT(*) FROM artifact_links")?,
            superseded: count("SELECT COUNT(*) FROM artifacts WHERE superseded = 1")?,
            ..IndexStats::default()
        };

        let mut stmt = conn
            .prepare("SELECT type, COUNT(*) FROM artifacts GROUP BY type ORDER BY type")
            .map_err(IndexError::sqlite("stats"))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(IndexError::sqlite("stats"))?;
        for row in rows {
            let (kind, n) = row.map_err(IndexError::sqlite("stats"))?;
            let _ = stats.by_type.insert(kind, n as usize);
        }

        stats.generation = Self::get_meta(conn, META_GENERATION)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        stats.schema_version = Self::get_meta(conn, META_SCHEMA_VERSION)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        stats.rebuilt_at = Self::get_meta(conn, META_REBUILT_AT)?;
        Ok(stats)
    }
}
