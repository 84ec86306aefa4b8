//! Artifact merge engine.
//!
//! Folds incoming artifacts into an existing corpus. Pure and
//! order-preserving: existing artifacts keep their positions, new ones are
//! appended in incoming order.
//!
//! - Same ID: provenance union, no new row.
//! - Decision or constraint with the same normalized statement (plus scope
//!   for constraints): provenance union into the earlier artifact.
//! - Decision or constraint sharing only the two-word topic key: appended,
//!   with a directional supersession link to the prior artifact.
//! - Everything else appends.

use std::collections::{HashMap, HashSet};

use mnemo_core::text::normalize_statement;
use tracing::debug;

use crate::types::{Artifact, ArtifactType};

/// Words skipped when deriving a topic key.
const TOPIC_STOPWORDS: &[&str] = &[
    "a", "an", "the", "we", "i", "to", "will", "should", "shall", "decided", "decide", "lets",
    "let", "s", "ok",
];

type Keyed = (ArtifactType, String);

/// Normalized-statement dedup key for decisions and constraints.
pub fn dedup_key(artifact: &Artifact) -> Option<String> {
    let statement = normalize_statement(&artifact.content.text);
    if statement.is_empty() {
        return None;
    }
    match artifact.artifact_type {
        ArtifactType::Decision => Some(statement),
        ArtifactType::Constraint => Some(format!(
            "{statement}\u{1f}{}",
            artifact.content.scope.as_deref().unwrap_or_default()
        )),
        _ => None,
    }
}

/// Coarse topic: the first two words of the normalized statement that are
/// not stopwords. `None` when fewer than two remain.
pub fn topic_key(text: &str) -> Option<String> {
    let normalized = normalize_statement(text);
    let words: Vec<&str> = normalized
        .split_whitespace()
        .filter(|w| !TOPIC_STOPWORDS.contains(w))
        .take(2)
        .collect();
    (words.len() == 2).then(|| words.join(" "))
}

fn scoped_topic(artifact: &Artifact) -> Option<String> {
    if !matches!(
        artifact.artifact_type,
        ArtifactType::Decision | ArtifactType::Constraint
    ) {
        return None;
    }
    let topic = topic_key(&artifact.content.text)?;
    Some(match artifact.artifact_type {
        ArtifactType::Constraint => format!(
            "{topic}\u{1f}{}",
            artifact.content.scope.as_deref().unwrap_or_default()
        ),
        _ => topic,
    })
}

/// Lookup tables over the merged list. Topic entries keep insertion order.
#[derive(Default)]
struct MergeIndex {
    by_id: HashMap<String, usize>,
    by_key: HashMap<Keyed, usize>,
    by_topic: HashMap<Keyed, Vec<usize>>,
}

impl MergeIndex {
    fn register(&mut self, pos: usize, artifact: &Artifact) {
        let _ = self.by_id.entry(artifact.id.clone()).or_insert(pos);
        if let Some(key) = dedup_key(artifact) {
            let _ = self.by_key.entry((artifact.artifact_type, key)).or_insert(pos);
        }
        if let Some(topic) = scoped_topic(artifact) {
            self.by_topic
                .entry((artifact.artifact_type, topic))
                .or_default()
                .push(pos);
        }
    }
}

/// Merge `incoming` into `existing`, returning the new full list.
pub fn merge_artifacts(existing: &[Artifact], incoming: &[Artifact]) -> Vec<Artifact> {
    let mut merged = existing.to_vec();
    let mut index = MergeIndex::default();
    for (pos, artifact) in merged.iter().enumerate() {
        index.register(pos, artifact);
    }

    let (mut unioned, mut superseding) = (0usize, 0usize);
    for artifact in incoming {
        if let Some(&pos) = index.by_id.get(&artifact.id) {
            let _ = merged[pos].union_provenance(&artifact.provenance);
            unioned += 1;
            continue;
        }

        let kind = artifact.artifact_type;
        if let Some(&pos) = dedup_key(artifact).and_then(|k| index.by_key.get(&(kind, k))) {
            let _ = merged[pos].union_provenance(&artifact.provenance);
            unioned += 1;
            continue;
        }

        let mut next = artifact.clone();
        let prior = scoped_topic(artifact)
            .and_then(|t| index.by_topic.get(&(kind, t)))
            .and_then(|positions| {
                positions
                    .iter()
                    .rev()
                    .find(|&&p| !merged[p].is_superseded())
                    .or_else(|| positions.last())
                    .copied()
            });
        if let Some(prior) = prior {
            let prior_id = merged[prior].id.clone();
            if !next.supersedes.contains(&prior_id) {
                next.supersedes.push(prior_id);
            }
            if !merged[prior].superseded_by.contains(&next.id) {
                merged[prior].superseded_by.push(next.id.clone());
            }
            superseding += 1;
        }

        index.register(merged.len(), &next);
        merged.push(next);
    }

    debug!(
        existing = existing.len(),
        incoming = incoming.len(),
        unioned,
        superseding,
        total = merged.len(),
        "artifacts merged"
    );
    merged
}

/// Prepare stored provenance for a rerun over the current WAL.
///
/// Trace `event_index` values are positions in one replay, so they go stale
/// once retention prunes older files. Entries for replayed runs are dropped;
/// re-extraction adds them back with fresh traces. Entries for runs no
/// longer in the WAL keep their item pointer but lose their traces, since
/// those events are gone. Returns how many entries were touched.
pub fn reanchor_provenance(artifacts: &mut [Artifact], replayed_runs: &HashSet<&str>) -> usize {
    let mut touched = 0;
    for artifact in artifacts.iter_mut() {
        let before = artifact.provenance.len();
        artifact
            .provenance
            .retain(|p| !replayed_runs.contains(p.run_id.as_str()));
        touched += before - artifact.provenance.len();
        for prov in &mut artifact.provenance {
            if !prov.traces.is_empty() {
                prov.traces.clear();
                touched += 1;
            }
        }
    }
    if touched > 0 {
        debug!(touched, runs = replayed_runs.len(), "provenance re-anchored");
    }
    touched
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
