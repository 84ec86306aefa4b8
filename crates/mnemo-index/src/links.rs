//! Link tuples derived from artifacts.
//!
//! Two artifacts are neighbors when they share a `(link type, value)` tuple.
//! Each link type carries a fixed weight used by related lookups.

use std::collections::BTreeSet;
use std::fmt;

use mnemo_artifacts::Artifact;

/// Kind of shared context between two artifacts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LinkType {
    /// Same agent session.
    Session,
    /// Same task.
    Task,
    /// Same run.
    Run,
    /// Same canonical log item.
    ProvenanceItem,
    /// Same proxied request.
    TraceRequest,
    /// Same WAL byte range.
    TraceSpan,
}

impl LinkType {
    /// Every link type.
    pub const ALL: [Self; 6] = [
        Self::Session,
        Self::Task,
        Self::Run,
        Self::ProvenanceItem,
        Self::TraceRequest,
        Self::TraceSpan,
    ];

    /// Stored string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Task => "task",
            Self::Run => "run",
            Self::ProvenanceItem => "provenance_item",
            Self::TraceRequest => "trace_request",
            Self::TraceSpan => "trace_span",
        }
    }

    /// Parse the stored string form.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Score contributed by one shared tuple of this type.
    pub fn weight(self) -> f64 {
        match self {
            Self::Run => 3.0,
            Self::ProvenanceItem => 2.5,
            Self::TraceSpan => 2.2,
            Self::TraceRequest | Self::Task => 2.0,
            Self::Session => 1.0,
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every link tuple of `artifact`, sorted and deduplicated.
///
/// Runs come from the artifact's own scope and from every provenance entry,
/// so a decision restated across runs links to all of them.
pub fn derive_links(artifact: &Artifact) -> BTreeSet<(LinkType, String)> {
    let mut links = BTreeSet::new();
    let mut add = |kind: LinkType, value: &str| {
        if !value.is_empty() {
            let _ = links.insert((kind, value.to_string()));
        }
    };
    add(LinkType::Session, &artifact.session_id);
    add(LinkType::Task, &artifact.task_id);
    add(LinkType::Run, &artifact.run_id);
    for prov in &artifact.provenance {
        add(LinkType::Run, &prov.run_id);
        add(
            LinkType::ProvenanceItem,
            &format!("{}:{}", prov.run_id, prov.item_index),
        );
        add(LinkType::TraceRequest, &prov.request_id);
        for trace in &prov.traces {
            add(LinkType::TraceRequest, &trace.request_id);
            add(
                LinkType::TraceSpan,
                &format!(
                    "{}:{}:{}-{}",
                    trace.request_id, trace.event_index, trace.start, trace.end
                ),
            );
        }
    }
    links
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_artifacts::{ArtifactContent, ArtifactProvenance, ArtifactType};
    use mnemo_canon::{ItemKind, TraceSpan};
    use mnemo_wal::EventType;

    #[test]
    fn weights_match_ranking_table() {
        assert!((LinkType::Run.weight() - 3.0).abs() < f64::EPSILON);
        assert!((LinkType::Session.weight() - 1.0).abs() < f64::EPSILON);
        assert!(LinkType::ProvenanceItem.weight() > LinkType::TraceSpan.weight());
        assert!(LinkType::TraceSpan.weight() > LinkType::TraceRequest.weight());
    }

    #[test]
    fn link_type_round_trips() {
        for kind in LinkType::ALL {
            assert_eq!(LinkType::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn derives_scope_provenance_and_trace_links() {
        let artifact = Artifact {
            id: "dec_1".into(),
            artifact_type: ArtifactType::Decision,
            session_id: "s1".into(),
            task_id: String::new(),
            run_id: "r1".into(),
            created_at: None,
            content: ArtifactContent::default(),
            provenance: vec![ArtifactProvenance {
                run_id: "r1".into(),
                item_index: 3,
                item_kind: ItemKind::Message,
                start: 0,
                end: 5,
                request_id: "q1".into(),
                traces: vec![TraceSpan {
                    request_id: "q1".into(),
                    event_index: 7,
                    event_type: EventType::ResponseBody,
                    seq: 0,
                    start: 6,
                    end: 40,
                }],
            }],
            supersedes: Vec::new(),
            superseded_by: Vec::new(),
        };
        let links: Vec<_> = derive_links(&artifact)
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        assert_eq!(
            links,
            vec![
                "session=s1",
                "run=r1",
                "provenance_item=r1:3",
                "trace_request=q1",
                "trace_span=q1:7:6-40",
            ]
        );
    }
}
