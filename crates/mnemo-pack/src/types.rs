//! Context pack types.

use mnemo_artifacts::{Artifact, ArtifactType};
use mnemo_core::lookup::RunTimeLookup;
use mnemo_settings::PackSettings;
use serde::Serialize;

/// Token budgets for one pack. Tokens are whitespace words.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    /// Decisions section.
    pub decisions: usize,
    /// Constraints section.
    pub constraints: usize,
    /// Outcomes section.
    pub outcomes: usize,
    /// Open threads section.
    pub open_threads: usize,
    /// Recent transcript excerpts section.
    pub recent: usize,
    /// Pointer section.
    pub pointers: usize,
    /// Ceiling across goal, instructions, and every section.
    pub total_tokens: usize,
    /// Append `[id]` tags to section lines.
    pub include_ids: bool,
}

impl Default for Budget {
    fn default() -> Self {
        Self::from(&PackSettings::default())
    }
}

impl From<&PackSettings> for Budget {
    fn from(s: &PackSettings) -> Self {
        Self {
            decisions: s.decisions,
            constraints: s.constraints,
            outcomes: s.outcomes,
            open_threads: s.open_threads,
            recent: s.recent,
            pointers: s.pointers,
            total_tokens: s.total_tokens,
            include_ids: s.include_ids,
        }
    }
}

/// Inputs to [`build_context_pack`](crate::build_context_pack).
pub struct PackRequest<'a> {
    /// Session goal.
    pub goal: &'a str,
    /// Standing instructions.
    pub instructions: &'a str,
    /// Candidate artifacts; superseded ones are skipped.
    pub artifacts: &'a [Artifact],
    /// Budgets.
    pub budget: &'a Budget,
    /// Run timestamps for artifacts without `createdAt`.
    pub lookup: &'a dyn RunTimeLookup,
}

/// One rendered line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackItem {
    /// Source artifact.
    pub id: String,
    /// Source artifact type.
    pub artifact_type: ArtifactType,
    /// Line text as injected.
    pub text: String,
    /// Tokens charged for this line.
    pub tokens: usize,
    /// Whether the line was word-truncated to fit.
    pub truncated: bool,
}

/// A bounded section.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackSection {
    /// Lines in order.
    pub items: Vec<PackItem>,
    /// Tokens used.
    pub tokens: usize,
    /// Section budget.
    pub budget: usize,
}

impl PackSection {
    /// Empty section with the given budget.
    pub fn with_budget(budget: usize) -> Self {
        Self {
            budget,
            ..Self::default()
        }
    }

    /// Whether the section has no lines.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Token accounting across the pack.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackUsage {
    /// Tokens spent on the goal.
    pub goal: usize,
    /// Tokens spent on the instructions.
    pub instructions: usize,
    /// Tokens spent across all sections.
    pub sections: usize,
    /// Grand total; never above the budget's `total_tokens`.
    pub total: usize,
}

/// Assembled session-start context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPack {
    /// Session goal, possibly truncated.
    pub goal: String,
    /// Standing instructions, possibly truncated.
    pub instructions: String,
    /// Current decisions.
    pub decisions: PackSection,
    /// Current constraints.
    pub constraints: PackSection,
    /// Latest outcome per task.
    pub outcomes: PackSection,
    /// Unresolved questions and follow-ups.
    pub open_threads: PackSection,
    /// Recent transcript excerpts.
    pub recent: PackSection,
    /// IDs of further artifacts worth fetching.
    pub pointers: PackSection,
    /// Token accounting.
    pub usage: PackUsage,
    /// Budgets the pack was built under.
    pub budget: Budget,
}

impl ContextPack {
    /// Sections in render order, with headings.
    pub fn sections(&self) -> [(&'static str, &PackSection); 6] {
        [
            ("Decisions", &self.decisions),
            ("Constraints", &self.constraints),
            ("Outcomes", &self.outcomes),
            ("Open threads", &self.open_threads),
            ("Recent", &self.recent),
            ("Pointers", &self.pointers),
        ]
    }

    /// Whether nothing beyond goal and instructions made it in.
    pub fn is_empty(&self) -> bool {
        self.sections().iter().all(|(_, s)| s.is_empty())
    }
}
