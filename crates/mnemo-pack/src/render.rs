//! Markdown rendering for injection into a session prompt.

use std::fmt::Write;

use crate::types::ContextPack;

impl ContextPack {
    /// Render as markdown. Empty sections are omitted.
    pub fn render(&self) -> String {
        let mut out = String::from("# Project memory\n");
        for (heading, body) in [("Goal", &self.goal), ("Instructions", &self.instructions)] {
            if !body.is_empty() {
                let _ = write!(out, "\n## {heading}\n\n{body}\n");
            }
        }
        for (heading, section) in self.sections() {
            if section.is_empty() {
                continue;
            }
            let _ = write!(out, "\n## {heading}\n\n");
            for item in &section.items {
                let _ = writeln!(out, "- {}", item.text);
            }
        }
        out
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use crate::types::{Budget, ContextPack, PackItem, PackSection, PackUsage};
    use mnemo_artifacts::ArtifactType;

    fn pack() -> ContextPack {
        ContextPack {
            goal: "ship the index".into(),
            instructions: String::new(),
            decisions: PackSection {
                items: vec![PackItem {
                    id: "dec_1".into(),
                    artifact_type: ArtifactType::Decision,
                    text: "use sqlite [dec_1]".into(),
                    tokens: 3,
                    truncated: false,
                }],
                tokens: 3,
                budget: 10,
            },
            constraints: PackSection::default(),
            outcomes: PackSection::default(),
            open_threads: PackSection::default(),
            recent: PackSection::default(),
            pointers: PackSection::default(),
            usage: PackUsage::default(),
            budget: Budget::default(),
        }
    }

    #[test]
    fn renders_non_empty_sections() {
        assert_eq!(
            pack().render(),
            "# Project memory\n\n## Goal\n\nship the index\n\n## Decisions\n\n- use sqlite [dec_1]\n"
        );
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(pack()).unwrap();
        assert_eq!(json["decisions"]["items"][0]["artifactType"], "decision");
        assert_eq!(json["budget"]["openThreads"], 200);
        assert!(json["usage"]["total"].is_number());
    }
}
