//! Context pack assembly.
//!
//! Pure and deterministic: the same artifacts, budget, and lookup always
//! produce the same pack. Every line is charged against both its section
//! budget and the shared ceiling; a line that does not fit is word-truncated
//! and re-measured, and dropped if it still does not fit.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use mnemo_artifacts::{Artifact, ArtifactType, dedup_key};
use mnemo_canon::Role;
use mnemo_core::lookup::RunTimeLookup;
use mnemo_core::text::{count_tokens, normalize_statement, truncate_words};
use tracing::debug;

use crate::types::{ContextPack, PackItem, PackRequest, PackSection, PackUsage};

/// Longest transcript excerpt considered for the recent section.
const RECENT_EXCERPT_WORDS: usize = 40;

/// Assemble a context pack. Never fails; tight budgets yield emptier packs.
pub fn build_context_pack(request: &PackRequest<'_>) -> ContextPack {
    let budget = request.budget;
    let mut gauge = Gauge {
        remaining: budget.total_tokens,
    };

    let (goal, goal_tokens) = gauge.header(request.goal);
    let (instructions, instructions_tokens) = gauge.header(request.instructions);

    let candidates: Vec<Candidate<'_>> = request
        .artifacts
        .iter()
        .filter(|a| !a.is_superseded())
        .map(|artifact| Candidate {
            artifact,
            at: resolve_time(artifact, request.lookup),
        })
        .collect();

    let mut shown: HashSet<&str> = HashSet::new();
    let ids = budget.include_ids;

    let mut decisions = PackSection::with_budget(budget.decisions);
    let lines = statements(&candidates, ArtifactType::Decision);
    fill(&mut gauge, &mut decisions, lines, ids, &mut shown);

    let mut constraints = PackSection::with_budget(budget.constraints);
    let lines = statements(&candidates, ArtifactType::Constraint);
    fill(&mut gauge, &mut constraints, lines, ids, &mut shown);

    let mut outcomes = PackSection::with_budget(budget.outcomes);
    fill(&mut gauge, &mut outcomes, outcome_lines(&candidates), ids, &mut shown);

    let mut open_threads = PackSection::with_budget(budget.open_threads);
    fill(&mut gauge, &mut open_threads, thread_lines(&candidates), ids, &mut shown);

    let mut recent = PackSection::with_budget(budget.recent);
    fill(&mut gauge, &mut recent, recent_lines(&candidates), ids, &mut shown);

    let mut pointers = PackSection::with_budget(budget.pointers);
    for artifact in pointer_order(&candidates, &shown) {
        let body = format!("{} ({})", artifact.id, artifact.artifact_type);
        let _ = gauge.take(&mut pointers, artifact, &body, "", false);
    }

    let sections = [&decisions, &constraints, &outcomes, &open_threads, &recent, &pointers]
        .iter()
        .map(|s| s.tokens)
        .sum::<usize>();
    let usage = PackUsage {
        goal: goal_tokens,
        instructions: instructions_tokens,
        sections,
        total: goal_tokens + instructions_tokens + sections,
    };
    debug!(
        candidates = candidates.len(),
        total = usage.total,
        ceiling = budget.total_tokens,
        "context pack built"
    );

    ContextPack {
        goal,
        instructions,
        decisions,
        constraints,
        outcomes,
        open_threads,
        recent,
        pointers,
        usage,
        budget: budget.clone(),
    }
}

// =============================================================================
// Budgeting
// =============================================================================

/// Charge each line in order, recording which artifacts made it in.
fn fill<'a>(
    gauge: &mut Gauge,
    section: &mut PackSection,
    lines: Vec<Line<'a>>,
    include_ids: bool,
    shown: &mut HashSet<&'a str>,
) {
    for (artifact, body, excerpted) in lines {
        let tag = if include_ids {
            format!("[{}]", artifact.id)
        } else {
            String::new()
        };
        if gauge.take(section, artifact, &body, &tag, excerpted) {
            let _ = shown.insert(artifact.id.as_str());
        }
    }
}

/// Shared ceiling across the whole pack.
struct Gauge {
    remaining: usize,
}

/// A line that fits its allowance.
struct Fitted {
    text: String,
    tokens: usize,
    truncated: bool,
}

impl Gauge {
    /// Charge a header field (goal, instructions) to the ceiling only.
    fn header(&mut self, text: &str) -> (String, usize) {
        match fit(text, "", self.remaining) {
            Some(f) => {
                self.remaining -= f.tokens;
                (f.text, f.tokens)
            }
            None => (String::new(), 0),
        }
    }

    /// Charge one line to `section` and the ceiling. Returns whether it was kept.
    fn take(
        &mut self,
        section: &mut PackSection,
        artifact: &Artifact,
        body: &str,
        tag: &str,
        excerpted: bool,
    ) -> bool {
        let allowed = section
            .budget
            .saturating_sub(section.tokens)
            .min(self.remaining);
        let Some(fitted) = fit(body, tag, allowed) else {
            return false;
        };
        self.remaining -= fitted.tokens;
        section.tokens += fitted.tokens;
        section.items.push(PackItem {
            id: artifact.id.clone(),
            artifact_type: artifact.artifact_type,
            text: fitted.text,
            tokens: fitted.tokens,
            truncated: fitted.truncated || excerpted,
        });
        true
    }
}

/// Fit `body` plus an optional trailing `tag` into `allowed` tokens. Only
/// the body is truncated; the ellipsis counts as a token.
fn fit(body: &str, tag: &str, allowed: usize) -> Option<Fitted> {
    let words = collapse(body);
    if words.is_empty() {
        return None;
    }
    let line = compose(&words, tag);
    let tokens = count_tokens(&line);
    if tokens <= allowed {
        return Some(Fitted {
            text: line,
            tokens,
            truncated: false,
        });
    }
    let keep = allowed.checked_sub(count_tokens(tag) + 1)?;
    let line = compose(&truncate_words(&words, keep)?, tag);
    let tokens = count_tokens(&line);
    (tokens <= allowed).then_some(Fitted {
        text: line,
        tokens,
        truncated: true,
    })
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn compose(body: &str, tag: &str) -> String {
    if tag.is_empty() {
        body.to_string()
    } else {
        format!("{body} {tag}")
    }
}

// =============================================================================
// Ordering
// =============================================================================

struct Candidate<'a> {
    artifact: &'a Artifact,
    at: Option<DateTime<Utc>>,
}

/// `createdAt`, else the run's timestamp from the lookup.
fn resolve_time(artifact: &Artifact, lookup: &dyn RunTimeLookup) -> Option<DateTime<Utc>> {
    artifact
        .created_at
        .or_else(|| lookup.run_time(&artifact.task_id, &artifact.run_id))
}

/// Newest first; unknown timestamps last.
fn newest_first(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Candidates of one type keyed by `key`, sorted newest first, then by key,
/// then by ID. The first candidate per key wins.
fn newest_per_key<'a>(
    candidates: &[Candidate<'a>],
    artifact_type: ArtifactType,
    key: impl Fn(&Artifact) -> Option<String>,
) -> Vec<&'a Artifact> {
    let mut keyed: Vec<(&Candidate<'a>, String)> = candidates
        .iter()
        .filter(|c| c.artifact.artifact_type == artifact_type)
        .filter_map(|c| key(c.artifact).map(|k| (c, k)))
        .collect();
    keyed.sort_by(|(a, ka), (b, kb)| {
        newest_first(a.at, b.at)
            .then_with(|| ka.cmp(kb))
            .then_with(|| a.artifact.id.cmp(&b.artifact.id))
    });
    let mut seen = BTreeSet::new();
    keyed
        .into_iter()
        .filter(|(_, k)| seen.insert(k.clone()))
        .map(|(c, _)| c.artifact)
        .collect()
}

// =============================================================================
// Section lines
// =============================================================================

type Line<'a> = (&'a Artifact, String, bool);

fn statements<'a>(candidates: &[Candidate<'a>], artifact_type: ArtifactType) -> Vec<Line<'a>> {
    newest_per_key(candidates, artifact_type, dedup_key)
        .into_iter()
        .map(|a| {
            let body = match a.content.rationale.as_deref() {
                Some(why) => format!("{} (because {why})", a.content.text),
                None => a.content.text.clone(),
            };
            (a, body, false)
        })
        .collect()
}

fn outcome_lines<'a>(candidates: &[Candidate<'a>]) -> Vec<Line<'a>> {
    let task_key = |a: &Artifact| {
        let c = &a.content;
        let informative = c.status.is_some()
            || c.summary.as_deref().is_some_and(|s| !s.trim().is_empty())
            || !c.files.is_empty()
            || !c.errors.is_empty();
        informative.then(|| {
            if a.task_id.is_empty() {
                format!("run:{}", a.run_id)
            } else {
                format!("task:{}", a.task_id)
            }
        })
    };
    newest_per_key(candidates, ArtifactType::Outcome, task_key)
        .into_iter()
        .map(|a| {
            let c = &a.content;
            let label = if a.task_id.is_empty() {
                format!("run {}", a.run_id)
            } else {
                a.task_id.clone()
            };
            let status = c.status.map_or("unknown", |s| s.as_str());
            let summary = c
                .summary
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .or_else(|| c.errors.first().map(String::as_str))
                .unwrap_or(c.text.as_str());
            let mut body = format!("{label} ({status}): {summary}");
            if !c.files.is_empty() {
                body.push_str(" files: ");
                body.push_str(&c.files.join(", "));
            }
            (a, body, false)
        })
        .collect()
}

fn thread_lines<'a>(candidates: &[Candidate<'a>]) -> Vec<Line<'a>> {
    let key = |a: &Artifact| Some(normalize_statement(&a.content.text)).filter(|k| !k.is_empty());
    newest_per_key(candidates, ArtifactType::OpenThread, key)
        .into_iter()
        .map(|a| (a, a.content.text.clone(), false))
        .collect()
}

/// Transcript excerpts, newest run first and latest message first within a run.
fn recent_lines<'a>(candidates: &[Candidate<'a>]) -> Vec<Line<'a>> {
    let mut transcripts: Vec<&Candidate<'a>> = candidates
        .iter()
        .filter(|c| c.artifact.artifact_type == ArtifactType::Transcript)
        .filter(|c| c.artifact.content.role != Some(Role::System))
        .collect();
    let item = |c: &Candidate<'_>| c.artifact.provenance.first().map_or(0, |p| p.item_index);
    transcripts.sort_by(|a, b| {
        newest_first(a.at, b.at)
            .then_with(|| item(b).cmp(&item(a)))
            .then_with(|| a.artifact.id.cmp(&b.artifact.id))
    });
    transcripts
        .into_iter()
        .filter_map(|c| {
            let a = c.artifact;
            let text = &a.content.text;
            let excerpt = truncate_words(text, RECENT_EXCERPT_WORDS)?;
            let excerpted = count_tokens(text) > RECENT_EXCERPT_WORDS;
            let body = match a.content.role {
                Some(role) => format!("{}: {excerpt}", role.as_str()),
                None => excerpt,
            };
            Some((a, body, excerpted))
        })
        .collect()
}

/// Artifacts not already shown, newest first, each once.
fn pointer_order<'a>(candidates: &[Candidate<'a>], shown: &HashSet<&str>) -> Vec<&'a Artifact> {
    let mut rest: Vec<&Candidate<'a>> = candidates
        .iter()
        .filter(|c| !shown.contains(c.artifact.id.as_str()))
        .collect();
    rest.sort_by(|a, b| newest_first(a.at, b.at).then_with(|| a.artifact.id.cmp(&b.artifact.id)));
    let mut seen = BTreeSet::new();
    rest.into_iter()
        .map(|c| c.artifact)
        .filter(|a| seen.insert(a.id.clone()))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Budget;
    use chrono::{Duration, TimeZone};
    use mnemo_artifacts::{ArtifactContent, OutcomeStatus};
    use mnemo_core::NoRunTimes;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn artifact(id: &str, artifact_type: ArtifactType, text: &str, days_ago: Option<i64>) -> Artifact {
        Artifact {
            id: id.into(),
            artifact_type,
            session_id: "s1".into(),
            task_id: "t1".into(),
            run_id: "r1".into(),
            created_at: days_ago.map(|d| base() - Duration::days(d)),
            content: ArtifactContent {
                text: text.into(),
                ..ArtifactContent::default()
            },
            provenance: Vec::new(),
            supersedes: Vec::new(),
            superseded_by: Vec::new(),
        }
    }

    fn zero() -> Budget {
        Budget {
            decisions: 0,
            constraints: 0,
            outcomes: 0,
            open_threads: 0,
            recent: 0,
            pointers: 0,
            total_tokens: 1000,
            include_ids: false,
        }
    }

    fn build(artifacts: &[Artifact], budget: &Budget) -> ContextPack {
        build_context_pack(&PackRequest {
            goal: "",
            instructions: "",
            artifacts,
            budget,
            lookup: &NoRunTimes,
        })
    }

    fn texts(section: &PackSection) -> Vec<&str> {
        section.items.iter().map(|i| i.text.as_str()).collect()
    }

    #[test]
    fn tight_decision_budget_keeps_only_newest() {
        let artifacts = vec![
            artifact("dec_old", ArtifactType::Decision, "use postgres", Some(5)),
            artifact("dec_new", ArtifactType::Decision, "use sqlite", Some(1)),
        ];
        let budget = Budget {
            decisions: 4,
            include_ids: true,
            ..zero()
        };
        let pack = build(&artifacts, &budget);
        assert_eq!(texts(&pack.decisions), vec!["use sqlite [dec_new]"]);
        assert!(pack.decisions.tokens <= 4);
    }

    #[test]
    fn long_line_is_truncated_with_ellipsis() {
        let artifacts = vec![artifact(
            "dec_a",
            ArtifactType::Decision,
            "use sqlite for all local storage",
            Some(1),
        )];
        let budget = Budget {
            decisions: 4,
            ..zero()
        };
        let pack = build(&artifacts, &budget);
        assert_eq!(texts(&pack.decisions), vec!["use sqlite for …"]);
        assert_eq!(pack.decisions.tokens, 4);
        assert!(pack.decisions.items[0].truncated);
    }

    #[test]
    fn id_tag_survives_truncation() {
        let artifacts = vec![artifact(
            "dec_a",
            ArtifactType::Decision,
            "use sqlite for all local storage",
            Some(1),
        )];
        let budget = Budget {
            decisions: 4,
            include_ids: true,
            ..zero()
        };
        let pack = build(&artifacts, &budget);
        assert_eq!(texts(&pack.decisions), vec!["use sqlite … [dec_a]"]);
    }

    #[test]
    fn rationale_is_rendered() {
        let mut decision = artifact("dec_a", ArtifactType::Decision, "use sqlite", Some(1));
        decision.content.rationale = Some("it is embedded".into());
        let budget = Budget {
            decisions: 50,
            ..zero()
        };
        let pack = build(&[decision], &budget);
        assert_eq!(texts(&pack.decisions), vec!["use sqlite (because it is embedded)"]);
    }

    #[test]
    fn superseded_and_duplicate_statements_are_skipped() {
        let mut old = artifact("dec_old", ArtifactType::Decision, "database is mysql", Some(9));
        old.superseded_by.push("dec_new".into());
        let mut dup = artifact("dec_dup", ArtifactType::Decision, "Database is Postgres!", Some(3));
        dup.session_id = "s2".into();
        let new = artifact("dec_new", ArtifactType::Decision, "database is postgres", Some(1));
        let budget = Budget {
            decisions: 50,
            include_ids: true,
            ..zero()
        };
        let pack = build(&[old, dup, new], &budget);
        assert_eq!(texts(&pack.decisions), vec!["database is postgres [dec_new]"]);
    }

    #[test]
    fn constraints_dedup_within_scope_only() {
        let mut a = artifact("con_a", ArtifactType::Constraint, "never push to main", Some(2));
        a.content.scope = Some("s1/t1".into());
        let mut b = artifact("con_b", ArtifactType::Constraint, "never push to main", Some(1));
        b.content.scope = Some("global".into());
        let budget = Budget {
            constraints: 50,
            include_ids: true,
            ..zero()
        };
        let pack = build(&[a, b], &budget);
        assert_eq!(
            texts(&pack.constraints),
            vec!["never push to main [con_b]", "never push to main [con_a]"]
        );
    }

    #[test]
    fn one_outcome_per_task_latest_wins() {
        let mut older = artifact("out_1", ArtifactType::Outcome, "run fail", Some(3));
        older.content.status = Some(OutcomeStatus::Fail);
        let mut newer = artifact("out_2", ArtifactType::Outcome, "tests pass", Some(1));
        newer.run_id = "r2".into();
        newer.content.status = Some(OutcomeStatus::Success);
        newer.content.summary = Some("tests pass".into());
        newer.content.files = vec!["src/lib.rs".into()];
        let mut other = artifact("out_3", ArtifactType::Outcome, "blocked", Some(2));
        other.task_id = "t2".into();
        other.content.status = Some(OutcomeStatus::Blocked);
        other.content.errors = vec!["permission denied".into()];
        let budget = Budget {
            outcomes: 50,
            ..zero()
        };
        let pack = build(&[older, newer, other], &budget);
        assert_eq!(
            texts(&pack.outcomes),
            vec![
                "t1 (success): tests pass files: src/lib.rs",
                "t2 (blocked): permission denied",
            ]
        );
    }

    #[test]
    fn uninformative_outcome_is_skipped() {
        let outcome = artifact("out_1", ArtifactType::Outcome, "run success", Some(1));
        let budget = Budget {
            outcomes: 50,
            ..zero()
        };
        assert!(build(&[outcome], &budget).outcomes.is_empty());
    }

    #[test]
    fn open_threads_dedup_newest_first() {
        let artifacts = vec![
            artifact("thr_a", ArtifactType::OpenThread, "check the retry limit", Some(4)),
            artifact("thr_b", ArtifactType::OpenThread, "Check the retry limit.", Some(2)),
            artifact("thr_c", ArtifactType::OpenThread, "rename the crate", Some(1)),
        ];
        let budget = Budget {
            open_threads: 50,
            ..zero()
        };
        let pack = build(&artifacts, &budget);
        assert_eq!(
            texts(&pack.open_threads),
            vec!["rename the crate", "Check the retry limit."]
        );
    }

    #[test]
    fn recent_skips_system_and_prefixes_role() {
        let mut system = artifact("trn_s", ArtifactType::Transcript, "you are helpful", Some(1));
        system.content.role = Some(Role::System);
        let mut user = artifact("trn_u", ArtifactType::Transcript, "fix the\nbuild", Some(1));
        user.content.role = Some(Role::User);
        let budget = Budget {
            recent: 50,
            ..zero()
        };
        let pack = build(&[system, user], &budget);
        assert_eq!(texts(&pack.recent), vec!["user: fix the build"]);
    }

    #[test]
    fn lookup_orders_artifacts_without_timestamps() {
        let mut a = artifact("dec_a", ArtifactType::Decision, "use sqlite", None);
        a.run_id = "early".into();
        let mut b = artifact("dec_b", ArtifactType::Decision, "use tracing", None);
        b.run_id = "late".into();
        let lookup = |_: &str, run: &str| match run {
            "early" => Some(base() - Duration::days(2)),
            "late" => Some(base()),
            _ => None,
        };
        let budget = Budget {
            decisions: 50,
            ..zero()
        };
        let artifacts = [a, b];
        let pack = build_context_pack(&PackRequest {
            goal: "",
            instructions: "",
            artifacts: &artifacts,
            budget: &budget,
            lookup: &lookup,
        });
        assert_eq!(texts(&pack.decisions), vec!["use tracing", "use sqlite"]);
    }

    #[test]
    fn goal_and_instructions_are_charged_first() {
        let artifacts = vec![artifact("dec_a", ArtifactType::Decision, "use sqlite", Some(1))];
        let budget = Budget {
            decisions: 50,
            total_tokens: 3,
            ..zero()
        };
        let pack = build_context_pack(&PackRequest {
            goal: "ship the memory pipeline",
            instructions: "be brief",
            artifacts: &artifacts,
            budget: &budget,
            lookup: &NoRunTimes,
        });
        assert_eq!(pack.goal, "ship the …");
        assert_eq!(pack.instructions, "");
        assert!(pack.decisions.is_empty());
        assert_eq!(pack.usage.total, 3);
    }

    #[test]
    fn pointers_list_unshown_artifacts_by_recency() {
        let artifacts = vec![
            artifact("dec_a", ArtifactType::Decision, "use sqlite", Some(3)),
            artifact("thr_b", ArtifactType::OpenThread, "rename crate", Some(1)),
            artifact("trn_c", ArtifactType::Transcript, "hello", Some(2)),
        ];
        let budget = Budget {
            decisions: 50,
            pointers: 50,
            ..zero()
        };
        let pack = build(&artifacts, &budget);
        assert_eq!(
            texts(&pack.pointers),
            vec!["thr_b (open_thread)", "trn_c (transcript)"]
        );
    }

    #[test]
    fn empty_input_yields_empty_pack() {
        let pack = build(&[], &Budget::default());
        assert!(pack.is_empty());
        assert_eq!(pack.usage, PackUsage::default());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        const TYPES: [ArtifactType; 5] = ArtifactType::ALL;

        fn arb_artifact() -> impl Strategy<Value = Artifact> {
            (0..TYPES.len(), "[a-z]{1,6}( [a-z]{1,6}){0,12}", proptest::option::of(0i64..30), 0..4u8)
                .prop_map(|(t, text, days, task)| {
                    let mut a = artifact("", TYPES[t], &text, days);
                    a.task_id = format!("t{task}");
                    a.id = format!("{}_{}_{}", TYPES[t].id_prefix(), task, text.replace(' ', "-"));
                    if TYPES[t] == ArtifactType::Outcome {
                        a.content.status = Some(OutcomeStatus::Success);
                    }
                    a
                })
        }

        proptest! {
            #[test]
            fn usage_never_exceeds_ceiling(
                artifacts in proptest::collection::vec(arb_artifact(), 0..24),
                sections in proptest::collection::vec(0usize..40, 6),
                total in 0usize..80,
                include_ids in any::<bool>(),
                goal in "([a-z]{1,5} ){0,10}",
            ) {
                let budget = Budget {
                    decisions: sections[0],
                    constraints: sections[1],
                    outcomes: sections[2],
                    open_threads: sections[3],
                    recent: sections[4],
                    pointers: sections[5],
                    total_tokens: total,
                    include_ids,
                };
                let pack = build_context_pack(&PackRequest {
                    goal: &goal,
                    instructions: "keep answers short",
                    artifacts: &artifacts,
                    budget: &budget,
                    lookup: &NoRunTimes,
                });
                prop_assert!(pack.usage.total <= total);
                let mut measured = count_tokens(&pack.goal) + count_tokens(&pack.instructions);
                for (_, section) in pack.sections() {
                    prop_assert!(section.tokens <= section.budget);
                    let line_sum: usize = section.items.iter().map(|i| count_tokens(&i.text)).sum();
                    prop_assert_eq!(line_sum, section.tokens);
                    measured += section.tokens;
                }
                prop_assert_eq!(measured, pack.usage.total);
            }
        }
    }
}
