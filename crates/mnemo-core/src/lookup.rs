//! Run timestamp lookup.
//!
//! Recency in ranking and context-pack ordering comes from an external
//! execution-history store that knows when each `(task, run)` happened.
//! Callers hand that store in through [`RunTimeLookup`].

use chrono::{DateTime, Utc};

/// Resolve the wall-clock time of a run.
pub trait RunTimeLookup {
    /// Timestamp of `run_id` within `task_id`, if known.
    fn run_time(&self, task_id: &str, run_id: &str) -> Option<DateTime<Utc>>;
}

impl<F> RunTimeLookup for F
where
    F: Fn(&str, &str) -> Option<DateTime<Utc>>,
{
    fn run_time(&self, task_id: &str, run_id: &str) -> Option<DateTime<Utc>> {
        self(task_id, run_id)
    }
}

/// Lookup that knows nothing; callers fall back to artifact timestamps.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRunTimes;

impl RunTimeLookup for NoRunTimes {
    fn run_time(&self, _task_id: &str, _run_id: &str) -> Option<DateTime<Utc>> {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn closures_are_lookups() {
        let at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let lookup = move |task: &str, run: &str| (task == "t" && run == "r").then_some(at);
        assert_eq!(lookup.run_time("t", "r"), Some(at));
        assert_eq!(lookup.run_time("t", "other"), None);
    }

    #[test]
    fn no_run_times_is_empty() {
        assert_eq!(NoRunTimes.run_time("t", "r"), None);
    }
}
