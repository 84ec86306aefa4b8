//! Stateless repositories. Every function takes a `&Connection`; the
//! [`Index`](crate::Index) facade owns locking and transactions.

pub mod artifact;
pub mod related;
pub mod search;

use chrono::{DateTime, SecondsFormat, Utc};

pub(crate) fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
