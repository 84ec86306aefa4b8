//! Header redaction.
//!
//! Credentials never reach disk: every event's headers pass through a
//! [`Redactor`] before serialization. The input map is never mutated; the
//! redactor returns a fresh copy.

use std::collections::{BTreeMap, HashSet};

use regex::Regex;

use crate::errors::{Result, WalError};

/// Replacement written in place of a redacted header value.
pub const REDACTED: &str = "[REDACTED]";

/// Header redaction strategy.
pub trait Redactor: Send + Sync {
    /// Return a redacted copy of `headers`.
    fn redact(&self, headers: &BTreeMap<String, Vec<String>>) -> BTreeMap<String, Vec<String>>;
}

/// Redacts by case-insensitive header name and by regex over values.
#[derive(Clone, Debug)]
pub struct HeaderRedactor {
    names: HashSet<String>,
    patterns: Vec<Regex>,
}

impl HeaderRedactor {
    /// Build a redactor from a name denylist and value patterns.
    pub fn new<N, P>(names: N, patterns: P) -> Result<Self>
    where
        N: IntoIterator,
        N::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        let names = names
            .into_iter()
            .map(|n| n.as_ref().to_ascii_lowercase())
            .collect();
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let pattern = p.as_ref();
                Regex::new(pattern).map_err(|source| WalError::Pattern {
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { names, patterns })
    }

    fn is_sensitive(&self, name: &str, value: &str) -> bool {
        self.names.contains(&name.to_ascii_lowercase())
            || self.patterns.iter().any(|re| re.is_match(value))
    }
}

impl Default for HeaderRedactor {
    fn default() -> Self {
        Self {
            names: mnemo_core::SENSITIVE_HEADERS
                .iter()
                .map(|h| (*h).to_string())
                .collect(),
            patterns: Vec::new(),
        }
    }
}

impl Redactor for HeaderRedactor {
    fn redact(&self, headers: &BTreeMap<String, Vec<String>>) -> BTreeMap<String, Vec<String>> {
        headers
            .iter()
            .map(|(name, values)| {
                let values = values
                    .iter()
                    .map(|v| {
                        if self.is_sensitive(name, v) {
                            REDACTED.to_string()
                        } else {
                            v.clone()
                        }
                    })
                    .collect();
                (name.clone(), values)
            })
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
