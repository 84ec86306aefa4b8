//! Layered settings: compiled defaults, then a JSON file overlaid key by
//! key, then `MNEMO_*` environment overrides. The result is validated
//! before it is returned.
//!
//! Overlay rules: objects merge recursively, arrays and scalars replace,
//! `null` leaves the lower layer untouched.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::MnemoSettings;

/// `~/.mnemo/settings.json`.
pub fn default_settings_path() -> PathBuf {
    crate::types::mnemo_home().join("settings.json")
}

/// Load `path` (defaults when absent) with overrides from the process
/// environment.
pub fn load_settings(path: &Path) -> Result<MnemoSettings> {
    load_settings_with_env(path, |name| std::env::var(name).ok())
}

/// Load `path` with overrides read through `env`.
pub fn load_settings_with_env(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<MnemoSettings> {
    let parse = |source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    };
    let defaults = serde_json::to_value(MnemoSettings::default()).map_err(parse)?;

    let layered = match std::fs::read_to_string(path) {
        Ok(text) => {
            let file: Value = serde_json::from_str(&text).map_err(parse)?;
            debug!(path = %path.display(), "settings file loaded");
            overlay(defaults, file)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, using defaults");
            defaults
        }
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut settings: MnemoSettings = serde_json::from_value(layered).map_err(parse)?;
    let applied = apply_env(&mut settings, env);
    if applied > 0 {
        debug!(applied, "environment overrides applied");
    }
    settings.validate()?;
    Ok(settings)
}

/// Overlay `upper` onto `lower`.
pub fn overlay(lower: Value, upper: Value) -> Value {
    match (lower, upper) {
        (Value::Object(mut lower), Value::Object(upper)) => {
            for (key, value) in upper {
                if value.is_null() {
                    continue;
                }
                let next = match lower.remove(&key) {
                    Some(below) => overlay(below, value),
                    None => value,
                };
                let _ = lower.insert(key, next);
            }
            Value::Object(lower)
        }
        (_, upper) => upper,
    }
}

// =============================================================================
// Environment overrides
// =============================================================================

const ENV_OVERRIDES: &[&str] = &[
    "MNEMO_WAL_DIR",
    "MNEMO_WAL_MAX_BYTES",
    "MNEMO_WAL_FSYNC",
    "MNEMO_PRIVACY_MODE",
    "MNEMO_INDEX_PATH",
    "MNEMO_HALF_LIFE_DAYS",
    "MNEMO_PACK_TOTAL_TOKENS",
];

/// Apply every set `MNEMO_*` variable. Unparsable values are skipped with a
/// warning. Returns how many overrides took effect.
fn apply_env(settings: &mut MnemoSettings, env: impl Fn(&str) -> Option<String>) -> usize {
    let mut applied = 0;
    for name in ENV_OVERRIDES {
        let Some(raw) = env(name) else { continue };
        if set_from_env(settings, name, raw.trim()).is_some() {
            applied += 1;
        } else {
            warn!(key = *name, value = %raw, "ignoring unusable environment override");
        }
    }
    applied
}

fn set_from_env(s: &mut MnemoSettings, name: &str, v: &str) -> Option<()> {
    match name {
        "MNEMO_WAL_DIR" => s.wal.dir = non_empty(v)?,
        "MNEMO_WAL_MAX_BYTES" => s.wal.max_bytes = v.parse::<u64>().ok()?,
        "MNEMO_WAL_FSYNC" => s.wal.fsync_each_append = flag(v)?,
        "MNEMO_PRIVACY_MODE" => s.wal.privacy_mode = flag(v)?,
        "MNEMO_INDEX_PATH" => s.index.path = non_empty(v)?,
        "MNEMO_HALF_LIFE_DAYS" => {
            s.index.half_life_days = v
                .parse::<f64>()
                .ok()
                .filter(|d| d.is_finite() && *d >= 0.0)?;
        }
        "MNEMO_PACK_TOTAL_TOKENS" => {
            s.pack.total_tokens = v.parse::<usize>().ok().filter(|n| *n > 0)?;
        }
        _ => return None,
    }
    Some(())
}

fn non_empty(v: &str) -> Option<String> {
    (!v.is_empty()).then(|| v.to_string())
}

fn flag(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("settings.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn overlay_merges_objects_and_replaces_the_rest() {
        let lower = json!({"wal": {"maxBytes": 10, "fileName": "a"}, "list": [1, 2], "x": {"y": 1}});
        let upper = json!({"wal": {"maxBytes": 20, "fileName": null}, "list": [3], "x": 5});
        let merged = overlay(lower, upper);
        assert_eq!(merged["wal"], json!({"maxBytes": 20, "fileName": "a"}));
        assert_eq!(merged["list"], json!([3]));
        assert_eq!(merged["x"], 5);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_with_env(&dir.path().join("absent.json"), no_env).unwrap();
        assert_eq!(settings.wal.file_name, "events.jsonl");
        assert_eq!(settings.index.candidate_factor, 4);
    }

    #[test]
    fn file_values_overlay_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"{"wal": {"privacyMode": true}, "index": {"typeWeights": {"transcript": 0.3}}}"#,
        );
        let settings = load_settings_with_env(&path, no_env).unwrap();
        assert!(settings.wal.privacy_mode);
        assert!((settings.index.type_weights.transcript - 0.3).abs() < f64::EPSILON);
        assert!((settings.index.type_weights.decision - 1.4).abs() < f64::EPSILON);
    }

    #[test]
    fn environment_beats_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, r#"{"pack": {"totalTokens": 900}, "wal": {"dir": "/file"}}"#);
        let env: HashMap<&str, &str> = HashMap::from([
            ("MNEMO_PACK_TOTAL_TOKENS", "1200"),
            ("MNEMO_WAL_FSYNC", "off"),
            ("MNEMO_HALF_LIFE_DAYS", "-3"),
        ]);
        let settings =
            load_settings_with_env(&path, |k| env.get(k).map(|v| (*v).to_string())).unwrap();
        assert_eq!(settings.pack.total_tokens, 1200);
        assert!(!settings.wal.fsync_each_append);
        assert_eq!(settings.wal.dir, "/file");
        // Unusable value ignored.
        assert!((settings.index.half_life_days - 14.0).abs() < f64::EPSILON);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "not json");
        assert_matches!(
            load_settings_with_env(&path, no_env),
            Err(SettingsError::Parse { path: p, .. }) if p == path
        );
    }

    #[test]
    fn wrong_field_type_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, r#"{"wal": {"maxBytes": "big"}}"#);
        assert_matches!(
            load_settings_with_env(&path, no_env),
            Err(SettingsError::Parse { .. })
        );
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for (body, field) in [
            (r#"{"index": {"halfLifeDays": -1}}"#, "index.halfLifeDays"),
            (r#"{"index": {"candidateMin": 600}}"#, "index.candidateMin"),
            (r#"{"wal": {"redactValuePatterns": ["(unclosed"]}}"#, "wal.redactValuePatterns"),
            (r#"{"wal": {"fileName": ""}}"#, "wal.fileName"),
        ] {
            let path = write(&dir, body);
            assert_matches!(
                load_settings_with_env(&path, no_env),
                Err(SettingsError::Invalid { field: f, .. }) if f == field,
                "{body}"
            );
        }
    }

    #[test]
    fn flags_accept_common_spellings() {
        assert_eq!(flag("YES"), Some(true));
        assert_eq!(flag("0"), Some(false));
        assert_eq!(flag("maybe"), None);
    }
}
