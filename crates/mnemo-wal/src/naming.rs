//! Rotated file naming.
//!
//! `events.jsonl` rotates to `events-<20-digit nanos>.jsonl`. The fixed
//! width keeps lexical order equal to chronological order.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Split a file name into stem and extension (extension may be empty).
fn split(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(dot) if dot > 0 => (&file_name[..dot], &file_name[dot + 1..]),
        _ => (file_name, ""),
    }
}

/// Name of the file the active log rotates to at `nanos`.
pub(crate) fn rotated_name(file_name: &str, nanos: u128) -> String {
    let (stem, ext) = split(file_name);
    if ext.is_empty() {
        format!("{stem}-{nanos:020}")
    } else {
        format!("{stem}-{nanos:020}.{ext}")
    }
}

/// Embedded timestamp of a rotated file name, or `None` if `candidate` is
/// not a rotation of `file_name`.
pub(crate) fn parse_rotated(file_name: &str, candidate: &str) -> Option<u128> {
    let (stem, ext) = split(file_name);
    let rest = candidate.strip_prefix(stem)?.strip_prefix('-')?;
    let digits = if ext.is_empty() {
        rest
    } else {
        rest.strip_suffix(ext)?.strip_suffix('.')?
    };
    if digits.len() != 20 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Nanoseconds since the Unix epoch.
pub(crate) fn system_nanos(time: SystemTime) -> u128 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos())
}

/// Inverse of [`system_nanos`], saturating at `u64` nanoseconds.
pub(crate) fn nanos_to_system(nanos: u128) -> SystemTime {
    UNIX_EPOCH + Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// A rotated file discovered on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RotatedFile {
    pub(crate) path: PathBuf,
    /// Embedded timestamp, falling back to mtime.
    pub(crate) nanos: u128,
}

/// List rotations of `file_name` in `dir`, oldest first.
pub(crate) fn list_rotated(dir: &Path, file_name: &str) -> std::io::Result<Vec<RotatedFile>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name == file_name {
            continue;
        }
        let (stem, _) = split(file_name);
        let nanos = match parse_rotated(file_name, name) {
            Some(nanos) => nanos,
            // Same stem but unparsable suffix (hand-renamed): order by mtime.
            None if name.starts_with(&format!("{stem}-")) && !name.ends_with(".tmp") => {
                system_nanos(entry.metadata()?.modified()?)
            }
            None => continue,
        };
        files.push(RotatedFile {
            path: entry.path(),
            nanos,
        });
    }
    files.sort_by(|a, b| a.nanos.cmp(&b.nanos).then_with(|| a.path.cmp(&b.path)));
    Ok(files)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
