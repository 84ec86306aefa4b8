//! Replay of the rotated log set.
//!
//! Files are read oldest rotation first, then the active file, producing a
//! single stream in append order. Each event is tagged with its position in
//! that stream; provenance trace spans refer to events by this index.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::{Result, WalError};
use crate::event::Event;
use crate::naming::list_rotated;

/// An event with its global replay index.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplayedEvent {
    /// Position in the replay stream, starting at zero.
    pub index: usize,
    /// The decoded record.
    pub event: Event,
}

/// Reader over one log directory.
#[derive(Clone, Debug)]
pub struct WalReader {
    dir: PathBuf,
    file_name: String,
}

impl WalReader {
    /// Reader for `file_name` and its rotations under `dir`.
    pub fn new(dir: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            file_name: file_name.into(),
        }
    }

    /// Files in replay order: rotations by embedded timestamp (mtime for
    /// unparsable names), then the active file if it exists.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = list_rotated(&self.dir, &self.file_name)
            .map_err(WalError::io("list", &self.dir))?
            .into_iter()
            .map(|f| f.path)
            .collect();
        let active = self.dir.join(&self.file_name);
        if active.is_file() {
            files.push(active);
        }
        Ok(files)
    }

    /// Decode every event in replay order. A malformed line is an error
    /// naming its file and line number.
    pub fn replay(&self) -> Result<Vec<ReplayedEvent>> {
        let mut events = Vec::new();
        for path in self.files()? {
            let before = events.len();
            read_file(&path, &mut events)?;
            debug!(path = %path.display(), events = events.len() - before, "replayed log file");
        }
        Ok(events)
    }
}

/// Replay `file_name` and its rotations under `dir`.
pub fn replay(dir: &Path, file_name: &str) -> Result<Vec<ReplayedEvent>> {
    WalReader::new(dir, file_name).replay()
}

fn read_file(path: &Path, out: &mut Vec<ReplayedEvent>) -> Result<()> {
    let file = File::open(path).map_err(WalError::io("open", path))?;
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(WalError::io("read", path))?;
        if line.trim().is_empty() {
            continue;
        }
        let event: Event = serde_json::from_str(&line).map_err(|source| WalError::Decode {
            path: path.to_path_buf(),
            line: i + 1,
            source,
        })?;
        out.push(ReplayedEvent {
            index: out.len(),
            event,
        });
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
