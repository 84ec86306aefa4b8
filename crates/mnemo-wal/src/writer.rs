//! Rotating append-only writer.
//!
//! All mutation goes through one `parking_lot::Mutex`: an append, rotation
//! or close completes before the next begins. Rotation happens *before* the
//! write that would overflow the size threshold, so a record is never split
//! across files.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use mnemo_core::fsutil::sync_dir;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::errors::{Result, WalError};
use crate::event::{Event, WAL_SCHEMA_VERSION};
use crate::naming::{list_rotated, nanos_to_system, rotated_name, system_nanos};
use crate::redact::{HeaderRedactor, Redactor};

/// Writer configuration. Zero thresholds disable the matching behavior.
#[derive(Clone, Debug)]
pub struct WalConfig {
    /// Directory holding the active and rotated files.
    pub dir: PathBuf,
    /// Active file name.
    pub file_name: String,
    /// Size threshold in bytes.
    pub max_bytes: u64,
    /// Age threshold for the active file.
    pub max_age: Duration,
    /// Rotated files older than this are pruned.
    pub retention: Duration,
    /// Fsync after every append.
    pub fsync_each_append: bool,
    /// Drop body-chunk events.
    pub privacy_mode: bool,
}

impl WalConfig {
    /// Config for `dir` with the default thresholds.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("wal"),
            file_name: "events.jsonl".to_string(),
            max_bytes: 64 * 1024 * 1024,
            max_age: Duration::from_secs(86_400),
            retention: Duration::from_secs(30 * 86_400),
            fsync_each_append: true,
            privacy_mode: false,
        }
    }
}

struct ActiveFile {
    writer: BufWriter<File>,
    size: u64,
    opened_at: SystemTime,
}

struct WriterState {
    active: Option<ActiveFile>,
    /// Last timestamp used in a rotated name; rotation names strictly increase.
    last_rotation: u128,
}

/// Durable, rotating event log.
pub struct EventLog {
    config: WalConfig,
    active_path: PathBuf,
    redactor: Box<dyn Redactor>,
    state: Mutex<WriterState>,
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("active_path", &self.active_path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EventLog {
    /// Open (or create) the active file under `config.dir`.
    pub fn open(config: WalConfig, redactor: Box<dyn Redactor>) -> Result<Self> {
        fs::create_dir_all(&config.dir).map_err(WalError::io("create dir", &config.dir))?;
        let active_path = config.dir.join(&config.file_name);
        let last_rotation = list_rotated(&config.dir, &config.file_name)
            .map_err(WalError::io("list", &config.dir))?
            .iter()
            .map(|f| f.nanos)
            .max()
            .unwrap_or(0);
        let active = open_active(&active_path)?;
        info!(
            path = %active_path.display(),
            size = active.size,
            privacy_mode = config.privacy_mode,
            "event log opened"
        );
        Ok(Self {
            config,
            active_path,
            redactor,
            state: Mutex::new(WriterState {
                active: Some(active),
                last_rotation,
            }),
        })
    }

    /// Open with the default header redactor.
    pub fn open_default(config: WalConfig) -> Result<Self> {
        Self::open(config, Box::new(HeaderRedactor::default()))
    }

    /// Path of the active file.
    pub fn active_path(&self) -> &Path {
        &self.active_path
    }

    /// Writer configuration.
    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    /// Append one event.
    ///
    /// Returns `false` when privacy mode dropped the event.
    pub fn append(&self, event: &Event) -> Result<bool> {
        if self.config.privacy_mode && event.event_type.is_body_chunk() {
            debug!(
                request_id = %event.request_id,
                event_type = event.event_type.as_str(),
                "privacy mode: body chunk dropped"
            );
            return Ok(false);
        }

        let mut record = event.clone();
        if record.timestamp.is_none() {
            record.timestamp = Some(Utc::now());
        }
        if record.schema_version == 0 {
            record.schema_version = WAL_SCHEMA_VERSION;
        }
        record.headers = self.redactor.redact(&event.headers);
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut state = self.state.lock();
        let needs_rotation = {
            let active = state.active.as_ref().ok_or(WalError::Closed)?;
            self.should_rotate(active, line.len() as u64)
        };
        if needs_rotation {
            self.rotate_locked(&mut state)?;
        }

        let active = state.active.as_mut().ok_or(WalError::Closed)?;
        active
            .writer
            .write_all(&line)
            .map_err(WalError::io("write", &self.active_path))?;
        active
            .writer
            .flush()
            .map_err(WalError::io("flush", &self.active_path))?;
        if self.config.fsync_each_append {
            active
                .writer
                .get_ref()
                .sync_data()
                .map_err(WalError::io("fsync", &self.active_path))?;
        }
        active.size += line.len() as u64;
        Ok(true)
    }

    /// Force a rotation of a non-empty active file.
    ///
    /// Returns the rotated path, or `None` if the active file was empty.
    pub fn rotate(&self) -> Result<Option<PathBuf>> {
        let mut state = self.state.lock();
        let empty = state.active.as_ref().ok_or(WalError::Closed)?.size == 0;
        if empty {
            return Ok(None);
        }
        self.rotate_locked(&mut state).map(Some)
    }

    /// Flush, fsync and close the active file. Later appends fail with
    /// [`WalError::Closed`]. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(active) = state.active.take() {
            finish(active, &self.active_path)?;
            debug!(path = %self.active_path.display(), "event log closed");
        }
        Ok(())
    }

    fn should_rotate(&self, active: &ActiveFile, incoming: u64) -> bool {
        if active.size == 0 {
            return false;
        }
        if self.config.max_bytes > 0 && active.size + incoming > self.config.max_bytes {
            return true;
        }
        if !self.config.max_age.is_zero() {
            let age = SystemTime::now()
                .duration_since(active.opened_at)
                .unwrap_or_default();
            if age > self.config.max_age {
                return true;
            }
        }
        false
    }

    fn rotate_locked(&self, state: &mut WriterState) -> Result<PathBuf> {
        let active = state.active.take().ok_or(WalError::Closed)?;
        let size = active.size;
        finish(active, &self.active_path)?;

        let nanos = system_nanos(SystemTime::now()).max(state.last_rotation + 1);
        state.last_rotation = nanos;
        let rotated = self
            .config
            .dir
            .join(rotated_name(&self.config.file_name, nanos));
        fs::rename(&self.active_path, &rotated).map_err(WalError::io("rename", &rotated))?;
        sync_dir(&self.config.dir).map_err(WalError::io("fsync dir", &self.config.dir))?;

        state.active = Some(open_active(&self.active_path)?);
        info!(rotated = %rotated.display(), size, "event log rotated");

        self.prune()?;
        Ok(rotated)
    }

    fn prune(&self) -> Result<()> {
        if self.config.retention.is_zero() {
            return Ok(());
        }
        let Some(cutoff) = SystemTime::now().checked_sub(self.config.retention) else {
            return Ok(());
        };
        let cutoff = system_nanos(cutoff);
        let files = list_rotated(&self.config.dir, &self.config.file_name)
            .map_err(WalError::io("list", &self.config.dir))?;

        let mut removed = 0usize;
        for file in files.iter().filter(|f| f.nanos < cutoff) {
            fs::remove_file(&file.path).map_err(WalError::io("remove", &file.path))?;
            debug!(
                path = %file.path.display(),
                rotated_at = ?nanos_to_system(file.nanos),
                "pruned rotated event log"
            );
            removed += 1;
        }
        if removed > 0 {
            sync_dir(&self.config.dir).map_err(WalError::io("fsync dir", &self.config.dir))?;
            info!(removed, "event log retention applied");
        }
        Ok(())
    }
}

fn open_active(path: &Path) -> Result<ActiveFile> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(WalError::io("open", path))?;
    let meta = file.metadata().map_err(WalError::io("stat", path))?;
    let size = meta.len();
    // A reopened file keeps aging from its creation; a fresh one starts now.
    let opened_at = if size > 0 {
        meta.created().or_else(|_| meta.modified()).unwrap_or_else(|_| SystemTime::now())
    } else {
        SystemTime::now()
    };
    Ok(ActiveFile {
        writer: BufWriter::new(file),
        size,
        opened_at,
    })
}

fn finish(mut active: ActiveFile, path: &Path) -> Result<()> {
    active.writer.flush().map_err(WalError::io("flush", path))?;
    active
        .writer
        .get_ref()
        .sync_all()
        .map_err(WalError::io("fsync", path))?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
