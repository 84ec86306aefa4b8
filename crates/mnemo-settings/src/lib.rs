//! # mnemo-settings
//!
//! Configuration for the mnemo memory pipeline.
//!
//! Settings are layered (lowest priority first):
//! 1. **Compiled defaults**: [`MnemoSettings::default()`]
//! 2. **Settings file**: JSON overlaid key by key on the defaults
//! 3. **Environment**: `MNEMO_*` overrides
//!
//! The pipeline crates take plain config structs; `mnemo-pipeline` maps
//! these settings onto them.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{default_settings_path, load_settings, load_settings_with_env, overlay};
pub use types::*;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
