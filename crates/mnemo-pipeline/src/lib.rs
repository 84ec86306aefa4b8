//! # mnemo-pipeline
//!
//! Batch wiring for the memory pipeline:
//! event log → canonical logs → artifacts → artifact store → index.
//!
//! - [`pipeline`]: [`MemoryPipeline`] run and context-pack entry points
//! - [`errors`]: per-stage error wrapping

#![deny(unsafe_code)]

pub mod errors;
pub mod pipeline;

pub use errors::{PipelineError, Result};
pub use pipeline::{
    MemoryPipeline, PipelinePaths, PipelineReport, open_event_log, wal_config,
};
