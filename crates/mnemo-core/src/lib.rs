//! # mnemo-core
//!
//! Foundation types and utilities shared by every mnemo crate.
//!
//! - **Provider**: closed set of upstream provider kinds seen by the proxy
//! - **Text**: whitespace token counting, word truncation, statement normalization,
//!   UTF-8 safe byte truncation
//! - **Filesystem**: atomic document writes and directory fsync
//! - **Run time lookup**: the callback that supplies recency timestamps
//! - **Logging**: `tracing` subscriber bootstrap

#![deny(unsafe_code)]

pub mod fsutil;
pub mod logging;
pub mod lookup;
pub mod provider;
pub mod text;

pub use lookup::{NoRunTimes, RunTimeLookup};
pub use provider::{Provider, RequestShape, SENSITIVE_HEADERS};
