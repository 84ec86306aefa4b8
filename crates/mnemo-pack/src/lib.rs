//! # mnemo-pack
//!
//! Token-budgeted context pack for session-start injection.
//!
//! - [`builder`]: section selection, ordering, and per-line budgeting
//! - [`render`]: markdown output
//! - [`types`]: budgets, sections, and the assembled pack

#![deny(unsafe_code)]

pub mod builder;
pub mod render;
pub mod types;

pub use builder::build_context_pack;
pub use types::{Budget, ContextPack, PackItem, PackRequest, PackSection, PackUsage};
