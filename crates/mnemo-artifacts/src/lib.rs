//! # mnemo-artifacts
//!
//! Typed semantic units mined from canonical logs.
//!
//! - [`extract`]: lexical heuristics producing decisions, constraints, open
//!   threads, per-run outcomes, and transcripts
//! - [`merge`]: deterministic dedup and topic supersession
//! - [`store`]: strict, atomic, schema-versioned artifact document

#![deny(unsafe_code)]

pub mod errors;
pub mod extract;
pub mod merge;
pub mod store;
pub mod types;

pub use errors::{ArtifactError, Result};
pub use extract::extract_artifacts;
pub use merge::{dedup_key, merge_artifacts, reanchor_provenance, topic_key};
pub use store::{ArtifactStore, current};
pub use types::{
    ARTIFACT_SCHEMA_VERSION, Artifact, ArtifactContent, ArtifactProvenance, ArtifactType,
    CommandRecord, GLOBAL_SCOPE, OutcomeStatus, artifact_id, constraint_scope,
};
