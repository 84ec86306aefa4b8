//! # mnemo-index
//!
//! Embedded artifact index over `SQLite` + FTS5.
//!
//! - [`index`]: the [`Index`] facade (open, rebuild, search, get, related)
//! - [`links`]: link tuples shared between artifacts
//! - [`sqlite`]: connection setup, migrations, stateless repositories

#![deny(unsafe_code)]

pub mod errors;
pub mod index;
pub mod links;
pub mod sqlite;

pub use errors::{IndexError, Result};
pub use index::{Index, RebuildReport};
pub use links::{LinkType, derive_links};
pub use sqlite::repositories::artifact::IndexStats;
pub use sqlite::repositories::related::RelatedHit;
pub use sqlite::repositories::search::{RankingConfig, SearchFilters, SearchHit};
