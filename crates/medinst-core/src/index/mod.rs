//! Search index maintenance.
//!
//! This module provides:
//! - The analyzer that derives a normalized token index from `name`/`country`
//! - The write-path hook that attaches that index to every committed row
//! - The FTS5 inverted index and query building used for lookups

mod analyzer;
mod fts5;
mod maintainer;
mod query;

pub use analyzer::{
    default_analyzer, derive_search_index, Language, SearchAnalyzer, SearchIndex,
};
pub use fts5::{FTS5Manager, FTS5Stats};
pub use maintainer::{IndexMaintainer, WriteKind};
pub use query::{build_fts5_query, escape_fts5_term};
