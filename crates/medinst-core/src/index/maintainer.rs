//! Write-path hook that keeps `search_index` in step with `name`/`country`.

use super::analyzer::{default_analyzer, SearchAnalyzer, SearchIndex};
use crate::models::Institution;
use crate::Result;
use tracing::debug;

/// The kind of write the hook is running for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    /// `touches_search_fields` is true when the write sets `name` or `country`.
    Update { touches_search_fields: bool },
}

impl WriteKind {
    fn requires_derivation(self) -> bool {
        match self {
            WriteKind::Insert => true,
            WriteKind::Update {
                touches_search_fields,
            } => touches_search_fields,
        }
    }
}

/// Recomputes the derived index on a row before it is committed.
///
/// The directory calls [`IndexMaintainer::on_write`] inside the write
/// transaction with the post-mutation row. An error aborts the transaction.
#[derive(Debug, Clone, Copy)]
pub struct IndexMaintainer {
    analyzer: &'static SearchAnalyzer,
}

impl Default for IndexMaintainer {
    fn default() -> Self {
        Self::new(default_analyzer())
    }
}

impl IndexMaintainer {
    pub fn new(analyzer: &'static SearchAnalyzer) -> Self {
        Self { analyzer }
    }

    pub fn analyzer(&self) -> &'static SearchAnalyzer {
        self.analyzer
    }

    /// Attach a freshly derived index to `record` when the write requires it.
    ///
    /// Returns whether the index was recomputed.
    pub fn on_write(&self, record: &mut Institution, kind: WriteKind) -> Result<bool> {
        if !kind.requires_derivation() {
            return Ok(false);
        }

        record.search_index = self.expected_index(&record.name, &record.country)?;
        debug!(
            "Derived search index for {:?} ({} tokens)",
            record.name,
            record.search_index.len()
        );
        Ok(true)
    }

    /// The index a row with these field values must carry.
    pub fn expected_index(&self, name: &str, country: &str) -> Result<SearchIndex> {
        self.analyzer.derive(Some(name), Some(country))
    }

    /// Whether `record` carries exactly the index its fields derive to.
    pub fn is_in_sync(&self, record: &Institution) -> Result<bool> {
        Ok(self.expected_index(&record.name, &record.country)? == record.search_index)
    }
}
