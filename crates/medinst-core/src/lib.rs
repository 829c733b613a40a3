//! Medinst Core - Directory of medical and veterinary institutions.
//!
//! Institutions are stored in SQLite with an open-ended attribute bag and
//! optional coordinates. Each row carries a derived `search_index` built from
//! its `name` and `country`; the index is recomputed inside the same
//! transaction as every write that touches those fields, so a committed row
//! never carries an index derived from other values.
//!
//! # Example
//!
//! ```rust,no_run
//! use medinst_core::{
//!     InstitutionDirectory, InstitutionPatch, InstitutionType, NewInstitution, SearchFilter,
//! };
//!
//! fn main() -> medinst_core::Result<()> {
//!     let directory = InstitutionDirectory::new("/path/to/institutions.db")?;
//!
//!     let mary = directory.insert(NewInstitution::new(
//!         "St. Mary's Hospital",
//!         InstitutionType::Hospital,
//!         "USA",
//!     ))?;
//!     println!("Indexed as {}", mary.search_index);
//!
//!     directory.update(mary.id, InstitutionPatch::new().country("Canada"))?;
//!
//!     let found = directory.search("mary", &SearchFilter::new(), 10, 0)?;
//!     println!("Search found {} results", found.total_count);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod directory;
pub mod error;
pub mod index;
pub mod models;

// Re-export commonly used types
pub use config::{DirectoryConfig, SearchIndexConfig};
pub use directory::{
    CompletenessRow, CoordinateQuality, CoverageRow, DirectoryReport, DirectoryStats,
    InstitutionDirectory, QualityReport, SearchFilter, SearchResult, SourceRow,
};
pub use error::{MedinstError, Result};
pub use index::{derive_search_index, IndexMaintainer, SearchAnalyzer, SearchIndex, WriteKind};
pub use models::{
    AdditionalAttributes, Institution, InstitutionInput, InstitutionPatch, InstitutionType,
    NewInstitution,
};
