//! Centralized configuration for the institutions directory.
//!
//! Constants for storage, refresh policy, duplicate detection and search
//! defaults, plus the configurable FTS5 table settings.

use crate::error::{MedinstError, Result};
use std::time::Duration;

/// Directory-level configuration.
pub struct DirectoryConfig;

impl DirectoryConfig {
    pub const APP_NAME: &'static str = "medinst";
    pub const DB_FILE_NAME: &'static str = "institutions.db";
    pub const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

    // Refresh policy for ingestion runs
    pub const DEFAULT_REFRESH_DAYS: u32 = 30;

    // Duplicate detection (token-sort similarity, 0-100)
    pub const DEDUP_SIMILARITY_THRESHOLD: u8 = 90;

    // Search pagination
    pub const DEFAULT_SEARCH_LIMIT: usize = 50;
}

/// Limits applied while deriving a search index.
pub struct AnalyzerLimits;

impl AnalyzerLimits {
    /// Words longer than this (in bytes) are skipped.
    pub const MAX_WORD_BYTES: usize = 2047;
    /// Positions past this value are clamped.
    pub const MAX_POSITION: u32 = 16383;
    /// Upper bound on the serialized size of one search index.
    pub const MAX_INDEX_BYTES: usize = 1_048_576;
}

/// Configuration for the FTS5 inverted index.
#[derive(Debug, Clone)]
pub struct SearchIndexConfig {
    /// Name of the FTS5 virtual table.
    pub table_name: String,
    /// FTS5 tokenizer applied to the already-normalized tokens.
    pub tokenizer: String,
}

impl Default for SearchIndexConfig {
    fn default() -> Self {
        Self {
            table_name: "institution_search".to_string(),
            // Tokens arrive folded and stemmed. `ascii` treats every non-ASCII
            // character as part of a token, so each stored token stays one term.
            tokenizer: "ascii".to_string(),
        }
    }
}

impl SearchIndexConfig {
    /// Both values are spliced into DDL, so only plain identifiers and
    /// unquoted tokenizer arguments are accepted.
    pub fn validate(&self) -> Result<()> {
        let mut chars = self.table_name.chars();
        let valid_name = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_name {
            return Err(MedinstError::Config {
                message: format!("Invalid FTS5 table name: {:?}", self.table_name),
            });
        }

        if self.tokenizer.trim().is_empty() || self.tokenizer.contains(['\'', '"', ';']) {
            return Err(MedinstError::Config {
                message: format!("Invalid FTS5 tokenizer: {:?}", self.tokenizer),
            });
        }
        Ok(())
    }
}
