//! Refresh checks, duplicate removal and search index upkeep.

use super::{parse_timestamp, InstitutionDirectory};
use crate::index::{FTS5Manager, FTS5Stats, SearchIndex};
use crate::{MedinstError, Result};
use chrono::{Duration, Utc};
use rusqlite::{params, Connection, TransactionBehavior};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Summary counts for the directory.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryStats {
    pub total: usize,
    pub by_country: Vec<(String, usize)>,
    pub by_type: Vec<(String, usize)>,
    pub search_index: FTS5Stats,
}

/// The columns a search index derives from, plus the raw stored index.
struct IndexSource {
    id: i64,
    name: String,
    country: String,
    stored: String,
}

impl InstitutionDirectory {
    /// Whether a country's records are missing or older than `refresh_days`.
    pub fn needs_refresh(&self, country: &str, refresh_days: u32) -> Result<bool> {
        let conn = self.lock()?;
        let newest: Option<String> = conn.query_row(
            "SELECT MAX(last_updated) FROM institutions WHERE country = ?1",
            params![country],
            |row| row.get(0),
        )?;

        let Some(newest) = newest else {
            return Ok(true);
        };
        let newest = parse_timestamp(&newest).map_err(|e| MedinstError::Database {
            message: format!("Invalid last_updated for {}: {}", country, e),
            source: None,
        })?;

        Ok(Utc::now() - newest > Duration::days(i64::from(refresh_days)))
    }

    /// Remove near-identical records within one country.
    ///
    /// Every pair is compared on `name` + `address` with [`token_sort_ratio`];
    /// when the score exceeds `threshold` the higher id is removed. Returns the
    /// removed ids in ascending order.
    pub fn deduplicate(&self, country: &str, threshold: u8) -> Result<Vec<i64>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Vec<(i64, String)> = {
            let mut stmt = tx.prepare(
                "SELECT id, name, address FROM institutions WHERE country = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![country], |row| {
                let name: String = row.get(1)?;
                let address: Option<String> = row.get(2)?;
                Ok((
                    row.get::<_, i64>(0)?,
                    format!("{} {}", name, address.unwrap_or_default()),
                ))
            })?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut duplicates = BTreeSet::new();
        for (i, (_, first)) in existing.iter().enumerate() {
            for (id2, second) in &existing[i + 1..] {
                if token_sort_ratio(first, second) > threshold {
                    duplicates.insert(*id2);
                }
            }
        }

        if duplicates.is_empty() {
            debug!("No duplicates in {}", country);
            return Ok(Vec::new());
        }

        info!(
            "Found {} duplicates in {}. Removing...",
            duplicates.len(),
            country
        );
        {
            let mut stmt = tx.prepare("DELETE FROM institutions WHERE id = ?1")?;
            for id in &duplicates {
                stmt.execute(params![id])?;
            }
        }

        tx.commit()?;
        Ok(duplicates.into_iter().collect())
    }

    /// Recompute every stored search index from current `name`/`country`
    /// and rebuild the FTS5 table, in one transaction.
    ///
    /// The stored index is never read, so rows whose derived column was
    /// corrupted out of band are repaired too.
    pub fn rebuild_search_index(&self) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let sources = Self::load_index_sources(&tx)?;
        {
            let mut stmt = tx.prepare("UPDATE institutions SET search_index = ?2 WHERE id = ?1")?;
            for source in &sources {
                let index = self
                    .maintainer()
                    .expected_index(&source.name, &source.country)?;
                stmt.execute(params![source.id, index.to_json()?])?;
            }
        }

        FTS5Manager::new(&self.search_config).rebuild(&tx)?;
        tx.commit()?;

        info!("Rebuilt search index for {} institutions", sources.len());
        Ok(sources.len())
    }

    /// Ids whose stored index or FTS5 entry differs from a fresh derivation.
    ///
    /// A stored index that does not parse, or fields that no longer derive,
    /// count as drift.
    pub fn verify_search_index(&self) -> Result<Vec<i64>> {
        let conn = self.lock()?;

        let fts_tokens: HashMap<i64, Option<String>> = {
            let mut stmt = conn.prepare(&format!(
                "SELECT rowid, tokens FROM {}",
                self.search_config.table_name
            ))?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?))
            })?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut drifted = Vec::new();
        for source in Self::load_index_sources(&conn)? {
            let in_sync = match self.maintainer().expected_index(&source.name, &source.country) {
                Ok(expected) => {
                    let stored = SearchIndex::from_json(&source.stored).ok();
                    let expected_tokens: Vec<&str> = expected.tokens().collect();
                    let expected_tokens =
                        (!expected_tokens.is_empty()).then(|| expected_tokens.join(" "));

                    stored.as_ref() == Some(&expected)
                        && fts_tokens.get(&source.id) == Some(&expected_tokens)
                }
                Err(e) => {
                    warn!("Institution {} no longer derives: {}", source.id, e);
                    false
                }
            };

            if !in_sync {
                warn!("Search index drift for institution {}", source.id);
                drifted.push(source.id);
            }
        }

        Ok(drifted)
    }

    /// Count institutions per country, largest first.
    pub fn count_by_country(&self) -> Result<Vec<(String, usize)>> {
        let conn = self.lock()?;
        Self::grouped_counts(&conn, "country")
    }

    /// Summary counts for the directory and its FTS5 index.
    pub fn stats(&self) -> Result<DirectoryStats> {
        let conn = self.lock()?;
        let total: usize =
            conn.query_row("SELECT COUNT(*) FROM institutions", [], |row| row.get(0))?;

        Ok(DirectoryStats {
            total,
            by_country: Self::grouped_counts(&conn, "country")?,
            by_type: Self::grouped_counts(&conn, "type")?,
            search_index: FTS5Manager::new(&self.search_config).get_stats(&conn)?,
        })
    }

    /// Optimize the FTS5 index.
    pub fn optimize_search_index(&self) -> Result<()> {
        let conn = self.lock()?;
        FTS5Manager::new(&self.search_config).optimize(&conn)
    }

    /// Checkpoint the WAL file.
    pub fn checkpoint_wal(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        debug!("Checkpointed WAL");
        Ok(())
    }

    fn load_index_sources(conn: &Connection) -> Result<Vec<IndexSource>> {
        let mut stmt =
            conn.prepare("SELECT id, name, country, search_index FROM institutions ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(IndexSource {
                id: row.get(0)?,
                name: row.get(1)?,
                country: row.get(2)?,
                stored: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn grouped_counts(conn: &Connection, column: &str) -> Result<Vec<(String, usize)>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {c}, COUNT(*) AS n FROM institutions GROUP BY {c} ORDER BY n DESC, {c}",
            c = column
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

/// Similarity of two strings after lowercasing, splitting into words and
/// sorting them, scaled 0-100. Empty input scores 0.
pub fn token_sort_ratio(a: &str, b: &str) -> u8 {
    let a = sorted_tokens(a);
    let b = sorted_tokens(b);
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    (strsim::normalized_levenshtein(&a, &b) * 100.0).round() as u8
}

fn sorted_tokens(s: &str) -> String {
    let lowered = s.to_lowercase();
    let mut words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    words.sort_unstable();
    words.join(" ")
}
