//! FTS5 inverted index over the derived search tokens.
//!
//! The `institutions.search_index` column is computed in Rust before each
//! write commits. The triggers below mirror its token set into an FTS5 table
//! keyed by the institution id, inside the same transaction as the row write.

use crate::config::SearchIndexConfig;
use crate::Result;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

/// Manager for FTS5 setup and maintenance.
pub struct FTS5Manager<'a> {
    config: &'a SearchIndexConfig,
}

impl<'a> FTS5Manager<'a> {
    /// Create a new FTS5 manager.
    pub fn new(config: &'a SearchIndexConfig) -> Self {
        Self { config }
    }

    /// Check if the FTS5 table exists.
    pub fn table_exists(&self, conn: &Connection) -> Result<bool> {
        let count: i32 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [&self.config.table_name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Check if all three sync triggers exist.
    pub fn triggers_exist(&self, conn: &Connection) -> Result<bool> {
        let names: Vec<String> = ["ai", "au", "ad"]
            .iter()
            .map(|suffix| format!("{}_{}", self.config.table_name, suffix))
            .collect();
        let count: i32 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='trigger' AND name IN (?1, ?2, ?3)",
            [&names[0], &names[1], &names[2]],
            |row| row.get(0),
        )?;
        Ok(count == 3)
    }

    /// Ensure FTS5 is fully set up.
    pub fn ensure_setup(&self, conn: &Connection) -> Result<()> {
        if !self.table_exists(conn)? {
            self.create_table(conn)?;
            self.populate_from_institutions(conn)?;
        } else if !self.triggers_exist(conn)? {
            // Table exists but triggers missing - rows may have drifted
            self.populate_from_institutions(conn)?;
        }

        self.create_triggers(conn)?;
        Ok(())
    }

    /// Create the FTS5 virtual table. The FTS rowid is the institution id.
    pub fn create_table(&self, conn: &Connection) -> Result<()> {
        let sql = format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS {} USING fts5(
                tokens,
                tokenize='{}'
            )",
            self.config.table_name, self.config.tokenizer
        );

        conn.execute(&sql, [])?;
        info!("Created FTS5 table: {}", self.config.table_name);
        Ok(())
    }

    /// Create triggers to keep FTS5 in sync with the derived column.
    pub fn create_triggers(&self, conn: &Connection) -> Result<()> {
        let table = &self.config.table_name;

        let insert_trigger = format!(
            "CREATE TRIGGER IF NOT EXISTS {table}_ai AFTER INSERT ON institutions BEGIN
                INSERT INTO {table} (rowid, tokens) VALUES (
                    NEW.id,
                    (SELECT GROUP_CONCAT(key, ' ') FROM json_each(NEW.search_index))
                );
            END"
        );
        conn.execute(&insert_trigger, [])?;

        // Only writes that set the derived column touch the inverted index.
        let update_trigger = format!(
            "CREATE TRIGGER IF NOT EXISTS {table}_au AFTER UPDATE OF search_index ON institutions BEGIN
                DELETE FROM {table} WHERE rowid = OLD.id;
                INSERT INTO {table} (rowid, tokens) VALUES (
                    NEW.id,
                    (SELECT GROUP_CONCAT(key, ' ') FROM json_each(NEW.search_index))
                );
            END"
        );
        conn.execute(&update_trigger, [])?;

        let delete_trigger = format!(
            "CREATE TRIGGER IF NOT EXISTS {table}_ad AFTER DELETE ON institutions BEGIN
                DELETE FROM {table} WHERE rowid = OLD.id;
            END"
        );
        conn.execute(&delete_trigger, [])?;

        debug!("Created FTS5 triggers for {}", table);
        Ok(())
    }

    /// Populate FTS5 from the stored `search_index` column.
    pub fn populate_from_institutions(&self, conn: &Connection) -> Result<()> {
        let table = &self.config.table_name;

        conn.execute_batch(&format!("DELETE FROM {};", table))?;

        let sql = format!(
            "INSERT INTO {} (rowid, tokens)
             SELECT
                 id,
                 (SELECT GROUP_CONCAT(key, ' ') FROM json_each(search_index))
             FROM institutions",
            table
        );
        let rows = conn.execute(&sql, [])?;

        info!("Populated FTS5 table from {} institutions", rows);
        Ok(())
    }

    /// Drop and recreate the FTS5 table and its triggers.
    pub fn rebuild(&self, conn: &Connection) -> Result<()> {
        let table = &self.config.table_name;

        conn.execute(&format!("DROP TABLE IF EXISTS {}", table), [])?;
        for suffix in ["ai", "au", "ad"] {
            conn.execute(&format!("DROP TRIGGER IF EXISTS {}_{}", table, suffix), [])?;
        }

        self.create_table(conn)?;
        self.create_triggers(conn)?;
        self.populate_from_institutions(conn)?;

        info!("Rebuilt FTS5 index");
        Ok(())
    }

    /// Optimize the FTS5 index.
    pub fn optimize(&self, conn: &Connection) -> Result<()> {
        let sql = format!(
            "INSERT INTO {}({}) VALUES('optimize')",
            self.config.table_name, self.config.table_name
        );
        conn.execute(&sql, [])?;
        debug!("Optimized FTS5 index");
        Ok(())
    }

    /// Get statistics about the FTS5 index.
    pub fn get_stats(&self, conn: &Connection) -> Result<FTS5Stats> {
        let row_count: usize = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.config.table_name),
            [],
            |row| row.get(0),
        )?;

        Ok(FTS5Stats {
            table_name: self.config.table_name.clone(),
            row_count,
            tokenizer: self.config.tokenizer.clone(),
        })
    }
}

/// Statistics about an FTS5 index.
#[derive(Debug, Clone, Serialize)]
pub struct FTS5Stats {
    pub table_name: String,
    pub row_count: usize,
    pub tokenizer: String,
}
