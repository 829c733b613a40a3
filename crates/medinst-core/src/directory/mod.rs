//! SQLite-backed institution directory.
//!
//! Every write runs in a single `BEGIN IMMEDIATE` transaction: the row is
//! mutated in memory, the [`IndexMaintainer`] derives its search index, the
//! row is written, and the FTS5 triggers mirror the tokens. Dropping the
//! transaction on any error rolls all of it back.

mod maintenance;
mod reports;
mod search;

pub use maintenance::{token_sort_ratio, DirectoryStats};
pub use reports::{
    CompletenessRow, CoordinateQuality, CoverageRow, DirectoryReport, QualityReport, SourceRow,
};
pub use search::{SearchFilter, SearchResult};

use crate::config::{DirectoryConfig, SearchIndexConfig};
use crate::index::{FTS5Manager, IndexMaintainer, SearchIndex, WriteKind};
use crate::models::{
    AdditionalAttributes, Institution, InstitutionInput, InstitutionPatch, InstitutionType,
    NewInstitution,
};
use crate::{MedinstError, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Column list shared by every row-returning query.
pub(crate) const INSTITUTION_COLUMNS: &str = "id, name, type, country, state, city, address, \
     website, latitude, longitude, additional_attributes, last_updated, search_index";

/// SQLite institution directory with a write-path maintained search index.
#[derive(Debug)]
pub struct InstitutionDirectory {
    db_path: Option<PathBuf>,
    conn: Arc<Mutex<Connection>>,
    search_config: SearchIndexConfig,
    maintainer: IndexMaintainer,
}

impl InstitutionDirectory {
    /// Create or open a directory database at the given path.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_search_config(db_path, SearchIndexConfig::default())
    }

    /// Create or open a directory database with custom FTS5 settings.
    pub fn with_search_config(
        db_path: impl Into<PathBuf>,
        search_config: SearchIndexConfig,
    ) -> Result<Self> {
        search_config.validate()?;
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| MedinstError::io_with_path(e, parent))?;
            }
        }

        let conn = Connection::open(&db_path)?;
        Self::from_connection(conn, Some(db_path), search_config)
    }

    /// Open a private in-memory directory.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, None, SearchIndexConfig::default())
    }

    fn from_connection(
        conn: Connection,
        db_path: Option<PathBuf>,
        search_config: SearchIndexConfig,
    ) -> Result<Self> {
        Self::configure_connection(&conn)?;
        Self::ensure_schema(&conn)?;

        let directory = Self {
            db_path,
            conn: Arc::new(Mutex::new(conn)),
            search_config,
            maintainer: IndexMaintainer::default(),
        };

        directory.ensure_fts5()?;
        Ok(directory)
    }

    /// Configure connection with optimal settings.
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.busy_timeout(DirectoryConfig::BUSY_TIMEOUT)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
            ",
        )?;
        Ok(())
    }

    /// Ensure the base schema exists.
    fn ensure_schema(conn: &Connection) -> Result<()> {
        let categories: Vec<String> = InstitutionType::ALL
            .iter()
            .map(|t| format!("'{}'", t.as_str()))
            .collect();

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS institutions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    type TEXT NOT NULL CHECK (type IN ({})),
                    country TEXT NOT NULL,
                    state TEXT,
                    city TEXT,
                    address TEXT,
                    website TEXT,
                    latitude REAL,
                    longitude REAL,
                    additional_attributes TEXT
                        CHECK (additional_attributes IS NULL OR json_valid(additional_attributes)),
                    last_updated TEXT NOT NULL,
                    search_index TEXT NOT NULL CHECK (json_valid(search_index))
                )",
                categories.join(", ")
            ),
            [],
        )?;

        // Create indexes for common queries
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_institutions_country ON institutions(country, last_updated)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_institutions_name ON institutions(name)",
            [],
        )?;

        Ok(())
    }

    /// Ensure FTS5 virtual table and triggers exist.
    fn ensure_fts5(&self) -> Result<()> {
        let conn = self.lock()?;
        FTS5Manager::new(&self.search_config).ensure_setup(&conn)
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| MedinstError::lock_poisoned())
    }

    /// Get the database path (`None` for in-memory directories).
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn maintainer(&self) -> &IndexMaintainer {
        &self.maintainer
    }

    /// Insert a validated record.
    pub fn insert(&self, record: NewInstitution) -> Result<Institution> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let inserted = self.insert_in(&tx, record, now())?;

        tx.commit()?;
        debug!("Inserted institution {}: {}", inserted.id, inserted.name);
        Ok(inserted)
    }

    /// Insert many records in one transaction. Any failure rolls back the
    /// whole batch.
    pub fn insert_batch(&self, records: Vec<NewInstitution>) -> Result<Vec<Institution>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let timestamp = now();
        let mut inserted = Vec::with_capacity(records.len());
        for record in records {
            inserted.push(self.insert_in(&tx, record, timestamp)?);
        }

        tx.commit()?;
        debug!("Inserted batch of {} institutions", inserted.len());
        Ok(inserted)
    }

    /// Validate a raw collaborator payload and insert it.
    pub fn ingest(&self, input: InstitutionInput) -> Result<Institution> {
        let record = NewInstitution::try_from(input)?;
        self.insert(record)
    }

    fn insert_in(
        &self,
        conn: &Connection,
        record: NewInstitution,
        timestamp: DateTime<Utc>,
    ) -> Result<Institution> {
        record.validate()?;

        let mut row = record.into_row(timestamp);
        self.maintainer.on_write(&mut row, WriteKind::Insert)?;

        let additional_json = attributes_to_json(&row)?;
        conn.execute(
            "INSERT INTO institutions (name, type, country, state, city, address, website,
                                       latitude, longitude, additional_attributes,
                                       last_updated, search_index)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                row.name,
                row.institution_type.as_str(),
                row.country,
                row.state,
                row.city,
                row.address,
                row.website,
                row.latitude,
                row.longitude,
                additional_json,
                format_timestamp(&row.last_updated),
                row.search_index.to_json()?,
            ],
        )?;

        row.id = conn.last_insert_rowid();
        Ok(row)
    }

    /// Apply a patch to an existing record.
    ///
    /// `last_updated` is refreshed on every non-empty patch. The search index
    /// is re-derived whenever the patch sets `name` or `country`.
    pub fn update(&self, id: i64, patch: InstitutionPatch) -> Result<Institution> {
        patch.validate()?;

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut row =
            Self::fetch(&tx, id)?.ok_or(MedinstError::InstitutionNotFound { id })?;

        if patch.is_empty() {
            return Ok(row);
        }

        let kind = WriteKind::Update {
            touches_search_fields: patch.touches_search_fields(),
        };
        patch.apply_to(&mut row);
        row.last_updated = now();
        self.maintainer.on_write(&mut row, kind)?;

        let additional_json = attributes_to_json(&row)?;
        tx.execute(
            "UPDATE institutions SET
                 name = ?2, type = ?3, country = ?4, state = ?5, city = ?6,
                 address = ?7, website = ?8, latitude = ?9, longitude = ?10,
                 additional_attributes = ?11, last_updated = ?12, search_index = ?13
             WHERE id = ?1",
            params![
                row.id,
                row.name,
                row.institution_type.as_str(),
                row.country,
                row.state,
                row.city,
                row.address,
                row.website,
                row.latitude,
                row.longitude,
                additional_json,
                format_timestamp(&row.last_updated),
                row.search_index.to_json()?,
            ],
        )?;

        tx.commit()?;
        debug!("Updated institution {}", id);
        Ok(row)
    }

    /// Get an institution by ID.
    pub fn get(&self, id: i64) -> Result<Option<Institution>> {
        let conn = self.lock()?;
        Self::fetch(&conn, id)
    }

    fn fetch(conn: &Connection, id: i64) -> Result<Option<Institution>> {
        let result = conn
            .query_row(
                &format!("SELECT {} FROM institutions WHERE id = ?1", INSTITUTION_COLUMNS),
                params![id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(result)
    }

    /// Get the count of institutions.
    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: usize =
            conn.query_row("SELECT COUNT(*) FROM institutions", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Convert a row selected with [`INSTITUTION_COLUMNS`] to an `Institution`.
    pub(crate) fn row_to_record(row: &Row) -> rusqlite::Result<Institution> {
        let type_str: String = row.get(2)?;
        let institution_type = type_str
            .parse::<InstitutionType>()
            .map_err(|e| conversion_error(2, e))?;

        let additional_json: Option<String> = row.get(10)?;
        let additional_attributes: Option<AdditionalAttributes> = additional_json
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|e| conversion_error(10, e))?;

        let last_updated: String = row.get(11)?;
        let last_updated = parse_timestamp(&last_updated).map_err(|e| conversion_error(11, e))?;

        let search_json: String = row.get(12)?;
        let search_index =
            SearchIndex::from_json(&search_json).map_err(|e| conversion_error(12, e))?;

        Ok(Institution {
            id: row.get(0)?,
            name: row.get(1)?,
            institution_type,
            country: row.get(3)?,
            state: row.get(4)?,
            city: row.get(5)?,
            address: row.get(6)?,
            website: row.get(7)?,
            latitude: row.get(8)?,
            longitude: row.get(9)?,
            additional_attributes,
            last_updated,
            search_index,
        })
    }
}

fn attributes_to_json(row: &Institution) -> Result<Option<String>> {
    Ok(row
        .additional_attributes
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?)
}

/// Current time at the precision the database stores.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339, so lexical order is chronological order.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

pub(crate) fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}
