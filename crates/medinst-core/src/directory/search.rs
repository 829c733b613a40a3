//! Keyword search over the FTS5 inverted index.

use super::{InstitutionDirectory, INSTITUTION_COLUMNS};
use crate::index::build_fts5_query;
use crate::models::{Institution, InstitutionType};
use crate::Result;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

/// Search result from the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Matching institutions, best match first.
    pub institutions: Vec<Institution>,
    /// Matches before pagination.
    pub total_count: usize,
    pub query_time_ms: f64,
    /// The FTS5 query that ran (empty for browse mode).
    pub query: String,
}

/// Optional restrictions applied on top of the keyword match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    pub countries: Vec<String>,
    pub types: Vec<InstitutionType>,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.countries.push(country.into());
        self
    }

    pub fn institution_type(mut self, institution_type: InstitutionType) -> Self {
        self.types.push(institution_type);
        self
    }

    /// Append `AND ...` clauses for this filter over the `institutions` table.
    fn push_clauses(
        &self,
        where_parts: &mut Vec<String>,
        params: &mut Vec<Box<dyn rusqlite::ToSql>>,
    ) {
        if !self.countries.is_empty() {
            let placeholders: Vec<_> = self.countries.iter().map(|_| "?").collect();
            where_parts.push(format!("institutions.country IN ({})", placeholders.join(",")));
            for c in &self.countries {
                params.push(Box::new(c.clone()));
            }
        }

        if !self.types.is_empty() {
            let placeholders: Vec<_> = self.types.iter().map(|_| "?").collect();
            where_parts.push(format!("institutions.type IN ({})", placeholders.join(",")));
            for t in &self.types {
                params.push(Box::new(t.as_str()));
            }
        }
    }
}

impl InstitutionDirectory {
    /// Search institutions by keyword.
    ///
    /// The query goes through the same analyzer as the stored index and
    /// matches any of its tokens, ranked by BM25. A blank query lists every
    /// institution that passes the filter, most recently updated first.
    pub fn search(
        &self,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
        offset: usize,
    ) -> Result<SearchResult> {
        let start = Instant::now();

        let conn = self.lock()?;

        let (institutions, total_count, fts5_query) = if query.trim().is_empty() {
            let (institutions, total_count) = Self::search_all(&conn, filter, limit, offset)?;
            (institutions, total_count, String::new())
        } else {
            let tokens = self.maintainer().analyzer().query_tokens(query);
            if tokens.is_empty() {
                // Only stop words: nothing can match
                (Vec::new(), 0, String::new())
            } else {
                let fts5_query = build_fts5_query(&tokens);
                let (institutions, total_count) =
                    self.search_fts5(&conn, &fts5_query, filter, limit, offset)?;
                (institutions, total_count, fts5_query)
            }
        };

        let query_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        debug!(
            "Search {:?} matched {} institutions in {:.2}ms",
            query, total_count, query_time_ms
        );

        Ok(SearchResult {
            institutions,
            total_count,
            query_time_ms,
            query: fts5_query,
        })
    }

    /// List institutions without a keyword match.
    fn search_all(
        conn: &Connection,
        filter: &SearchFilter,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Institution>, usize)> {
        let mut where_parts = vec!["1=1".to_string()];
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        filter.push_clauses(&mut where_parts, &mut params_vec);
        let where_clause = where_parts.join(" AND ");

        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        let count_sql = format!("SELECT COUNT(*) FROM institutions WHERE {}", where_clause);
        let total_count: usize =
            conn.query_row(&count_sql, params_refs.as_slice(), |row| row.get(0))?;

        let sql = format!(
            "SELECT {} FROM institutions WHERE {} \
             ORDER BY last_updated DESC, id LIMIT {} OFFSET {}",
            INSTITUTION_COLUMNS, where_clause, limit, offset
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_refs.as_slice(), Self::row_to_record)?;

        let institutions = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok((institutions, total_count))
    }

    /// Match against the FTS5 table, best BM25 rank first.
    fn search_fts5(
        &self,
        conn: &Connection,
        fts5_query: &str,
        filter: &SearchFilter,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Institution>, usize)> {
        let table_name = &self.search_config.table_name;

        let mut where_parts = vec![format!("{} MATCH ?", table_name)];
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(fts5_query.to_string())];
        filter.push_clauses(&mut where_parts, &mut params_vec);
        let where_clause = where_parts.join(" AND ");

        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        let count_sql = format!(
            "SELECT COUNT(*) FROM {t} JOIN institutions ON institutions.id = {t}.rowid WHERE {w}",
            t = table_name,
            w = where_clause
        );
        let total_count: usize =
            conn.query_row(&count_sql, params_refs.as_slice(), |row| row.get(0))?;

        let columns: Vec<String> = INSTITUTION_COLUMNS
            .split(", ")
            .map(|c| format!("institutions.{}", c.trim()))
            .collect();
        let sql = format!(
            "SELECT {cols} FROM {t} JOIN institutions ON institutions.id = {t}.rowid \
             WHERE {w} ORDER BY {t}.rank, institutions.id LIMIT {limit} OFFSET {offset}",
            cols = columns.join(", "),
            t = table_name,
            w = where_clause,
            limit = limit,
            offset = offset
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_refs.as_slice(), Self::row_to_record)?;

        let institutions = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok((institutions, total_count))
    }
}
