//! Read-only coverage and data quality reports.
//!
//! Every report takes an optional country restriction (empty slice = all
//! countries) and runs as plain aggregate SQL over `institutions`.

use super::{conversion_error, now, parse_timestamp, InstitutionDirectory};
use crate::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;

/// Institutions per country and type, with website and coordinate coverage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageRow {
    pub country: String,
    #[serde(rename = "type")]
    pub institution_type: String,
    pub count: usize,
    pub with_website: usize,
    pub with_coordinates: usize,
    /// Newest `last_updated` in the group.
    pub last_updated: Option<DateTime<Utc>>,
}

/// Field completeness for one country.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletenessRow {
    pub country: String,
    pub total: usize,
    pub with_state: usize,
    pub with_city: usize,
    pub with_address: usize,
    pub with_website: usize,
    pub with_coordinates: usize,
}

impl CompletenessRow {
    /// Share of rows (0-100) for a count taken from this row.
    pub fn percent(&self, count: usize) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            count as f64 / self.total as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub completeness: Vec<CompletenessRow>,
    /// Per country, how many names appear on more than one row.
    pub duplicate_names: Vec<(String, usize)>,
}

/// Institutions per `additional_attributes.source` and type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRow {
    pub country: String,
    pub source: String,
    #[serde(rename = "type")]
    pub institution_type: String,
    pub count: usize,
}

/// Suspicious coordinates for one country, over rows that have both values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinateQuality {
    pub country: String,
    pub total_with_coordinates: usize,
    pub invalid_latitude: usize,
    pub invalid_longitude: usize,
    /// Rows placed exactly at (0, 0).
    pub null_island: usize,
}

/// Everything the `report` command prints.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryReport {
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub coverage: Vec<CoverageRow>,
    pub quality: QualityReport,
    pub sources: Vec<SourceRow>,
    pub coordinates: Option<Vec<CoordinateQuality>>,
}

/// `country IN (...)` for a non-empty restriction.
fn country_filter(countries: &[String]) -> Option<String> {
    if countries.is_empty() {
        return None;
    }
    let placeholders: Vec<_> = countries.iter().map(|_| "?").collect();
    Some(format!("country IN ({})", placeholders.join(",")))
}

fn where_clause(mut parts: Vec<String>, countries: &[String]) -> String {
    parts.extend(country_filter(countries));
    if parts.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", parts.join(" AND "))
    }
}

impl InstitutionDirectory {
    /// Counts per country and type with website/coordinate coverage and the
    /// newest update in each group.
    pub fn coverage_report(&self, countries: &[String]) -> Result<Vec<CoverageRow>> {
        let conn = self.lock()?;
        Self::coverage(&conn, countries)
    }

    /// Field completeness per country, plus repeated names per country.
    pub fn quality_report(&self, countries: &[String]) -> Result<QualityReport> {
        let conn = self.lock()?;
        Self::quality(&conn, countries)
    }

    /// Counts per source attribute and type. Rows without a `source`
    /// attribute are left out.
    pub fn source_analysis(&self, countries: &[String]) -> Result<Vec<SourceRow>> {
        let conn = self.lock()?;
        Self::sources(&conn, countries)
    }

    /// Out-of-range and (0, 0) coordinates per country.
    pub fn validate_coordinates(&self, countries: &[String]) -> Result<Vec<CoordinateQuality>> {
        let conn = self.lock()?;
        Self::coordinates(&conn, countries)
    }

    /// All reports over one consistent snapshot of the table.
    pub fn report(
        &self,
        countries: &[String],
        include_coordinates: bool,
    ) -> Result<DirectoryReport> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let coverage = Self::coverage(&tx, countries)?;
        let total: usize = coverage.iter().map(|row| row.count).sum();
        let quality = Self::quality(&tx, countries)?;
        let sources = Self::sources(&tx, countries)?;
        let coordinates = if include_coordinates {
            Some(Self::coordinates(&tx, countries)?)
        } else {
            None
        };
        tx.commit()?;

        debug!("Generated report over {} institutions", total);
        Ok(DirectoryReport {
            generated_at: now(),
            total,
            coverage,
            quality,
            sources,
            coordinates,
        })
    }

    fn coverage(conn: &Connection, countries: &[String]) -> Result<Vec<CoverageRow>> {
        let sql = format!(
            "SELECT country, type, COUNT(*),
                    COUNT(website),
                    COUNT(CASE WHEN latitude IS NOT NULL AND longitude IS NOT NULL THEN 1 END),
                    MAX(last_updated)
             FROM institutions {}
             GROUP BY country, type
             ORDER BY country, type",
            where_clause(Vec::new(), countries)
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(countries), |row| {
            let last_updated = row
                .get::<_, Option<String>>(5)?
                .map(|ts| parse_timestamp(&ts))
                .transpose()
                .map_err(|e| conversion_error(5, e))?;
            Ok(CoverageRow {
                country: row.get(0)?,
                institution_type: row.get(1)?,
                count: row.get(2)?,
                with_website: row.get(3)?,
                with_coordinates: row.get(4)?,
                last_updated,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn quality(conn: &Connection, countries: &[String]) -> Result<QualityReport> {
        let filter = where_clause(Vec::new(), countries);

        let completeness = {
            let sql = format!(
                "SELECT country, COUNT(*), COUNT(state), COUNT(city), COUNT(address),
                        COUNT(website),
                        COUNT(CASE WHEN latitude IS NOT NULL AND longitude IS NOT NULL THEN 1 END)
                 FROM institutions {}
                 GROUP BY country
                 ORDER BY country",
                filter
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(countries), |row| {
                Ok(CompletenessRow {
                    country: row.get(0)?,
                    total: row.get(1)?,
                    with_state: row.get(2)?,
                    with_city: row.get(3)?,
                    with_address: row.get(4)?,
                    with_website: row.get(5)?,
                    with_coordinates: row.get(6)?,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let duplicate_names = {
            let sql = format!(
                "SELECT country, COUNT(*) FROM (
                     SELECT country, name FROM institutions {}
                     GROUP BY country, name
                     HAVING COUNT(*) > 1
                 )
                 GROUP BY country
                 ORDER BY country",
                filter
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(countries), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        Ok(QualityReport {
            completeness,
            duplicate_names,
        })
    }

    fn sources(conn: &Connection, countries: &[String]) -> Result<Vec<SourceRow>> {
        // CAST keeps numeric source values comparable with text ones
        let sql = format!(
            "SELECT country,
                    CAST(json_extract(additional_attributes, '$.source') AS TEXT) AS source,
                    type, COUNT(*) AS n
             FROM institutions {}
             GROUP BY country, source, type
             ORDER BY country, n DESC, source, type",
            where_clause(
                vec!["json_extract(additional_attributes, '$.source') IS NOT NULL".to_string()],
                countries
            )
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(countries), |row| {
            Ok(SourceRow {
                country: row.get(0)?,
                source: row.get(1)?,
                institution_type: row.get(2)?,
                count: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn coordinates(conn: &Connection, countries: &[String]) -> Result<Vec<CoordinateQuality>> {
        let sql = format!(
            "SELECT country, COUNT(*),
                    COUNT(CASE WHEN latitude < -90 OR latitude > 90 THEN 1 END),
                    COUNT(CASE WHEN longitude < -180 OR longitude > 180 THEN 1 END),
                    COUNT(CASE WHEN latitude = 0 AND longitude = 0 THEN 1 END)
             FROM institutions {}
             GROUP BY country
             ORDER BY country",
            where_clause(
                vec![
                    "latitude IS NOT NULL".to_string(),
                    "longitude IS NOT NULL".to_string(),
                ],
                countries
            )
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(countries), |row| {
            Ok(CoordinateQuality {
                country: row.get(0)?,
                total_with_coordinates: row.get(1)?,
                invalid_latitude: row.get(2)?,
                invalid_longitude: row.get(3)?,
                null_island: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InstitutionType, NewInstitution};
    use serde_json::json;

    fn create_test_directory() -> InstitutionDirectory {
        let directory = InstitutionDirectory::open_in_memory().unwrap();
        directory
            .insert_batch(vec![
                NewInstitution::new("Mercy Hospital", InstitutionType::Hospital, "USA")
                    .with_state("CO")
                    .with_city("Denver")
                    .with_website("https://mercy.example")
                    .with_location(39.7, -104.9)
                    .with_attribute("source", json!("CMS")),
                NewInstitution::new("Mercy Hospital", InstitutionType::Hospital, "USA")
                    .with_city("Durango")
                    .with_location(0.0, 0.0)
                    .with_attribute("source", json!("CMS")),
                NewInstitution::new("Mayo Clinic", InstitutionType::Clinic, "USA")
                    .with_location(95.0, 200.0)
                    .with_attribute("source", json!("NPPES")),
                NewInstitution::new(
                    "Ontario Veterinary College",
                    InstitutionType::VeterinarySchool,
                    "Canada",
                )
                .with_address("50 Stone Rd E"),
            ])
            .unwrap();
        directory
    }

    #[test]
    fn test_coverage_report() {
        let directory = create_test_directory();

        let rows = directory.coverage_report(&[]).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].country, "Canada");

        let hospitals = rows
            .iter()
            .find(|r| r.country == "USA" && r.institution_type == "hospital")
            .unwrap();
        assert_eq!(hospitals.count, 2);
        assert_eq!(hospitals.with_website, 1);
        assert_eq!(hospitals.with_coordinates, 2);
        assert!(hospitals.last_updated.is_some());

        let rows = directory.coverage_report(&["Canada".to_string()]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].with_coordinates, 0);
    }

    #[test]
    fn test_quality_report() {
        let directory = create_test_directory();
        let report = directory.quality_report(&[]).unwrap();

        let usa = report
            .completeness
            .iter()
            .find(|r| r.country == "USA")
            .unwrap();
        assert_eq!(usa.total, 3);
        assert_eq!(usa.with_state, 1);
        assert_eq!(usa.with_city, 2);
        assert_eq!(usa.with_address, 0);
        assert_eq!(usa.with_coordinates, 3);
        assert!((usa.percent(usa.with_city) - 66.666).abs() < 0.01);

        assert_eq!(report.duplicate_names, vec![("USA".to_string(), 1)]);
    }

    #[test]
    fn test_source_analysis() {
        let directory = create_test_directory();
        let rows = directory.source_analysis(&["USA".to_string()]).unwrap();

        assert_eq!(
            rows,
            vec![
                SourceRow {
                    country: "USA".to_string(),
                    source: "CMS".to_string(),
                    institution_type: "hospital".to_string(),
                    count: 2,
                },
                SourceRow {
                    country: "USA".to_string(),
                    source: "NPPES".to_string(),
                    institution_type: "clinic".to_string(),
                    count: 1,
                },
            ]
        );
        assert!(directory
            .source_analysis(&["Canada".to_string()])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_validate_coordinates() {
        let directory = create_test_directory();
        let rows = directory.validate_coordinates(&[]).unwrap();

        assert_eq!(
            rows,
            vec![CoordinateQuality {
                country: "USA".to_string(),
                total_with_coordinates: 3,
                invalid_latitude: 1,
                invalid_longitude: 1,
                null_island: 1,
            }]
        );
    }

    #[test]
    fn test_full_report() {
        let directory = create_test_directory();

        let report = directory.report(&[], false).unwrap();
        assert_eq!(report.total, 4);
        assert!(report.coordinates.is_none());

        let report = directory.report(&["USA".to_string()], true).unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.coordinates.unwrap().len(), 1);
        assert_eq!(report.sources.len(), 2);
    }
}
