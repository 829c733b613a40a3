//! Command dispatch.

use crate::Command;
use anyhow::{bail, Context, Result};
use medinst_core::{
    InstitutionDirectory, InstitutionInput, InstitutionType, NewInstitution, SearchFilter,
};
use serde_json::{json, Value};
use std::path::Path;
use tracing::info;

/// Run one command against an open directory and return its JSON output.
pub(crate) fn run(directory: &InstitutionDirectory, command: Command) -> Result<Value> {
    match command {
        Command::Import { file } => import(directory, &file),

        Command::Search {
            query,
            countries,
            types,
            limit,
            offset,
        } => {
            let mut filter = SearchFilter::new();
            for country in countries {
                filter = filter.country(country);
            }
            for t in types {
                filter = filter.institution_type(t.parse::<InstitutionType>()?);
            }
            let result = directory.search(&query, &filter, limit, offset)?;
            Ok(serde_json::to_value(result)?)
        }

        Command::Get { id } => match directory.get(id)? {
            Some(record) => Ok(serde_json::to_value(record)?),
            None => bail!("Institution {} not found", id),
        },

        Command::Stats => Ok(serde_json::to_value(directory.stats()?)?),

        Command::Report {
            countries,
            validate_coords,
        } => {
            let countries: Vec<String> = countries.iter().map(|c| c.trim().to_string()).collect();
            let report = directory.report(&countries, validate_coords)?;
            Ok(serde_json::to_value(report)?)
        }

        Command::NeedsRefresh {
            country,
            refresh_days,
        } => {
            let needs_refresh = directory.needs_refresh(&country, refresh_days)?;
            Ok(json!({ "country": country, "needs_refresh": needs_refresh }))
        }

        Command::Dedupe { country, threshold } => {
            let removed = directory.deduplicate(&country, threshold)?;
            Ok(json!({ "country": country, "removed": removed }))
        }

        Command::RebuildIndex => {
            let rebuilt = directory.rebuild_search_index()?;
            directory.optimize_search_index()?;
            Ok(json!({ "rebuilt": rebuilt }))
        }

        Command::VerifyIndex => {
            let stale = directory.verify_search_index()?;
            Ok(json!({ "in_sync": stale.is_empty(), "stale": stale }))
        }
    }
}

fn import(directory: &InstitutionDirectory, file: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let records = parse_inputs(&text)?
        .into_iter()
        .enumerate()
        .map(|(i, input)| {
            NewInstitution::try_from(input).with_context(|| format!("Record {} is invalid", i + 1))
        })
        .collect::<Result<Vec<_>>>()?;

    let inserted = directory.insert_batch(records)?;
    directory.checkpoint_wal()?;
    info!("Imported {} institutions from {}", inserted.len(), file.display());

    let ids: Vec<i64> = inserted.iter().map(|r| r.id).collect();
    Ok(json!({ "imported": ids.len(), "ids": ids }))
}

/// Parse a JSON array, or one JSON object per line.
pub(crate) fn parse_inputs(text: &str) -> Result<Vec<InstitutionInput>> {
    if text.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(text)?);
    }

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("Line {} is not valid JSON", n + 1))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const JSONL: &str = r#"{"name": "Mayo Clinic", "type": "clinic", "country": "USA"}

{"name": "Ontario Veterinary College", "type": "veterinary_school", "country": "Canada", "city": "Guelph"}
"#;

    #[test]
    fn test_parse_json_lines() {
        let inputs = parse_inputs(JSONL).unwrap();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[1].city.as_deref(), Some("Guelph"));
    }

    #[test]
    fn test_parse_json_array() {
        let inputs =
            parse_inputs(r#"[{"name": "Mayo Clinic", "type": "clinic", "country": "USA"}]"#)
                .unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].name, "Mayo Clinic");
    }

    #[test]
    fn test_parse_reports_bad_line() {
        let err = parse_inputs("{\"name\": \"x\"\nnot json").unwrap_err();
        assert!(err.to_string().contains("Line 1"));
    }

    #[test]
    fn test_import_then_search() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("institutions.jsonl");
        std::fs::write(&file, JSONL).unwrap();
        let directory = InstitutionDirectory::new(temp_dir.path().join("test.db")).unwrap();

        let output = run(&directory, Command::Import { file }).unwrap();
        assert_eq!(output["imported"], 2);

        let output = run(
            &directory,
            Command::Search {
                query: "veterinary".to_string(),
                countries: Vec::new(),
                types: vec!["veterinary_school".to_string()],
                limit: 10,
                offset: 0,
            },
        )
        .unwrap();
        assert_eq!(output["total_count"], 1);
        assert_eq!(output["institutions"][0]["city"], "Guelph");
    }

    #[test]
    fn test_report_after_import() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("institutions.jsonl");
        std::fs::write(&file, JSONL).unwrap();
        let directory = InstitutionDirectory::new(temp_dir.path().join("test.db")).unwrap();
        run(&directory, Command::Import { file }).unwrap();

        let output = run(
            &directory,
            Command::Report {
                countries: vec!["Canada".to_string()],
                validate_coords: true,
            },
        )
        .unwrap();
        assert_eq!(output["total"], 1);
        assert_eq!(output["coverage"][0]["type"], "veterinary_school");
        assert_eq!(output["quality"]["completeness"][0]["with_city"], 1);
        assert_eq!(output["coordinates"], json!([]));
    }

    #[test]
    fn test_import_with_unknown_type_imports_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("bad.json");
        std::fs::write(
            &file,
            r#"[{"name": "Mayo Clinic", "type": "clinic", "country": "USA"},
                {"name": "Smile Co", "type": "dentist_office", "country": "USA"}]"#,
        )
        .unwrap();
        let directory = InstitutionDirectory::new(temp_dir.path().join("test.db")).unwrap();

        let err = run(&directory, Command::Import { file }).unwrap_err();
        assert!(err.to_string().contains("Record 2"));
        assert_eq!(directory.count().unwrap(), 0);
    }
}
