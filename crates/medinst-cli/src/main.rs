//! Medinst CLI - operator tool for the institutions directory.
//!
//! Every command opens the directory database, runs one operation and prints
//! its result as JSON on stdout. Logs go to stderr.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use medinst_core::{DirectoryConfig, InstitutionDirectory};
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "medinst")]
#[command(about = "Directory of medical and veterinary institutions")]
struct Args {
    /// Database file (defaults to <data dir>/medinst/institutions.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import institutions from a JSON array or JSON Lines file
    Import {
        file: PathBuf,
    },

    /// Keyword search over name and country
    Search {
        query: String,

        /// Restrict to a country (repeatable)
        #[arg(long = "country")]
        countries: Vec<String>,

        /// Restrict to an institution type (repeatable)
        #[arg(long = "type")]
        types: Vec<String>,

        #[arg(long, default_value_t = DirectoryConfig::DEFAULT_SEARCH_LIMIT)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Show one institution
    Get {
        id: i64,
    },

    /// Counts by country and type plus search index status
    Stats,

    /// Coverage, completeness and source report
    Report {
        /// Restrict to a country (repeatable)
        #[arg(long = "country")]
        countries: Vec<String>,

        /// Also check coordinates for out-of-range and (0, 0) values
        #[arg(long)]
        validate_coords: bool,
    },

    /// Check whether a country's data is stale
    NeedsRefresh {
        #[arg(long)]
        country: String,

        #[arg(long, default_value_t = DirectoryConfig::DEFAULT_REFRESH_DAYS)]
        refresh_days: u32,
    },

    /// Remove near-duplicate institutions within a country
    Dedupe {
        #[arg(long)]
        country: String,

        /// Similarity score (0-100) above which two records are duplicates
        #[arg(long, default_value_t = DirectoryConfig::DEDUP_SIMILARITY_THRESHOLD)]
        threshold: u8,
    },

    /// Recompute every search index and rebuild the FTS5 table
    RebuildIndex,

    /// List institutions whose stored search index is out of date
    VerifyIndex,
}

fn default_db_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().context("Could not determine the user data directory")?;
    Ok(data_dir
        .join(DirectoryConfig::APP_NAME)
        .join(DirectoryConfig::DB_FILE_NAME))
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let db_path = match args.db {
        Some(path) => path,
        None => default_db_path()?,
    };
    debug!("Using database {}", db_path.display());

    let directory = InstitutionDirectory::new(&db_path)
        .with_context(|| format!("Failed to open {}", db_path.display()))?;

    let output = commands::run(&directory, args.command)?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_with_filters() {
        let args = Args::try_parse_from([
            "medinst", "search", "general hospital", "--country", "USA", "--country", "MEX",
            "--type", "hospital", "--limit", "5",
        ])
        .unwrap();

        match args.command {
            Command::Search {
                query,
                countries,
                types,
                limit,
                offset,
            } => {
                assert_eq!(query, "general hospital");
                assert_eq!(countries, vec!["USA", "MEX"]);
                assert_eq!(types, vec!["hospital"]);
                assert_eq!(limit, 5);
                assert_eq!(offset, 0);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args =
            Args::try_parse_from(["medinst", "stats", "--db", "/tmp/x.db", "--debug"]).unwrap();
        assert_eq!(args.db, Some(PathBuf::from("/tmp/x.db")));
        assert!(args.debug);
    }

    #[test]
    fn test_parse_report() {
        let args = Args::try_parse_from([
            "medinst",
            "report",
            "--country",
            "IND",
            "--validate-coords",
        ])
        .unwrap();
        match args.command {
            Command::Report {
                countries,
                validate_coords,
            } => {
                assert_eq!(countries, vec!["IND"]);
                assert!(validate_coords);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_defaults_from_config() {
        let args = Args::try_parse_from(["medinst", "dedupe", "--country", "USA"]).unwrap();
        match args.command {
            Command::Dedupe { threshold, .. } => {
                assert_eq!(threshold, DirectoryConfig::DEDUP_SIMILARITY_THRESHOLD)
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
