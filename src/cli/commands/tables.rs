//! Source table listing command

use std::path::PathBuf;

use crate::cli::commands::{load_config, open_source};
use crate::cli::error::CliError;
use crate::database::{DEDUP_KEY_CANDIDATES, resolve_dedup_key};
use crate::source::SqliteSource;

/// Tables command arguments
#[derive(Debug, Clone, Default)]
pub struct TablesArgs {
    /// Configuration file
    pub config: Option<PathBuf>,
}

/// One line of the tables listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableListing {
    pub name: String,
    pub selected: bool,
    pub columns: usize,
    /// Resolved dedup key, or why there is none
    pub dedup_key: String,
}

/// List every source table with its import readiness
pub fn handle_tables(args: &TablesArgs) -> Result<(), CliError> {
    let config = load_config(args.config.as_deref())?;
    let source = open_source(&config)?;
    let selected: Vec<String> = config
        .table_specs()
        .into_iter()
        .map(|spec| spec.name)
        .collect();

    let listings = list_tables(&source, &selected)?;
    println!("{}", format_listings(&listings));

    let missing: Vec<&String> = selected
        .iter()
        .filter(|name| !listings.iter().any(|l| &l.name == *name))
        .collect();
    for name in missing {
        eprintln!("Configured table not found in source: {}", name);
    }

    Ok(())
}

/// Describe every table in `source`
pub fn list_tables(
    source: &SqliteSource,
    selected: &[String],
) -> Result<Vec<TableListing>, CliError> {
    source
        .list_tables()?
        .into_iter()
        .map(|name| {
            let columns = source.read_columns(&name)?;
            let dedup_key = match resolve_dedup_key(&columns) {
                Some(key) => key.name.clone(),
                None => format!("none (needs one of {})", DEDUP_KEY_CANDIDATES.join(", ")),
            };
            Ok(TableListing {
                selected: selected.contains(&name),
                columns: columns.len(),
                dedup_key,
                name,
            })
        })
        .collect()
}

fn format_listings(listings: &[TableListing]) -> String {
    let width = listings
        .iter()
        .map(|l| l.name.len())
        .max()
        .unwrap_or(0)
        .max("table".len());

    let mut output = format!(
        "{:width$} | selected | columns | dedup_key\n",
        "table",
        width = width
    );
    output.push_str(&format!("{}-+----------+---------+----------\n", "-".repeat(width)));
    for listing in listings {
        output.push_str(&format!(
            "{:width$} | {:8} | {:7} | {}\n",
            listing.name,
            if listing.selected { "yes" } else { "no" },
            listing.columns,
            listing.dedup_key,
            width = width
        ));
    }
    output.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use tempfile::tempdir;

    #[test]
    fn test_list_tables_reports_keys_and_selection() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("export.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE steps_record_table (row_id INTEGER, count INTEGER);
             CREATE TABLE misc (a TEXT, b TEXT);",
        )
        .unwrap();
        drop(conn);

        let source = SqliteSource::open(&path).unwrap();
        let listings = list_tables(&source, &["steps_record_table".to_string()]).unwrap();

        assert_eq!(listings.len(), 2);
        let misc = &listings[0];
        assert_eq!(misc.name, "misc");
        assert!(!misc.selected);
        assert!(misc.dedup_key.starts_with("none"));

        let steps = &listings[1];
        assert!(steps.selected);
        assert_eq!(steps.columns, 2);
        assert_eq!(steps.dedup_key, "row_id");

        let output = format_listings(&listings);
        assert!(output.contains("steps_record_table | yes"));
    }
}
