//! Destination schema mapping
//!
//! Translates a source table's columns into a destination table definition
//! through the fixed type table in [`ColumnType`], and guarantees the
//! destination table exists before any row is written. Existing tables are
//! never altered.

use tracing::{debug, info, warn};

use super::dedup::resolve_dedup_key;
use super::sync::ImportError;
use super::{DatabaseError, DestinationWriter};
use crate::models::{ColumnDef, TableData};

/// PostgreSQL limit on bind parameters in one statement
pub const MAX_BIND_PARAMETERS: usize = 65_535;

/// Definition of a destination table to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    /// Table name
    pub name: String,
    /// Columns with their destination types
    pub columns: Vec<ColumnDef>,
    /// Column carrying the unique dedup index
    pub dedup_key: String,
}

impl TableDef {
    /// Build the destination definition for a source table
    ///
    /// Column types go through [`crate::models::ColumnType::postgres_type`];
    /// the declared type is rewritten to the destination type.
    pub fn from_source(source: &TableData, dedup_key: &str) -> Self {
        Self {
            name: source.name.clone(),
            columns: source
                .columns
                .iter()
                .map(|c| ColumnDef::new(c.name.clone(), c.column_type))
                .collect(),
            dedup_key: dedup_key.to_string(),
        }
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this definition
    pub fn create_table_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                format!(
                    "{} {}",
                    quote_identifier(&c.name),
                    c.column_type.postgres_type()
                )
            })
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_identifier(&self.name),
            columns
        )
    }

    /// `CREATE UNIQUE INDEX IF NOT EXISTS` statement for the dedup key
    pub fn unique_index_sql(&self) -> String {
        unique_index_sql(&self.name, &self.dedup_key)
    }
}

/// Outcome of ensuring the destination table for one source table
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationTable {
    /// Table name
    pub name: String,
    /// Destination columns that will be written, with destination types
    pub columns: Vec<ColumnDef>,
    /// For each entry of `columns`, the index of the matching source column
    pub source_indices: Vec<usize>,
    /// Dedup key column with its destination type
    pub dedup_key: ColumnDef,
    /// Whether the table was created (or, in a dry run, would be)
    pub created: bool,
    /// Source columns that the existing destination table lacks
    pub dropped_columns: Vec<String>,
}

/// Ensure the destination table for `source` exists and is keyed on `dedup_key`
///
/// Creates the table when absent. When present, validates that it carries
/// the dedup key column and that it resolves to the same key on its own
/// columns; fails with [`ImportError::SchemaMismatch`] otherwise. In a dry
/// run no statement is issued.
pub async fn ensure_destination_table<D>(
    destination: &D,
    source: &TableData,
    dedup_key: &str,
    dry_run: bool,
) -> Result<DestinationTable, ImportError>
where
    D: DestinationWriter + ?Sized,
{
    let table = source.name.as_str();

    let Some(existing) = destination.describe_table(table).await? else {
        let def = TableDef::from_source(source, dedup_key);
        if dry_run {
            debug!(table, "Dry run: would create destination table");
        } else {
            destination.create_table(&def).await?;
            info!(table, dedup_key, columns = def.columns.len(), "Created destination table");
        }

        let key = def
            .columns
            .iter()
            .find(|c| c.name == dedup_key)
            .cloned()
            .ok_or_else(|| ImportError::SchemaMismatch {
                table: table.to_string(),
                reason: format!("dedup key `{}` is not a source column", dedup_key),
            })?;

        return Ok(DestinationTable {
            name: def.name,
            source_indices: (0..def.columns.len()).collect(),
            columns: def.columns,
            dedup_key: key,
            created: true,
            dropped_columns: Vec::new(),
        });
    };

    let Some(key) = existing.iter().find(|c| c.name == dedup_key).cloned() else {
        return Err(ImportError::SchemaMismatch {
            table: table.to_string(),
            reason: format!(
                "destination table has no `{}` column to deduplicate on",
                dedup_key
            ),
        });
    };

    if let Some(resolved) = resolve_dedup_key(&existing)
        && resolved.name != dedup_key
    {
        return Err(ImportError::SchemaMismatch {
            table: table.to_string(),
            reason: format!(
                "destination is keyed on `{}` but the source now resolves to `{}`",
                resolved.name, dedup_key
            ),
        });
    }

    let mut columns = Vec::new();
    let mut source_indices = Vec::new();
    let mut dropped_columns = Vec::new();
    for (index, column) in source.columns.iter().enumerate() {
        match existing.iter().find(|c| c.name == column.name) {
            Some(destination_column) => {
                columns.push(destination_column.clone());
                source_indices.push(index);
            }
            None => dropped_columns.push(column.name.clone()),
        }
    }

    if !dropped_columns.is_empty() {
        warn!(
            table,
            columns = ?dropped_columns,
            "Source columns missing from destination table will not be imported"
        );
    }

    if !dry_run {
        match destination.ensure_unique_key(table, dedup_key).await {
            Ok(()) => {}
            Err(DatabaseError::ConnectionFailed(e)) => {
                return Err(ImportError::ConnectionError(e));
            }
            Err(e) => warn!(
                table,
                dedup_key,
                error = %e,
                "Could not enforce uniqueness of dedup key; relying on import-side dedup"
            ),
        }
    }

    Ok(DestinationTable {
        name: table.to_string(),
        columns,
        source_indices,
        dedup_key: key,
        created: false,
        dropped_columns,
    })
}

/// Quote an identifier for SQLite and PostgreSQL
///
/// Wraps in double quotes and doubles any embedded double quote.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Name of the unique index guarding a table's dedup key
pub fn unique_index_name(table: &str, column: &str) -> String {
    format!("{}_{}_dedup_key", table, column)
}

/// `CREATE UNIQUE INDEX IF NOT EXISTS` statement for a dedup key column
pub fn unique_index_sql(table: &str, column: &str) -> String {
    format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
        quote_identifier(&unique_index_name(table, column)),
        quote_identifier(table),
        quote_identifier(column)
    )
}

/// Set-returning query for the dedup key values stored in a table
pub fn existing_keys_sql(table: &str, column: &str) -> String {
    let column = quote_identifier(column);
    format!(
        "SELECT DISTINCT {} FROM {} WHERE {} IS NOT NULL",
        column,
        quote_identifier(table),
        column
    )
}

/// Multi-row `INSERT` statement with `$n` placeholders
pub fn insert_sql(table: &str, columns: &[ColumnDef], row_count: usize) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_identifier(&c.name))
        .collect::<Vec<_>>()
        .join(", ");

    let width = columns.len();
    let values = (0..row_count)
        .map(|row| {
            let placeholders = (1..=width)
                .map(|col| format!("${}", row * width + col))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({})", placeholders)
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_identifier(table),
        column_list,
        values
    )
}

/// Largest number of rows one `INSERT` of `column_count` columns may carry
pub fn rows_per_statement(column_count: usize) -> usize {
    (MAX_BIND_PARAMETERS / column_count.max(1)).max(1)
}
