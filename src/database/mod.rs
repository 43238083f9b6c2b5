//! Destination database layer
//!
//! This module provides:
//! - The [`DestinationWriter`] seam the import engine writes through
//! - PostgreSQL: the production destination (feature `postgres-backend`)
//! - Schema mapping, dedup key resolution and the per-table import engine
//! - Configuration loading for a run

use async_trait::async_trait;
use std::collections::HashSet;

#[cfg(feature = "postgres-backend")]
pub mod postgres;

pub mod config;
pub mod dedup;
pub mod schema;
pub mod sync;

#[cfg(feature = "postgres-backend")]
pub use self::postgres::PostgresBackend;

pub use config::ImporterConfig;
pub use dedup::{DEDUP_KEY_CANDIDATES, resolve_dedup_key};
pub use schema::{DestinationTable, TableDef};
pub use sync::{ImportEngine, ImportError, ImportOptions, ImportResult, RunStatus, RunSummary};

use crate::models::{ColumnDef, KeyValue, Row};

/// Error type for destination operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Failed to connect, or the connection was lost
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Table or index creation failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A bulk insert was rejected and rolled back
    #[error("Insert failed: {0}")]
    InsertFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
}

/// Result type for destination operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Destination writer trait
///
/// The persistence boundary of an import run. Implementations own their
/// connection for the whole run. Every method is a single round trip (or a
/// single transaction for [`DestinationWriter::insert_rows`]); none of them
/// retries.
#[async_trait(?Send)]
pub trait DestinationWriter: Send + Sync {
    /// Describe an existing destination table
    ///
    /// # Returns
    /// Column definitions in ordinal order, or `None` if the table does not exist
    async fn describe_table(&self, table: &str) -> DatabaseResult<Option<Vec<ColumnDef>>>;

    /// Create a table with if-not-exists semantics, together with a unique
    /// index on its dedup key column
    async fn create_table(&self, table: &TableDef) -> DatabaseResult<()>;

    /// Ensure a unique index exists on the dedup key column of an existing table
    async fn ensure_unique_key(&self, table: &str, column: &str) -> DatabaseResult<()>;

    /// Fetch every dedup key value currently stored in a table
    ///
    /// Issued as one set-returning query. Values are coerced to the type of
    /// `key` before canonicalisation; nulls are never returned.
    async fn existing_keys(&self, table: &str, key: &ColumnDef)
    -> DatabaseResult<HashSet<KeyValue>>;

    /// Insert rows atomically
    ///
    /// # Arguments
    /// * `table` - Destination table name
    /// * `columns` - Destination columns, in the order values appear in each row
    /// * `rows` - Rows already coerced to the column types
    ///
    /// # Returns
    /// Number of rows inserted. On error nothing has been committed.
    async fn insert_rows(
        &self,
        table: &str,
        columns: &[ColumnDef],
        rows: &[Row],
    ) -> DatabaseResult<u64>;

    /// Get the backend type name
    fn backend_type(&self) -> &'static str;

    /// Close the connection
    async fn close(&self) -> DatabaseResult<()>;
}

/// Output format for run summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// ASCII table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Format a run summary for display
pub fn format_run_summary(summary: &RunSummary, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(summary).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Table => format_as_table(summary),
    }
}

fn format_as_table(summary: &RunSummary) -> String {
    const HEADER: [&str; 7] = [
        "table",
        "seen",
        "inserted",
        "duplicates",
        "null_key",
        "failed",
        "status",
    ];

    let rows: Vec<[String; 7]> = summary
        .tables
        .iter()
        .map(|r| {
            [
                r.table.clone(),
                r.seen.to_string(),
                r.inserted.to_string(),
                r.skipped_duplicates.to_string(),
                r.skipped_null_key.to_string(),
                r.failed.to_string(),
                r.status.to_string(),
            ]
        })
        .collect();

    // Calculate column widths
    let mut widths: Vec<usize> = HEADER.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let mut output = String::new();

    let header: Vec<String> = HEADER
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
        .collect();
    output.push_str(header.join(" | ").trim_end());
    output.push('\n');

    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    output.push_str(&separator.join("-+-"));
    output.push('\n');

    for row in &rows {
        let values: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| format!("{:width$}", cell, width = widths[i]))
            .collect();
        output.push_str(values.join(" | ").trim_end());
        output.push('\n');
    }

    let verb = if summary.dry_run {
        "would insert"
    } else {
        "inserted"
    };
    output.push_str(&format!(
        "run {}: {} ({} rows {}, {} tables, {}ms)",
        summary.run_id,
        summary.status,
        summary.total_inserted(),
        verb,
        summary.tables.len(),
        summary.duration_ms
    ));
    if let Some(reason) = &summary.aborted {
        output.push_str(&format!("\naborted: {}", reason));
    }

    output
}
