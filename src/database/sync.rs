//! Source to destination import engine
//!
//! Drives one run: for each configured table, read it from the source,
//! resolve its dedup key, ensure the destination table, compute the rows
//! the destination does not have yet, and insert them in one atomic batch.
//!
//! Tables are processed one at a time, in configured order, and a failing
//! table never stops its siblings. Only a lost destination connection ends
//! the run early. Previously imported rows are the only state carried from
//! one run to the next, so re-running is always safe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::dedup::require_dedup_key;
use super::schema::{DestinationTable, ensure_destination_table};
use super::{DatabaseError, DestinationWriter};
use crate::models::{KeyValue, Row, TableData, TableSpec, Value};
use crate::source::{SourceError, SqliteSource};

/// Why a table (or the whole run) could not be imported
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ImportError {
    /// The source file cannot be read; nothing can be imported
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// A configured table is absent from the source
    #[error("Table not found in source: {0}")]
    TableNotFound(String),

    /// The destination table cannot be deduplicated against
    #[error("Schema mismatch for `{table}`: {reason}")]
    SchemaMismatch { table: String, reason: String },

    /// None of the dedup key candidates exist in the table
    #[error("No dedup key for `{table}`: none of [{candidates}] present")]
    NoDedupKey { table: String, candidates: String },

    /// The batch was rejected (constraint or type coercion) and rolled back
    #[error("Insert failed: {0}")]
    InsertFailed(String),

    /// The destination connection was lost
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// An existing source table could not be read
    #[error("Source read failed: {0}")]
    ReadFailed(String),

    /// A destination read or DDL statement failed
    #[error("Destination query failed: {0}")]
    QueryFailed(String),
}

impl ImportError {
    /// Errors that make a table unimportable as configured, as opposed to a
    /// failed attempt
    pub fn is_table_skip(&self) -> bool {
        matches!(
            self,
            ImportError::TableNotFound(_)
                | ImportError::SchemaMismatch { .. }
                | ImportError::NoDedupKey { .. }
        )
    }

    /// Errors that end the run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ImportError::SourceUnavailable(_) | ImportError::ConnectionError(_)
        )
    }
}

impl From<SourceError> for ImportError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::TableNotFound(table) => ImportError::TableNotFound(table),
            e @ SourceError::SourceUnavailable { .. } => {
                ImportError::SourceUnavailable(e.to_string())
            }
            e @ SourceError::ReadFailed { .. } => ImportError::ReadFailed(e.to_string()),
        }
    }
}

impl From<DatabaseError> for ImportError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::ConnectionFailed(reason) => ImportError::ConnectionError(reason),
            DatabaseError::InsertFailed(reason) => ImportError::InsertFailed(reason),
            other => ImportError::QueryFailed(other.to_string()),
        }
    }
}

/// Final state of one table in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum TableStatus {
    /// All new rows were inserted (possibly none)
    Imported,
    /// The table was not attempted
    Skipped(String),
    /// The attempt failed and nothing was committed
    Failed(String),
}

impl std::fmt::Display for TableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableStatus::Imported => write!(f, "imported"),
            TableStatus::Skipped(reason) => write!(f, "skipped ({})", reason),
            TableStatus::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// Per-table outcome of a run
///
/// Every row read from the source is counted exactly once:
/// `seen == inserted + skipped_duplicates + skipped_null_key + failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportResult {
    /// Table name
    pub table: String,
    /// Resolved dedup key column
    pub dedup_key: Option<String>,
    /// Whether the destination table was created in this run
    pub created: bool,
    /// Rows read from the source
    pub seen: usize,
    /// Rows inserted (in a dry run: rows that would be inserted)
    pub inserted: usize,
    /// Rows whose key is already present
    pub skipped_duplicates: usize,
    /// Rows rejected because their key is null
    pub skipped_null_key: usize,
    /// Rows not imported because the table was skipped or failed
    pub failed: usize,
    /// Final state
    pub status: TableStatus,
    /// Processing time in milliseconds
    pub duration_ms: u64,
}

impl ImportResult {
    /// Create an empty, successful result
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            dedup_key: None,
            created: false,
            seen: 0,
            inserted: 0,
            skipped_duplicates: 0,
            skipped_null_key: 0,
            failed: 0,
            status: TableStatus::Imported,
            duration_ms: 0,
        }
    }

    /// Mark the table as skipped; rows not otherwise accounted for count as failed
    pub fn skip(&mut self, reason: impl Into<String>) {
        self.inserted = 0;
        self.status = TableStatus::Skipped(reason.into());
        self.settle();
    }

    /// Mark the table as failed; rows not otherwise accounted for count as failed
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.inserted = 0;
        self.status = TableStatus::Failed(reason.into());
        self.settle();
    }

    pub fn is_imported(&self) -> bool {
        self.status == TableStatus::Imported
    }

    fn settle(&mut self) {
        self.failed = self
            .seen
            .saturating_sub(self.inserted + self.skipped_duplicates + self.skipped_null_key);
    }
}

/// Overall state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every table was imported
    Success,
    /// At least one table was skipped or failed
    Partial,
    /// The destination connection was lost mid-run
    Aborted,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::Partial => write!(f, "partial"),
            RunStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// Summary of one run, suitable for logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique identifier of this run
    pub run_id: Uuid,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Source file path
    pub source_path: String,
    /// SHA-256 of the source file when the run started
    pub source_fingerprint: String,
    /// Whether this was a dry run
    pub dry_run: bool,
    /// Per-table results in configured order
    pub tables: Vec<ImportResult>,
    /// Overall state, set by [`RunSummary::finish`]
    pub status: RunStatus,
    /// Why the run ended early
    pub aborted: Option<String>,
    /// Duration of the run in milliseconds
    pub duration_ms: u64,
    #[serde(skip)]
    start: Option<Instant>,
}

impl RunSummary {
    /// Start a new run summary
    pub fn new(
        source_path: impl Into<String>,
        source_fingerprint: impl Into<String>,
        dry_run: bool,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            source_path: source_path.into(),
            source_fingerprint: source_fingerprint.into(),
            dry_run,
            tables: Vec::new(),
            status: RunStatus::Success,
            aborted: None,
            duration_ms: 0,
            start: Some(Instant::now()),
        }
    }

    /// Compute the overall status and duration
    pub fn finish(&mut self) {
        self.status = if self.aborted.is_some() {
            RunStatus::Aborted
        } else if self.tables.iter().all(ImportResult::is_imported) {
            RunStatus::Success
        } else {
            RunStatus::Partial
        };
        if let Some(start) = self.start {
            self.duration_ms = start.elapsed().as_millis() as u64;
        }
    }

    /// Look up the result for a table
    pub fn table(&self, name: &str) -> Option<&ImportResult> {
        self.tables.iter().find(|r| r.table == name)
    }

    /// Total rows inserted across tables
    pub fn total_inserted(&self) -> usize {
        self.tables.iter().map(|r| r.inserted).sum()
    }

    /// Total rows read across tables
    pub fn total_seen(&self) -> usize {
        self.tables.iter().map(|r| r.seen).sum()
    }
}

/// Options for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Read and plan only: no DDL, no inserts
    pub dry_run: bool,
}

/// Source rows split by what the destination already holds
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PartitionedRows {
    /// New rows projected onto the destination columns and coerced to their types
    pub rows: Vec<Row>,
    /// Rows whose key is already present (at the destination or earlier in the batch)
    pub duplicates: usize,
    /// Rows whose key is null
    pub null_keys: usize,
}

/// Split source rows into new rows, duplicates and null-key rejects
///
/// `known` holds the keys already stored at the destination. A key seen
/// twice within the source counts the second occurrence as a duplicate.
/// A value that cannot be coerced to its destination column fails the whole
/// batch with [`ImportError::InsertFailed`].
pub fn partition_rows(
    data: &TableData,
    target: &DestinationTable,
    mut known: HashSet<KeyValue>,
) -> Result<PartitionedRows, ImportError> {
    let key_column = &target.dedup_key;
    let key_index =
        data.column_index(&key_column.name)
            .ok_or_else(|| ImportError::SchemaMismatch {
                table: data.name.clone(),
                reason: format!("source has no `{}` column", key_column.name),
            })?;

    let mut partitioned = PartitionedRows::default();

    for row in &data.rows {
        let key = row
            .get(key_index)
            .unwrap_or(&Value::Null)
            .coerce(key_column.column_type)
            .map_err(|e| {
                ImportError::InsertFailed(format!("dedup key `{}`: {}", key_column.name, e))
            })?;

        let Some(key) = key.dedup_key() else {
            partitioned.null_keys += 1;
            continue;
        };
        if !known.insert(key) {
            partitioned.duplicates += 1;
            continue;
        }

        let projected = target
            .columns
            .iter()
            .zip(&target.source_indices)
            .map(|(column, &index)| {
                row.get(index)
                    .unwrap_or(&Value::Null)
                    .coerce(column.column_type)
                    .map_err(|e| {
                        ImportError::InsertFailed(format!("column `{}`: {}", column.name, e))
                    })
            })
            .collect::<Result<Row, _>>()?;
        partitioned.rows.push(projected);
    }

    Ok(partitioned)
}

/// Import engine for one run
///
/// Holds the run's source handle and destination connection; nothing else
/// is shared between tables.
pub struct ImportEngine<D: DestinationWriter> {
    source: SqliteSource,
    destination: D,
    options: ImportOptions,
}

impl<D: DestinationWriter> ImportEngine<D> {
    /// Create a new engine over an open source and a connected destination
    pub fn new(source: SqliteSource, destination: D) -> Self {
        Self {
            source,
            destination,
            options: ImportOptions::default(),
        }
    }

    /// Set run options
    pub fn with_options(mut self, options: ImportOptions) -> Self {
        self.options = options;
        self
    }

    /// Get reference to the destination
    pub fn destination(&self) -> &D {
        &self.destination
    }

    /// Import every table in `tables`, in order
    ///
    /// Per-table failures are recorded and the run continues. A lost
    /// destination connection marks the current table failed and every
    /// remaining table skipped.
    pub async fn run(&self, tables: &[TableSpec]) -> RunSummary {
        let mut summary = RunSummary::new(
            self.source.path().display().to_string(),
            self.source.fingerprint(),
            self.options.dry_run,
        );

        info!(
            run_id = %summary.run_id,
            tables = tables.len(),
            dry_run = self.options.dry_run,
            destination = self.destination.backend_type(),
            "Starting import run"
        );

        for spec in tables {
            if let Some(reason) = &summary.aborted {
                let mut result = ImportResult::new(&spec.name);
                result.skip(format!("run aborted: {}", reason));
                summary.tables.push(result);
                continue;
            }

            let (result, error) = self.import_table(spec).await;
            if let Some(ImportError::ConnectionError(reason)) = error {
                error!(table = %spec.name, reason = %reason, "Destination connection lost, aborting run");
                summary.aborted = Some(reason);
            }
            summary.tables.push(result);
        }

        summary.finish();

        info!(
            run_id = %summary.run_id,
            status = %summary.status,
            seen = summary.total_seen(),
            inserted = summary.total_inserted(),
            duration_ms = summary.duration_ms,
            "Import run complete"
        );

        summary
    }

    async fn import_table(&self, spec: &TableSpec) -> (ImportResult, Option<ImportError>) {
        let start = Instant::now();
        let mut result = ImportResult::new(&spec.name);

        let error = match self.process_table(spec, &mut result).await {
            Ok(()) => {
                info!(
                    table = %result.table,
                    dedup_key = result.dedup_key.as_deref().unwrap_or_default(),
                    created = result.created,
                    seen = result.seen,
                    inserted = result.inserted,
                    skipped_duplicates = result.skipped_duplicates,
                    skipped_null_key = result.skipped_null_key,
                    dry_run = self.options.dry_run,
                    "Imported table"
                );
                None
            }
            Err(e) if e.is_table_skip() => {
                warn!(table = %result.table, reason = %e, "Skipping table");
                result.skip(e.to_string());
                Some(e)
            }
            Err(e) => {
                error!(table = %result.table, error = %e, "Table import failed");
                result.fail(e.to_string());
                Some(e)
            }
        };

        result.duration_ms = start.elapsed().as_millis() as u64;
        (result, error)
    }

    async fn process_table(
        &self,
        spec: &TableSpec,
        result: &mut ImportResult,
    ) -> Result<(), ImportError> {
        let data = self.source.read_table(&spec.name)?;
        result.seen = data.row_count();

        let dedup_key = require_dedup_key(&data.name, &data.columns)?.name.clone();
        result.dedup_key = Some(dedup_key.clone());

        let target = ensure_destination_table(
            &self.destination,
            &data,
            &dedup_key,
            self.options.dry_run,
        )
        .await?;
        result.created = target.created;

        let known = if target.created {
            HashSet::new()
        } else {
            self.destination
                .existing_keys(&target.name, &target.dedup_key)
                .await?
        };
        debug!(table = %target.name, existing_keys = known.len(), "Loaded destination keys");

        let batch = partition_rows(&data, &target, known)?;
        result.skipped_duplicates = batch.duplicates;
        result.skipped_null_key = batch.null_keys;

        if batch.null_keys > 0 {
            warn!(
                table = %target.name,
                rows = batch.null_keys,
                dedup_key = %dedup_key,
                "Rejected rows with a null dedup key"
            );
        }

        if batch.rows.is_empty() {
            debug!(table = %target.name, "No new rows to insert");
            return Ok(());
        }

        if self.options.dry_run {
            result.inserted = batch.rows.len();
            return Ok(());
        }

        let inserted = self
            .destination
            .insert_rows(&target.name, &target.columns, &batch.rows)
            .await?;
        result.inserted = inserted as usize;
        result.settle();

        Ok(())
    }
}
