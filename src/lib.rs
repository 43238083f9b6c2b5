//! Health Data Importer - incremental, idempotent import of health-metric
//! SQLite exports into PostgreSQL
//!
//! Provides:
//! - A read-only SQLite source reader
//! - Destination schema mapping and dedup key resolution
//! - The per-table import engine behind the [`database::DestinationWriter`] seam
//! - A PostgreSQL destination (feature `postgres-backend`)
//! - Configuration loading with environment overrides
//!
//! Re-running an import against an unchanged source inserts nothing: a row
//! is written only if its dedup key value is not already present.

pub mod database;
pub mod models;
pub mod source;

#[cfg(feature = "cli")]
pub mod cli;

// Re-export commonly used types
#[cfg(feature = "postgres-backend")]
pub use database::PostgresBackend;
pub use database::{
    DatabaseError, DestinationWriter, ImportEngine, ImportError, ImportOptions, ImportResult,
    ImporterConfig, RunStatus, RunSummary,
};
pub use models::{ColumnDef, ColumnType, KeyValue, Row, TableData, TableSpec, Value};
pub use source::{SourceError, SqliteSource};
