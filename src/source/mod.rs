//! Source reader for the health-data export
//!
//! The export is a SQLite file that a sync job may replace at any time
//! between runs. It is only ever opened read-only, optionally from a private
//! snapshot copy, and never written to.

pub mod sqlite;

pub use sqlite::SqliteSource;

use std::path::PathBuf;

/// Error type for source operations
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The source file is missing, locked, or not a SQLite database
    #[error("Source unavailable at {}: {reason}", path.display())]
    SourceUnavailable { path: PathBuf, reason: String },

    /// A requested table does not exist in the source
    #[error("Table not found in source: {0}")]
    TableNotFound(String),

    /// Reading an existing table failed
    #[error("Failed to read `{table}` from source: {reason}")]
    ReadFailed { table: String, reason: String },
}

/// Result type for source operations
pub type SourceResult<T> = Result<T, SourceError>;
