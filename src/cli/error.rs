//! CLI-specific error types

use thiserror::Error;

use crate::database::DatabaseError;
use crate::source::SourceError;

/// CLI-specific error type
#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Import run aborted: {0}")]
    RunAborted(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to initialise logging: {0}")]
    LoggingError(String),

    #[error("IO error: {0}")]
    IoError(String),
}
