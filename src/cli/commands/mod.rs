//! CLI command implementations

pub mod config;
pub mod run;
pub mod tables;

use std::path::Path;

use crate::cli::error::CliError;
use crate::database::ImporterConfig;
use crate::source::SqliteSource;

/// Load configuration for a command, from `path` or the default location
pub(crate) fn load_config(path: Option<&Path>) -> Result<ImporterConfig, CliError> {
    Ok(ImporterConfig::load(path)?)
}

/// Open the configured source, from a snapshot copy when configured
pub(crate) fn open_source(config: &ImporterConfig) -> Result<SqliteSource, CliError> {
    Ok(SqliteSource::open_with(
        config.source_path()?,
        config.source.snapshot,
    )?)
}

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime, CliError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CliError::IoError(format!("Failed to create runtime: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use tempfile::tempdir;

    #[test]
    fn test_open_source_honours_snapshot_setting() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("export.db");
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE steps (row_id INTEGER)")
            .unwrap();

        let mut config = ImporterConfig::new();
        config.source.path = Some(path.clone());

        assert!(!open_source(&config).unwrap().is_snapshot());

        config.source.snapshot = true;
        let source = open_source(&config).unwrap();
        assert!(source.is_snapshot());
        assert_eq!(source.path(), path.as_path());
    }
}
