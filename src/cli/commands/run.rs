//! Import run command
//!
//! Performs one complete run: load configuration, open the source, connect
//! to PostgreSQL, import every configured table and print the summary.

use std::path::PathBuf;

use crate::cli::commands::{load_config, open_source, runtime};
use crate::cli::error::CliError;
use crate::cli::logging;
use crate::database::{
    DestinationWriter, ImportEngine, ImportOptions, OutputFormat, PostgresBackend, RunStatus,
    format_run_summary,
};

/// Run command arguments
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    /// Configuration file (default: `health-importer.toml` if present)
    pub config: Option<PathBuf>,
    /// Tables to import instead of the configured list
    pub tables: Vec<String>,
    /// Plan only, write nothing
    pub dry_run: bool,
    /// Print the summary as JSON
    pub json: bool,
}

/// Execute one import run
///
/// Fails with [`CliError::RunAborted`] when the destination connection was
/// lost mid-run, after printing the summary.
pub fn handle_run(args: &RunArgs) -> Result<(), CliError> {
    let mut config = load_config(args.config.as_deref())?;
    if !args.tables.is_empty() {
        config.import.tables = args.tables.clone();
    }

    let _guard = logging::init(&config.logging)?;
    config.validate()?;

    let tables = config.table_specs();
    if tables.is_empty() {
        return Err(CliError::InvalidArgument(
            "No tables configured for import".to_string(),
        ));
    }

    let source = open_source(&config)?;

    let output_format = if args.json {
        OutputFormat::Json
    } else {
        OutputFormat::Table
    };

    let rt = runtime()?;
    let summary = rt.block_on(async {
        let backend = PostgresBackend::connect(&config.postgres).await?;

        let engine = ImportEngine::new(source, backend).with_options(ImportOptions {
            dry_run: args.dry_run,
        });
        let summary = engine.run(&tables).await;

        if let Err(e) = engine.destination().close().await {
            tracing::warn!(error = %e, "Failed to close destination connection");
        }

        Ok::<_, CliError>(summary)
    })?;

    println!("{}", format_run_summary(&summary, output_format));

    match summary.status {
        RunStatus::Aborted => Err(CliError::RunAborted(
            summary
                .aborted
                .unwrap_or_else(|| "destination connection lost".to_string()),
        )),
        RunStatus::Success | RunStatus::Partial => Ok(()),
    }
}
