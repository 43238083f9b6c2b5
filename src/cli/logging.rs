//! Logging setup for the binary
//!
//! Console output goes to stderr so that `--json` summaries on stdout stay
//! machine-readable. `RUST_LOG` takes precedence over the configured level.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::error::CliError;
use crate::database::config::LoggingSection;

/// Install the global subscriber
///
/// Returns the file writer's guard when a log file is configured; it must be
/// kept alive until the process exits or buffered lines are lost.
pub fn init(settings: &LoggingSection) -> Result<Option<WorkerGuard>, CliError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.level).map_err(|e| {
            CliError::LoggingError(format!("invalid log level '{}': {}", settings.level, e))
        })?,
    };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .boxed();

    let mut layers = vec![console_layer];
    let mut guard = None;

    if let Some(path) = &settings.file {
        let file_name = path.file_name().ok_or_else(|| {
            CliError::InvalidArgument(format!("log file has no file name: {}", path.display()))
        })?;
        let directory = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        std::fs::create_dir_all(directory).map_err(|e| {
            CliError::IoError(format!(
                "Failed to create log directory {}: {}",
                directory.display(),
                e
            ))
        })?;

        // Appends to the same file on every run
        let file_appender = tracing_appender::rolling::never(directory, file_name);
        let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(file_guard);

        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(non_blocking)
            .boxed();
        layers.push(file_layer);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| CliError::LoggingError(e.to_string()))?;

    tracing::debug!(
        level = %settings.level,
        file = ?settings.file,
        "Logging initialised"
    );

    Ok(guard)
}
