//! Configuration commands

use std::path::{Path, PathBuf};

use crate::cli::commands::load_config;
use crate::cli::error::CliError;
use crate::database::config::sample_config;

/// Check-config command arguments
#[derive(Debug, Clone, Default)]
pub struct CheckConfigArgs {
    /// Configuration file
    pub config: Option<PathBuf>,
}

/// Init-config command arguments
#[derive(Debug, Clone, Default)]
pub struct InitConfigArgs {
    /// File to write; the sample goes to stdout when unset
    pub output: Option<PathBuf>,
    /// Replace an existing file
    pub force: bool,
}

/// Load and validate configuration, printing it with credentials masked
pub fn handle_check_config(args: &CheckConfigArgs) -> Result<(), CliError> {
    let config = load_config(args.config.as_deref())?;

    println!("{}", config.masked().to_toml()?);

    config.validate()?;
    eprintln!("Configuration is valid");

    Ok(())
}

/// Print or write a commented sample configuration
pub fn handle_init_config(args: &InitConfigArgs) -> Result<(), CliError> {
    match &args.output {
        Some(path) => {
            write_sample_config(path, args.force)?;
            eprintln!("Wrote sample configuration to {}", path.display());
        }
        None => print!("{}", sample_config()),
    }
    Ok(())
}

/// Write the sample configuration to `path`, refusing to replace an existing
/// file unless `force` is set
pub fn write_sample_config(path: &Path, force: bool) -> Result<(), CliError> {
    if path.exists() && !force {
        return Err(CliError::InvalidArgument(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    std::fs::write(path, sample_config()).map_err(|e| {
        CliError::IoError(format!("Failed to write {}: {}", path.display(), e))
    })
}
