//! Command-line interface
//!
//! Argument structs and handlers for each subcommand, the CLI error type and
//! logging setup. The binary entry point is `src/cli/main.rs`.

pub mod commands;
pub mod error;
pub mod logging;

pub use error::CliError;
