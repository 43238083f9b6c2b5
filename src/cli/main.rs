//! CLI binary entry point for health-data-importer

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use health_data_importer::cli::commands::config::{
    CheckConfigArgs, InitConfigArgs, handle_check_config, handle_init_config,
};
#[cfg(feature = "cli")]
use health_data_importer::cli::commands::run::{RunArgs, handle_run};
#[cfg(feature = "cli")]
use health_data_importer::cli::commands::tables::{TablesArgs, handle_tables};
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "health-data-importer")]
#[command(about = "Import health-metric SQLite exports into PostgreSQL")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Import new rows from the source into PostgreSQL
    Run {
        /// Configuration file (default: ./health-importer.toml if present)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Table to import; repeat to import several. Overrides the configured list
        #[arg(short, long = "table")]
        tables: Vec<String>,
        /// Read and plan only; no DDL and no inserts
        #[arg(long)]
        dry_run: bool,
        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// List source tables and the dedup key each would use
    Tables {
        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Validate configuration and print it with credentials masked
    CheckConfig {
        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print a commented sample configuration, or write it to a file
    InitConfig {
        /// File to write instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[cfg(feature = "cli")]
fn main() {
    // A missing .env file is fine; the environment may already be set
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config,
            tables,
            dry_run,
            json,
        } => {
            let args = RunArgs {
                config,
                tables,
                dry_run,
                json,
            };
            handle_run(&args)
        }
        Commands::Tables { config } => handle_tables(&TablesArgs { config }),
        Commands::CheckConfig { config } => handle_check_config(&CheckConfigArgs { config }),
        Commands::InitConfig { output, force } => {
            handle_init_config(&InitConfigArgs { output, force })
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature is not enabled. Build with --features cli");
    std::process::exit(1);
}
