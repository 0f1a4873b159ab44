//! azexport - Azure subscription export to Terraform
//!
//! Main entry point for the command-line tool.
//!
//! # Execution Flow
//!
//! 1. Parse arguments (flags fall back to their environment variables)
//! 2. Load `subscriptions.yaml`; a missing file means defaults
//! 3. Initialize logging at the configured level
//! 4. Run the selected command on a current-thread tokio runtime; every
//!    subscription and resource group is processed one after another
//! 5. Map the outcome to the process exit code

use anyhow::Result;
use azexport::cli::{self, Cli};
use azexport::logging::{resolve_level, setup_logging};
use azexport::{APP_NAME, ConfigManager, VERSION};
use camino::Utf8PathBuf;
use clap::Parser;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let loaded = ConfigManager::new(&cli.config).load()?;

    let level = resolve_level(
        loaded.config.logging.level.as_deref(),
        cli.log_level.as_deref(),
    );
    let log_dir = cli
        .log_dir
        .clone()
        .or_else(|| loaded.config.logging.dir.as_deref().map(Utf8PathBuf::from));

    // Held until exit so buffered file logs are flushed
    let _guard = setup_logging(level, log_dir.as_deref())?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);
    loaded.log_report();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(cli::execute(cli, &loaded))
}
