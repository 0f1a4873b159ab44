//! CLI parsing and command execution

use crate::config::{LoadedConfig, RunSettings, SettingsOverrides};
use crate::models::config::DEFAULT_CONFIG_PATH;
use crate::pipeline::Pipeline;
use crate::services::azure_cli::locate_az_cli;
use crate::services::discovery::{Selection, build_matrix, partition_subscriptions, write_matrix};
use crate::services::{AzureCli, PatToken, SystemRunner};
use anyhow::Result;
use camino::Utf8PathBuf;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;

/// Environment variable holding the pipeline's fallback service connection.
pub const DEFAULT_CONNECTION_VARIABLE: &str = "defaultServiceConnection";

#[derive(Parser, Debug)]
#[command(name = "azexport")]
#[command(
    about = "Export Azure subscriptions to Terraform with aztfexport and publish them to Azure DevOps",
    long_about = None
)]
#[command(version)]
pub struct Cli {
    /// Path to the subscriptions configuration file
    #[arg(short, long, env = "CONFIG_PATH", default_value = DEFAULT_CONFIG_PATH)]
    pub config: Utf8PathBuf,

    /// Log level, used when the configuration does not set one
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Also write daily rotated log files to this directory
    #[arg(long)]
    pub log_dir: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export one subscription, or every enabled subscription
    Export(ExportArgs),

    /// Discover subscriptions and write the CI build matrix
    Matrix(MatrixArgs),
}

#[derive(Args, Debug, Default)]
pub struct ExportArgs {
    /// Export only this subscription (matrix job mode)
    #[arg(long, env = "SUBSCRIPTION_ID")]
    pub subscription_id: Option<String>,

    /// Display name of --subscription-id
    #[arg(long, env = "SUBSCRIPTION_NAME")]
    pub subscription_name: Option<String>,

    /// Output base directory (overrides output.base_dir)
    #[arg(long, env = "OUTPUT_DIR")]
    pub output_dir: Option<String>,

    /// Push exports to their repositories when set to "true"
    #[arg(long, env = "PUSH_TO_REPOS")]
    pub push: Option<String>,

    /// Main branch to publish to (overrides git.branch)
    #[arg(long, env = "GIT_BRANCH")]
    pub branch: Option<String>,

    /// Do not check Azure CLI authentication first
    #[arg(long)]
    pub skip_auth_check: bool,
}

impl ExportArgs {
    pub fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            output_dir: self.output_dir.clone(),
            push_to_repos: self.push.clone(),
            branch: self.branch.clone(),
            subscription_id: self.subscription_id.clone(),
            subscription_name: self.subscription_name.clone(),
        }
    }
}

#[derive(Args, Debug)]
pub struct MatrixArgs {
    /// Comma-separated subscription IDs or names to target
    #[arg(long)]
    pub subscription_ids: Option<String>,

    /// Include every enabled subscription when no targets are given
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub all_subscriptions: bool,

    /// Where to write the matrix JSON
    #[arg(short, long)]
    pub output: Utf8PathBuf,
}

/// Execute a CLI command
pub async fn execute(cli: &Cli, loaded: &LoadedConfig) -> Result<ExitCode> {
    match &cli.command {
        Commands::Export(args) => export(args, loaded).await,
        Commands::Matrix(args) => matrix(args, loaded).await,
    }
}

async fn export(args: &ExportArgs, loaded: &LoadedConfig) -> Result<ExitCode> {
    tracing::info!("{}", "=".repeat(70));
    tracing::info!("Azure Infrastructure Export to Terraform");
    tracing::info!("Using aztfexport for resource export");
    tracing::info!("{}", "=".repeat(70));

    let settings = RunSettings::resolve(&loaded.config, &args.overrides());
    let output_dir = settings.output_dir.clone();
    let pipeline = Pipeline::new(
        Arc::new(SystemRunner),
        locate_az_cli(),
        &loaded.config,
        settings,
        PatToken::from_env(),
    );

    if let Err(e) = pipeline.preflight(!args.skip_auth_check).await {
        tracing::error!("{}", e);
        return Ok(ExitCode::FAILURE);
    }

    let outcome = match pipeline.run().await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("{:#}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    if !outcome.has_results() {
        return Ok(ExitCode::FAILURE);
    }

    tracing::info!("Export completed! Output directory: {}", output_dir);
    Ok(ExitCode::SUCCESS)
}

async fn matrix(args: &MatrixArgs, loaded: &LoadedConfig) -> Result<ExitCode> {
    let cli = AzureCli::discover(Arc::new(SystemRunner));

    tracing::info!("Discovering subscriptions from Azure...");
    let subscriptions = match cli.list_subscriptions().await {
        Ok(subscriptions) if !subscriptions.is_empty() => subscriptions,
        Ok(_) => {
            tracing::error!("No subscriptions found");
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => {
            tracing::error!("Error discovering subscriptions: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    let selection = Selection::from_request(args.subscription_ids.as_deref(), args.all_subscriptions);
    let partition = partition_subscriptions(
        &subscriptions,
        &selection,
        &loaded.config.subscription_exclusions(),
    );
    partition.log_audit();

    if partition.included.is_empty() {
        tracing::error!("No subscriptions to export after filtering");
        return Ok(ExitCode::FAILURE);
    }

    let env_connection = std::env::var(DEFAULT_CONNECTION_VARIABLE).ok();
    let matrix = build_matrix(&partition.included, &loaded.config, env_connection.as_deref());
    let artifacts = write_matrix(&args.output, &matrix)?;

    // The CI agent reads logging commands from stdout
    println!("{}", artifacts.set_variable_command);

    tracing::info!(
        "Generated matrix with {} subscription(s): {}",
        matrix.len(),
        artifacts.json_path
    );
    tracing::info!("Matrix script written to {}", artifacts.script_path);
    Ok(ExitCode::SUCCESS)
}
