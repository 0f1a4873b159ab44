//! The export run: preflight checks, subscription selection, per-subscription
//! export and publish, and the JSON result files.

use crate::config::RunSettings;
use crate::metrics::RunMetrics;
use crate::models::{
    ExportConfig, PublishStatus, RunMode, RunSummary, Subscription, SubscriptionResult,
};
use crate::services::discovery::{Selection, partition_subscriptions};
use crate::services::{
    AuthStatus, AzureCli, CommandRunner, DiscoveryError, ExclusionPatterns, ExportError,
    ExportRunner, GitPublisher, PatToken, ResourceGroupFilter, SubscriptionOrchestrator,
};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use indexmap::IndexMap;
use serde::Serialize;
use std::fs;
use std::sync::Arc;
use thiserror::Error;

/// All-subscriptions results, rewritten after every subscription.
pub const RESULTS_FILE: &str = "export_results.json";

/// Aggregated counts of an all-subscriptions run.
pub const SUMMARY_FILE: &str = "export_summary.json";

/// Result file name in single-subscription mode.
pub fn single_result_file(subscription_id: &str) -> String {
    format!("export_result_{}.json", subscription_id)
}

/// Conditions that stop a run before any subscription is touched
#[derive(Error, Debug)]
pub enum PreflightError {
    #[error("Not logged in to Azure CLI. Please run: az login")]
    NotAuthenticated,

    #[error("aztfexport is not available: {0}")]
    ExportTool(#[from] ExportError),
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub mode: RunMode,
    /// Results keyed by subscription ID, in processing order.
    pub results: IndexMap<String, SubscriptionResult>,
    pub summary: RunSummary,
    pub results_path: Utf8PathBuf,
}

impl RunOutcome {
    /// False when no subscription was processed at all.
    pub fn has_results(&self) -> bool {
        !self.results.is_empty()
    }
}

/// Drives one export run over the configured collaborators.
pub struct Pipeline {
    cli: AzureCli,
    exporter: ExportRunner,
    orchestrator: SubscriptionOrchestrator,
    publisher: GitPublisher,
    settings: RunSettings,
    subscription_exclusions: Vec<String>,
    metrics: Arc<RunMetrics>,
}

impl Pipeline {
    /// Wire the pipeline.
    ///
    /// # Arguments
    /// * `runner` - Executes every external command
    /// * `az_path` - Azure CLI executable
    /// * `config` - Loaded configuration
    /// * `settings` - Configuration merged with command-line overrides
    /// * `token` - Azure DevOps token used when publishing
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        az_path: impl Into<String>,
        config: &ExportConfig,
        settings: RunSettings,
        token: Option<PatToken>,
    ) -> Self {
        let metrics = Arc::new(RunMetrics::new());
        let cli = AzureCli::new(runner.clone(), az_path);

        let patterns = ExclusionPatterns::new(config.resource_group_exclusions());
        let filter = ResourceGroupFilter::new(cli.clone(), patterns);

        let exporter = ExportRunner::new(
            runner.clone(),
            config.aztfexport.clone(),
            settings.output_dir.clone(),
        )
        .with_timeout(settings.export_timeout);

        let orchestrator = SubscriptionOrchestrator::new(
            filter,
            exporter.clone(),
            settings.output_dir.clone(),
            settings.create_rg_folders,
            metrics.clone(),
        );

        let publisher = GitPublisher::new(
            runner,
            config.azure_devops.clone(),
            settings.branch.clone(),
            settings.backup_retention_count,
            token,
        );

        Self {
            cli,
            exporter,
            orchestrator,
            publisher,
            settings,
            subscription_exclusions: config.subscription_exclusions(),
            metrics,
        }
    }

    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    /// Check Azure CLI authentication (unless skipped) and the export tool.
    ///
    /// An Azure CLI that cannot be run at all only produces a warning.
    pub async fn preflight(&self, check_auth: bool) -> Result<(), PreflightError> {
        if check_auth {
            tracing::info!("Checking Azure CLI authentication...");
            match self.cli.check_authentication().await {
                AuthStatus::Authenticated { name, id } => {
                    tracing::info!("Azure CLI is authenticated");
                    tracing::info!("Account: {}", name);
                    tracing::info!("Subscription ID: {}", id);
                }
                AuthStatus::NotLoggedIn => return Err(PreflightError::NotAuthenticated),
                AuthStatus::Unknown(reason) => {
                    tracing::warn!("Error checking Azure CLI: {}", reason);
                    tracing::info!("Continuing anyway...");
                }
            }
        }

        if let Err(e) = self.exporter.ensure_installed().await {
            tracing::error!("Could not install aztfexport automatically");
            tracing::info!("Please install manually:");
            tracing::info!("  Option 1: go install github.com/Azure/aztfexport@latest");
            tracing::info!("  Option 2: Download from https://github.com/Azure/aztfexport/releases");
            return Err(e.into());
        }

        Ok(())
    }

    /// Run in single-subscription mode when one was supplied, otherwise over
    /// every discovered subscription.
    pub async fn run(&self) -> Result<RunOutcome> {
        fs::create_dir_all(&self.settings.output_dir).with_context(|| {
            format!(
                "Failed to create output directory: {}",
                self.settings.output_dir
            )
        })?;

        let outcome = match &self.settings.single_subscription {
            Some(subscription) => self.run_single(subscription).await?,
            None => self.run_all().await?,
        };

        log_summary(&outcome.summary);
        self.metrics.log_summary();
        Ok(outcome)
    }

    /// Export one subscription supplied out-of-band. Exclusions are not applied.
    pub async fn run_single(&self, subscription: &Subscription) -> Result<RunOutcome> {
        banner("Single Subscription Export Mode (Matrix Strategy)");
        tracing::info!("Subscription ID: {}", subscription.id);
        tracing::info!("Subscription Name: {}", subscription.name);

        let started_at = Utc::now();
        let result = self.process_subscription(subscription).await;

        let results_path = self
            .settings
            .output_dir
            .join(single_result_file(&subscription.id));
        write_json(&results_path, &result)?;
        tracing::info!("Export results saved to: {}", results_path);

        let mut results = IndexMap::new();
        results.insert(subscription.id.clone(), result);
        let summary = RunSummary::from_results(RunMode::Single, started_at, results.values());

        Ok(RunOutcome {
            mode: RunMode::Single,
            results,
            summary,
            results_path,
        })
    }

    /// Discover, filter and export every enabled subscription.
    ///
    /// # Errors
    /// Discovery fails or finds no enabled subscription, or a result file
    /// cannot be written
    pub async fn run_all(&self) -> Result<RunOutcome> {
        banner("All Subscriptions Export Mode");
        let started_at = Utc::now();

        tracing::info!("Discovering subscriptions from Azure...");
        let subscriptions = self.cli.list_subscriptions().await?;
        if subscriptions.is_empty() {
            return Err(DiscoveryError::NoSubscriptions.into());
        }

        let partition = partition_subscriptions(
            &subscriptions,
            &Selection::All,
            &self.subscription_exclusions,
        );
        banner("Subscription Processing Summary");
        partition.log_audit();

        let results_path = self.settings.output_dir.join(RESULTS_FILE);
        let mut results = IndexMap::new();

        for subscription in &partition.included {
            let result = self.process_subscription(subscription).await;
            if result.is_error() {
                tracing::warn!(
                    "Continuing with next subscription after error in {}",
                    subscription.name
                );
            }
            results.insert(subscription.id.clone(), result);
            write_json(&results_path, &results)?;
        }

        if results.is_empty() {
            tracing::error!("No subscriptions were exported. Check your configuration.");
        } else {
            tracing::info!("Export results saved to: {}", results_path);
        }

        let summary = RunSummary::from_results(RunMode::All, started_at, results.values());
        let summary_path = self.settings.output_dir.join(SUMMARY_FILE);
        write_json(&summary_path, &summary)?;

        Ok(RunOutcome {
            mode: RunMode::All,
            results,
            summary,
            results_path,
        })
    }

    /// Export one subscription and publish it when enabled.
    ///
    /// Never fails: an aborted export becomes an `error` result and a failed
    /// publish only sets `publish_status`.
    pub async fn process_subscription(&self, subscription: &Subscription) -> SubscriptionResult {
        banner(&format!("Processing subscription: {}", subscription.name));
        self.metrics.record_subscription_processed();

        let mut result = match self.orchestrator.export_subscription(subscription).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(
                    "Fatal error exporting subscription {}: {}",
                    subscription.id,
                    e
                );
                self.metrics.record_subscription_errored();
                return SubscriptionResult::errored(subscription, e.to_string());
            }
        };

        if !self.settings.push_to_repos {
            return result;
        }

        if result.has_exports() {
            result.publish_status = self.publish(subscription).await;
        } else {
            tracing::info!(
                "Skipping git push for {} (no successful exports)",
                subscription.name
            );
        }

        result
    }

    async fn publish(&self, subscription: &Subscription) -> PublishStatus {
        banner(&format!("Pushing {} to Git Repository", subscription.name));

        let sub_dir = self.orchestrator.subscription_dir(subscription);
        if !sub_dir.exists() {
            tracing::warn!(
                "Export directory not found for {}: {}",
                subscription.name,
                sub_dir
            );
            self.metrics.record_publish(false);
            return PublishStatus::Failed;
        }

        match self.publisher.publish(subscription, &sub_dir).await {
            Ok(_) => {
                tracing::info!("Successfully pushed {}", subscription.name);
                self.metrics.record_publish(true);
                if self.settings.cleanup_after_push {
                    tracing::info!(
                        "Cleaning up export directory for {}...",
                        subscription.name
                    );
                    cleanup_export_directory(&sub_dir);
                }
                PublishStatus::Success
            }
            Err(e) => {
                tracing::error!("Failed to push {}: {}", subscription.name, e);
                self.metrics.record_publish(false);
                PublishStatus::Failed
            }
        }
    }
}

/// Remove a subscription's export directory, logging instead of failing.
pub fn cleanup_export_directory(dir: &Utf8Path) -> bool {
    if !dir.exists() {
        return false;
    }
    match fs::remove_dir_all(dir) {
        Ok(()) => {
            tracing::info!("Cleaned up export directory: {}", dir);
            true
        }
        Err(e) => {
            tracing::warn!("Failed to cleanup export directory: {}", e);
            false
        }
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Utf8Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize results")?;
    fs::write(path, json).with_context(|| format!("Failed to write results: {}", path))
}

fn banner(title: &str) {
    tracing::info!("{}", "=".repeat(70));
    tracing::info!("{}", title);
    tracing::info!("{}", "=".repeat(70));
}

fn log_summary(summary: &RunSummary) {
    banner("Export Summary");
    tracing::info!("Subscriptions processed: {}", summary.subscriptions_processed);
    tracing::info!(
        "Subscriptions with successful exports: {}",
        summary.subscriptions_with_exports
    );
    tracing::info!("Total resource groups: {}", summary.total_rgs);
    tracing::info!("Successfully exported: {}", summary.successful_rgs);
    tracing::info!("Failed: {}", summary.failed_rgs);
    if summary.publishes_succeeded + summary.publishes_failed > 0 {
        tracing::info!(
            "Git pushes: {} succeeded, {} failed",
            summary.publishes_succeeded,
            summary.publishes_failed
        );
    }
}
