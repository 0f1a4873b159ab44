use crate::metrics::RunMetrics;
use crate::models::{ExportUnitResult, Subscription, SubscriptionResult, sanitize_name};
use crate::services::export::{ExportError, ExportRunner};
use crate::services::rg_filter::ResourceGroupFilter;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::sync::Arc;
use std::time::Instant;

/// Exports every resource group of a subscription, one after another.
#[derive(Clone)]
pub struct SubscriptionOrchestrator {
    filter: ResourceGroupFilter,
    exporter: ExportRunner,
    output_dir: Utf8PathBuf,
    create_rg_folders: bool,
    metrics: Arc<RunMetrics>,
}

impl SubscriptionOrchestrator {
    pub fn new(
        filter: ResourceGroupFilter,
        exporter: ExportRunner,
        output_dir: impl Into<Utf8PathBuf>,
        create_rg_folders: bool,
        metrics: Arc<RunMetrics>,
    ) -> Self {
        Self {
            filter,
            exporter,
            output_dir: output_dir.into(),
            create_rg_folders,
            metrics,
        }
    }

    /// Directory holding one subscription's exports.
    pub fn subscription_dir(&self, subscription: &Subscription) -> Utf8PathBuf {
        self.output_dir.join(subscription.directory_name())
    }

    /// Target directory for one resource group.
    ///
    /// Without per-group folders every group shares the subscription
    /// directory and the last export of a file wins.
    pub fn resource_group_dir(&self, subscription_dir: &Utf8Path, resource_group: &str) -> Utf8PathBuf {
        if self.create_rg_folders {
            subscription_dir.join(sanitize_name(resource_group))
        } else {
            subscription_dir.to_path_buf()
        }
    }

    /// Export all non-excluded resource groups of `subscription`.
    ///
    /// A failed resource group is recorded and the next one is attempted.
    ///
    /// # Errors
    /// The subscription directory cannot be created
    pub async fn export_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<SubscriptionResult, ExportError> {
        tracing::info!("{}", "=".repeat(60));
        tracing::info!("Exporting subscription: {}", subscription.name);
        tracing::info!("Subscription ID: {}", subscription.id);
        tracing::info!("{}", "=".repeat(60));

        let sub_dir = self.subscription_dir(subscription);
        fs::create_dir_all(&sub_dir).map_err(|source| ExportError::OutputDir {
            path: sub_dir.clone(),
            source,
        })?;

        tracing::info!("Discovering resource groups...");
        let partition = self
            .filter
            .resource_groups(&subscription.id, &subscription.name)
            .await;

        let mut result = SubscriptionResult::new(subscription, partition.included.len());
        if partition.included.is_empty() {
            tracing::info!("No resource groups to export");
            return Ok(result);
        }

        for (index, rg) in partition.included.iter().enumerate() {
            tracing::info!(
                "[{}/{}] {}",
                index + 1,
                partition.included.len(),
                rg
            );
            let rg_dir = self.resource_group_dir(&sub_dir, rg);

            let start = Instant::now();
            let success = self
                .exporter
                .export_resource_group(&subscription.id, rg, &rg_dir)
                .await;
            self.metrics.record_export(success, start.elapsed());

            result.record(ExportUnitResult::new(rg.clone(), rg_dir, success));
        }

        tracing::info!("Export completed for {}", subscription.name);
        tracing::info!("Successful: {}/{}", result.successful_rgs, result.total_rgs);
        tracing::info!("Failed: {}/{}", result.failed_rgs, result.total_rgs);

        Ok(result)
    }
}
