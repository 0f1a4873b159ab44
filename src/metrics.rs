// Run metrics
//
// Counters collected across one export run and logged when it finishes

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Counters for one export run.
///
/// Uses atomic operations so the orchestrator and the driver can share one
/// instance behind an `Arc` without locking.
#[derive(Debug)]
pub struct RunMetrics {
    /// Subscriptions that went through orchestration
    pub subscriptions_processed: AtomicUsize,

    /// Subscriptions whose processing aborted with an error
    pub subscriptions_errored: AtomicUsize,

    /// Resource groups exported successfully
    pub resource_groups_exported: AtomicUsize,

    /// Resource groups whose export failed
    pub resource_groups_failed: AtomicUsize,

    /// Wall time spent inside the export tool, in milliseconds
    pub total_export_time_ms: AtomicU64,

    pub publishes_succeeded: AtomicUsize,

    pub publishes_failed: AtomicUsize,

    start_time: Instant,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self {
            subscriptions_processed: AtomicUsize::new(0),
            subscriptions_errored: AtomicUsize::new(0),
            resource_groups_exported: AtomicUsize::new(0),
            resource_groups_failed: AtomicUsize::new(0),
            total_export_time_ms: AtomicU64::new(0),
            publishes_succeeded: AtomicUsize::new(0),
            publishes_failed: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_subscription_processed(&self) {
        self.subscriptions_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subscription_errored(&self) {
        self.subscriptions_errored.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one resource group export and how long it took
    pub fn record_export(&self, success: bool, duration: Duration) {
        if success {
            self.resource_groups_exported.fetch_add(1, Ordering::Relaxed);
        } else {
            self.resource_groups_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_export_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_publish(&self, success: bool) {
        if success {
            self.publishes_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.publishes_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Time since the run started
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average export time per resource group in milliseconds
    pub fn avg_export_time_ms(&self) -> f64 {
        let total = self.total_export_time_ms.load(Ordering::Relaxed);
        let count = self.resource_groups_exported.load(Ordering::Relaxed)
            + self.resource_groups_failed.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Log the closing summary
    pub fn log_summary(&self) {
        tracing::info!("=== Run Metrics Summary ===");
        tracing::info!("Duration: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Subscriptions: {} processed, {} errored",
            self.subscriptions_processed.load(Ordering::Relaxed),
            self.subscriptions_errored.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Resource groups: {} exported, {} failed",
            self.resource_groups_exported.load(Ordering::Relaxed),
            self.resource_groups_failed.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Total export time: {:.2}s (avg: {:.2}ms per resource group)",
            self.total_export_time_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            self.avg_export_time_ms()
        );
        tracing::info!(
            "Publishes: {} succeeded, {} failed",
            self.publishes_succeeded.load(Ordering::Relaxed),
            self.publishes_failed.load(Ordering::Relaxed)
        );
    }
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}
