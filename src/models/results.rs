use crate::models::Subscription;
use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Outcome of exporting one resource group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportUnitResult {
    pub resource_group: String,
    pub path: Utf8PathBuf,
    pub status: UnitStatus,
}

impl ExportUnitResult {
    pub fn new(resource_group: impl Into<String>, path: Utf8PathBuf, success: bool) -> Self {
        Self {
            resource_group: resource_group.into(),
            path,
            status: if success {
                UnitStatus::Success
            } else {
                UnitStatus::Failed
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == UnitStatus::Success
    }
}

/// Overall state of one subscription's export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Every resource group exported.
    Success,
    /// Some resource groups exported, some failed.
    Partial,
    /// No resource group exported.
    Failed,
    /// Nothing left to export after filtering.
    NoOp,
    /// Orchestration aborted with an error.
    Error,
}

/// Outcome of publishing a subscription to its repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    Success,
    Failed,
    #[default]
    Skipped,
}

/// Per-subscription result record, written to the result JSON files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionResult {
    pub subscription_id: String,
    pub subscription_name: String,
    pub status: SubscriptionStatus,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub resource_groups: IndexMap<String, ExportUnitResult>,
    pub total_rgs: usize,
    pub successful_rgs: usize,
    pub failed_rgs: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub publish_status: PublishStatus,
}

impl SubscriptionResult {
    /// Start a record for a subscription with `total_rgs` groups to export.
    pub fn new(subscription: &Subscription, total_rgs: usize) -> Self {
        let mut result = Self {
            subscription_id: subscription.id.clone(),
            subscription_name: subscription.name.clone(),
            status: SubscriptionStatus::NoOp,
            resource_groups: IndexMap::new(),
            total_rgs,
            successful_rgs: 0,
            failed_rgs: 0,
            error: None,
            publish_status: PublishStatus::Skipped,
        };
        result.refresh_status();
        result
    }

    /// Record of a subscription whose processing aborted.
    pub fn errored(subscription: &Subscription, error: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription.id.clone(),
            subscription_name: subscription.name.clone(),
            status: SubscriptionStatus::Error,
            resource_groups: IndexMap::new(),
            total_rgs: 0,
            successful_rgs: 0,
            failed_rgs: 0,
            error: Some(error.into()),
            publish_status: PublishStatus::Skipped,
        }
    }

    /// Add one resource group outcome and update the counters.
    pub fn record(&mut self, unit: ExportUnitResult) {
        if unit.is_success() {
            self.successful_rgs += 1;
        } else {
            self.failed_rgs += 1;
        }
        self.resource_groups.insert(unit.resource_group.clone(), unit);
        self.refresh_status();
    }

    pub fn has_exports(&self) -> bool {
        self.successful_rgs > 0
    }

    pub fn is_error(&self) -> bool {
        self.status == SubscriptionStatus::Error
    }

    fn refresh_status(&mut self) {
        if self.error.is_some() {
            self.status = SubscriptionStatus::Error;
            return;
        }

        self.status = match (self.successful_rgs, self.failed_rgs) {
            (0, 0) if self.total_rgs == 0 => SubscriptionStatus::NoOp,
            (0, 0) => SubscriptionStatus::Failed,
            (_, 0) => SubscriptionStatus::Success,
            (0, _) => SubscriptionStatus::Failed,
            _ => SubscriptionStatus::Partial,
        };
    }
}

/// How the driver selected subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Single,
    All,
}

/// Counts aggregated across every processed subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub subscriptions_processed: usize,
    pub subscriptions_with_exports: usize,
    pub subscriptions_errored: usize,
    pub total_rgs: usize,
    pub successful_rgs: usize,
    pub failed_rgs: usize,
    pub publishes_succeeded: usize,
    pub publishes_failed: usize,
}

impl RunSummary {
    pub fn from_results<'a>(
        mode: RunMode,
        started_at: DateTime<Utc>,
        results: impl IntoIterator<Item = &'a SubscriptionResult>,
    ) -> Self {
        let mut summary = Self {
            mode,
            started_at,
            finished_at: Utc::now(),
            subscriptions_processed: 0,
            subscriptions_with_exports: 0,
            subscriptions_errored: 0,
            total_rgs: 0,
            successful_rgs: 0,
            failed_rgs: 0,
            publishes_succeeded: 0,
            publishes_failed: 0,
        };

        for result in results {
            summary.subscriptions_processed += 1;
            if result.has_exports() {
                summary.subscriptions_with_exports += 1;
            }
            if result.is_error() {
                summary.subscriptions_errored += 1;
            }
            summary.total_rgs += result.total_rgs;
            summary.successful_rgs += result.successful_rgs;
            summary.failed_rgs += result.failed_rgs;
            match result.publish_status {
                PublishStatus::Success => summary.publishes_succeeded += 1,
                PublishStatus::Failed => summary.publishes_failed += 1,
                PublishStatus::Skipped => {}
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub() -> Subscription {
        Subscription::new("sub-1", "Platform")
    }

    #[test]
    fn test_zero_groups_is_noop() {
        let result = SubscriptionResult::new(&sub(), 0);
        assert_eq!(result.status, SubscriptionStatus::NoOp);
        assert!(!result.has_exports());
    }

    #[test]
    fn test_record_counts_and_status() {
        let mut result = SubscriptionResult::new(&sub(), 2);
        assert_eq!(result.status, SubscriptionStatus::Failed);

        result.record(ExportUnitResult::new("rg-a", "out/rg-a".into(), true));
        assert_eq!(result.status, SubscriptionStatus::Success);

        result.record(ExportUnitResult::new("rg-b", "out/rg-b".into(), false));
        assert_eq!(result.status, SubscriptionStatus::Partial);
        assert_eq!(result.successful_rgs, 1);
        assert_eq!(result.failed_rgs, 1);
        assert_eq!(result.resource_groups.len(), 2);
    }

    #[test]
    fn test_errored_serialization() {
        let result = SubscriptionResult::errored(&sub(), "boom");
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["subscription_id"], "sub-1");
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "boom");
        assert_eq!(json["publish_status"], "skipped");
        assert!(json.get("resource_groups").is_none());
    }

    #[test]
    fn test_unit_serialization() {
        let mut result = SubscriptionResult::new(&sub(), 1);
        result.record(ExportUnitResult::new("rg-a", "out/rg-a".into(), true));
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["resource_groups"]["rg-a"]["status"], "success");
        assert_eq!(json["resource_groups"]["rg-a"]["path"], "out/rg-a");
        assert_eq!(json["total_rgs"], 1);
    }

    #[test]
    fn test_unit_result_path_reads_back() {
        let unit = ExportUnitResult::new("rg-a", "out/platform/rg-a".into(), false);
        let json = serde_json::to_string(&unit).unwrap();
        assert!(json.contains(r#""path":"out/platform/rg-a""#));

        let parsed: ExportUnitResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, unit);
        assert_eq!(parsed.path.file_name(), Some("rg-a"));
    }

    #[test]
    fn test_summary_aggregation() {
        let mut ok = SubscriptionResult::new(&sub(), 2);
        ok.record(ExportUnitResult::new("a", "a".into(), true));
        ok.record(ExportUnitResult::new("b", "b".into(), false));
        ok.publish_status = PublishStatus::Success;

        let failed = SubscriptionResult::errored(&Subscription::new("sub-2", "Other"), "x");

        let summary = RunSummary::from_results(RunMode::All, Utc::now(), [&ok, &failed]);
        assert_eq!(summary.subscriptions_processed, 2);
        assert_eq!(summary.subscriptions_with_exports, 1);
        assert_eq!(summary.subscriptions_errored, 1);
        assert_eq!(summary.total_rgs, 2);
        assert_eq!(summary.successful_rgs, 1);
        assert_eq!(summary.failed_rgs, 1);
        assert_eq!(summary.publishes_succeeded, 1);
    }
}
