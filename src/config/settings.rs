//! Runtime settings resolved once from the configuration file plus
//! command-line/environment overrides. Nothing here changes during a run.

use crate::models::{ExportConfig, Subscription};
use camino::Utf8PathBuf;
use std::time::Duration;

/// Values supplied out-of-band (flags or their environment variables).
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    /// `OUTPUT_DIR`
    pub output_dir: Option<String>,
    /// `PUSH_TO_REPOS`; only the string `true` (any case) enables pushing.
    pub push_to_repos: Option<String>,
    /// `GIT_BRANCH`
    pub branch: Option<String>,
    /// `SUBSCRIPTION_ID`; selects single-subscription mode.
    pub subscription_id: Option<String>,
    /// `SUBSCRIPTION_NAME`
    pub subscription_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub output_dir: Utf8PathBuf,
    pub create_rg_folders: bool,
    pub cleanup_after_push: bool,
    pub push_to_repos: bool,
    pub branch: String,
    pub backup_retention_count: usize,
    pub export_timeout: Duration,
    /// Set in single-subscription mode.
    pub single_subscription: Option<Subscription>,
}

impl RunSettings {
    pub fn resolve(config: &ExportConfig, overrides: &SettingsOverrides) -> Self {
        let output_dir = non_blank(&overrides.output_dir)
            .unwrap_or(config.output.base_dir.as_str())
            .into();

        let push_from_env = non_blank(&overrides.push_to_repos)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));

        let branch = non_blank(&overrides.branch)
            .unwrap_or(config.git.branch.as_str())
            .to_string();

        let single_subscription = non_blank(&overrides.subscription_id).map(|id| {
            Subscription::new(id, non_blank(&overrides.subscription_name).unwrap_or(id))
        });

        Self {
            output_dir,
            create_rg_folders: config.output.create_rg_folders,
            cleanup_after_push: config.output.cleanup_after_push,
            push_to_repos: push_from_env || config.git.push_to_repos,
            branch,
            backup_retention_count: config.git.backup_retention_count,
            export_timeout: Duration::from_secs(config.aztfexport.timeout_secs),
            single_subscription,
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
