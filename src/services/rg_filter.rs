//! Resource group exclusion by case-insensitive exact name or glob pattern.

use crate::services::azure_cli::AzureCli;
use glob::{MatchOptions, Pattern};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
struct ExclusionPattern {
    original: String,
    lowered: String,
    /// `None` when the pattern is not a valid glob; it then only matches exactly.
    glob: Option<Pattern>,
}

/// Merged global and local resource group exclusion patterns.
#[derive(Debug, Clone, Default)]
pub struct ExclusionPatterns {
    patterns: Vec<ExclusionPattern>,
}

impl ExclusionPatterns {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns = patterns
            .into_iter()
            .map(Into::<String>::into)
            .filter(|p| !p.trim().is_empty())
            .map(|original| {
                let lowered = original.to_lowercase();
                let glob = match Pattern::new(&lowered) {
                    Ok(glob) => Some(glob),
                    Err(e) => {
                        tracing::warn!(
                            "Invalid resource group pattern '{}' ({}), using exact match only",
                            original,
                            e
                        );
                        None
                    }
                };
                ExclusionPattern {
                    original,
                    lowered,
                    glob,
                }
            })
            .collect();

        Self { patterns }
    }

    /// The first pattern that excludes `name`, as written in the configuration.
    pub fn matching(&self, name: &str) -> Option<&str> {
        let lowered = name.to_lowercase();
        self.patterns
            .iter()
            .find(|p| {
                p.lowered == lowered
                    || p
                        .glob
                        .as_ref()
                        .is_some_and(|g| g.matches_with(&lowered, MATCH_OPTIONS))
            })
            .map(|p| p.original.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludedResourceGroup {
    pub name: String,
    pub pattern: String,
}

/// Resource groups split into those to export and those excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceGroupPartition {
    pub included: Vec<String>,
    pub excluded: Vec<ExcludedResourceGroup>,
}

impl ResourceGroupPartition {
    /// Split `names` against `patterns`, keeping listing order.
    pub fn split(names: &[String], patterns: &ExclusionPatterns) -> Self {
        let mut partition = Self::default();
        for name in names {
            match patterns.matching(name) {
                Some(pattern) => partition.excluded.push(ExcludedResourceGroup {
                    name: name.clone(),
                    pattern: pattern.to_string(),
                }),
                None => partition.included.push(name.clone()),
            }
        }
        partition
    }

    pub fn log_audit(&self, subscription_name: &str) {
        if !self.excluded.is_empty() {
            tracing::info!("Excluded resource groups ({}):", subscription_name);
            for rg in &self.excluded {
                tracing::info!("  ✗ {} (matched pattern: {})", rg.name, rg.pattern);
            }
        }

        if !self.included.is_empty() {
            tracing::info!("Resource groups to process ({}):", subscription_name);
            for rg in &self.included {
                tracing::info!("  ✓ {}", rg);
            }
        }

        if self.excluded.is_empty() {
            tracing::info!(
                "Found {} resource groups ({}) (none excluded)",
                self.included.len(),
                subscription_name
            );
        } else {
            tracing::info!(
                "Found {} total resource groups ({}): {} to process, {} excluded",
                self.included.len() + self.excluded.len(),
                subscription_name,
                self.included.len(),
                self.excluded.len()
            );
        }
    }
}

/// Lists and filters the resource groups of one subscription.
#[derive(Clone)]
pub struct ResourceGroupFilter {
    cli: AzureCli,
    patterns: ExclusionPatterns,
}

impl ResourceGroupFilter {
    pub fn new(cli: AzureCli, patterns: ExclusionPatterns) -> Self {
        Self { cli, patterns }
    }

    /// Resource groups of `subscription_id` left after exclusion.
    ///
    /// A listing failure is logged and yields an empty partition, so the
    /// subscription is treated as having nothing to export.
    pub async fn resource_groups(
        &self,
        subscription_id: &str,
        subscription_name: &str,
    ) -> ResourceGroupPartition {
        let names = match self.cli.list_resource_groups(subscription_id).await {
            Ok(names) => names,
            Err(e) => {
                tracing::error!("Error listing resource groups: {}", e);
                return ResourceGroupPartition::default();
            }
        };

        let partition = ResourceGroupPartition::split(&names, &self.patterns);
        partition.log_audit(subscription_name);
        partition
    }
}
