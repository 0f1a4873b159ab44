//! Subscription selection, exclusion, service connection lookup and build-matrix output.

use crate::models::{ExportConfig, Subscription};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;

/// Pipeline variable that receives the matrix.
pub const MATRIX_VARIABLE: &str = "subscriptionMatrix";

/// Placeholder left for the CI system when no connection is configured anywhere.
pub const CONNECTION_PLACEHOLDER: &str = "$(defaultServiceConnection)";

/// Which subscriptions the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Everything not excluded.
    All,
    /// Only subscriptions whose ID or name is listed.
    Targets(Vec<String>),
    /// Nothing was requested.
    Nothing,
}

impl Selection {
    /// Build a selection from a comma-separated target list and the "all" flag.
    /// A non-empty target list wins over `all`.
    pub fn from_request(targets: Option<&str>, all: bool) -> Self {
        let targets: Vec<String> = targets
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();

        if !targets.is_empty() {
            Self::Targets(targets)
        } else if all {
            Self::All
        } else {
            Self::Nothing
        }
    }

    fn includes(&self, subscription: &Subscription) -> bool {
        match self {
            Self::All => true,
            Self::Targets(targets) => targets.iter().any(|t| subscription.matches_identifier(t)),
            Self::Nothing => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludedSubscription {
    pub subscription: Subscription,
    /// The exclusion entry that matched (the ID or the name).
    pub pattern: String,
}

/// Subscriptions split into those to process and those excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionPartition {
    pub included: Vec<Subscription>,
    pub excluded: Vec<ExcludedSubscription>,
}

impl SubscriptionPartition {
    /// Log which subscriptions will be processed and which were excluded.
    pub fn log_audit(&self) {
        if !self.excluded.is_empty() {
            tracing::info!("Excluded subscriptions ({}):", self.excluded.len());
            for ex in &self.excluded {
                tracing::info!(
                    "  ✗ {} (ID: {}) - matched exclude pattern: {}",
                    ex.subscription.name,
                    ex.subscription.id,
                    ex.pattern
                );
            }
        }

        if !self.included.is_empty() {
            tracing::info!("Subscriptions to process ({}):", self.included.len());
            for sub in &self.included {
                tracing::info!("  ✓ {} (ID: {})", sub.name, sub.id);
            }
        }

        tracing::info!(
            "Found {} subscription(s): {} to process, {} excluded",
            self.included.len() + self.excluded.len(),
            self.included.len(),
            self.excluded.len()
        );
    }
}

/// The exclusion entry matching `subscription`, checked by exact ID then exact name.
pub fn matching_exclusion<'a>(subscription: &Subscription, exclusions: &'a [String]) -> Option<&'a str> {
    exclusions
        .iter()
        .find(|e| **e == subscription.id)
        .or_else(|| exclusions.iter().find(|e| **e == subscription.name))
        .map(String::as_str)
}

/// Apply the selection, then the exclusion list, preserving discovery order.
///
/// Subscriptions outside the selection appear in neither list.
pub fn partition_subscriptions(
    subscriptions: &[Subscription],
    selection: &Selection,
    exclusions: &[String],
) -> SubscriptionPartition {
    let mut partition = SubscriptionPartition::default();

    for sub in subscriptions.iter().filter(|s| selection.includes(s)) {
        match matching_exclusion(sub, exclusions) {
            Some(pattern) => partition.excluded.push(ExcludedSubscription {
                subscription: sub.clone(),
                pattern: pattern.to_string(),
            }),
            None => partition.included.push(sub.clone()),
        }
    }

    partition
}

/// Resolve the service connection for a subscription.
///
/// Lookup order: map entry by ID, map entry by name, configured default,
/// the `defaultServiceConnection` value from `env_fallback`, and finally the
/// pipeline placeholder.
pub fn service_connection_for(
    subscription: &Subscription,
    config: &ExportConfig,
    env_fallback: Option<&str>,
) -> String {
    let map = &config.subscription_spn_map;

    map.get(&subscription.id)
        .or_else(|| map.get(&subscription.name))
        .map(String::as_str)
        .or_else(|| config.default_connection())
        .or(env_fallback.filter(|v| !v.trim().is_empty()))
        .unwrap_or(CONNECTION_PLACEHOLDER)
        .to_string()
}

/// Build-matrix key for a subscription name: lowercase, spaces and hyphens
/// become underscores, everything else that is not alphanumeric is dropped.
pub fn matrix_key(name: &str) -> String {
    name.to_lowercase()
        .replace([' ', '-'], "_")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixEntry {
    pub subscription_id: String,
    pub subscription_name: String,
    pub service_connection: String,
}

pub type Matrix = IndexMap<String, MatrixEntry>;

/// One matrix entry per included subscription, keyed by [`matrix_key`].
///
/// Names that normalize to the same key collide; the later subscription
/// replaces the earlier one and a warning is logged.
pub fn build_matrix(
    included: &[Subscription],
    config: &ExportConfig,
    env_fallback: Option<&str>,
) -> Matrix {
    let mut matrix = Matrix::with_capacity(included.len());
    for sub in included {
        let key = matrix_key(&sub.name);
        let entry = MatrixEntry {
            subscription_id: sub.id.clone(),
            subscription_name: sub.name.clone(),
            service_connection: service_connection_for(sub, config, env_fallback),
        };
        if let Some(previous) = matrix.insert(key.clone(), entry) {
            tracing::warn!(
                "Matrix key '{}' used by both '{}' ({}) and '{}' ({}); keeping '{}'",
                key,
                previous.subscription_name,
                previous.subscription_id,
                sub.name,
                sub.id,
                sub.name
            );
        }
    }
    matrix
}

/// Files written for a matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixArtifacts {
    pub json_path: Utf8PathBuf,
    pub script_path: Utf8PathBuf,
    /// Logging command that sets the pipeline output variable.
    pub set_variable_command: String,
}

/// `##vso[...]` logging command carrying the compact matrix JSON with escaped quotes.
pub fn set_variable_command(matrix: &Matrix) -> Result<String> {
    let compact = serde_json::to_string(matrix).context("Failed to serialize matrix")?;
    Ok(format!(
        "##vso[task.setvariable variable={};isOutput=true]{}",
        MATRIX_VARIABLE,
        compact.replace('"', "\\\"")
    ))
}

/// PowerShell script that sets the matrix variable from the embedded JSON.
pub fn matrix_script(matrix: &Matrix) -> Result<String> {
    let pretty = serde_json::to_string_pretty(matrix).context("Failed to serialize matrix")?;
    Ok(format!(
        "$matrix = @'\n{pretty}\n'@\n\
         Write-Host \"Setting matrix with $($matrix | ConvertFrom-Json | Get-Member -MemberType NoteProperty | Measure-Object).Count entries\"\n\
         $matrixJson = $matrix | ConvertFrom-Json | ConvertTo-Json -Compress\n\
         Write-Host \"##vso[task.setvariable variable={MATRIX_VARIABLE};isOutput=true]$matrixJson\"\n"
    ))
}

/// Write the matrix JSON to `output` and `set_matrix.ps1` next to it.
pub fn write_matrix(output: &Utf8Path, matrix: &Matrix) -> Result<MatrixArtifacts> {
    let parent = output.parent().unwrap_or(Utf8Path::new("."));
    if !parent.as_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent))?;
    }

    let json = serde_json::to_string_pretty(matrix).context("Failed to serialize matrix")?;
    fs::write(output, json).with_context(|| format!("Failed to write matrix: {}", output))?;

    let script_path = parent.join("set_matrix.ps1");
    fs::write(&script_path, matrix_script(matrix)?)
        .with_context(|| format!("Failed to write matrix script: {}", script_path))?;

    Ok(MatrixArtifacts {
        json_path: output.to_path_buf(),
        script_path,
        set_variable_command: set_variable_command(matrix)?,
    })
}
