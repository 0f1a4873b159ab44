//! Azure CLI access: authentication check, subscription and resource group listing.

use crate::models::{ResourceGroup, Subscription};
use crate::services::command::{CommandError, CommandRunner, CommandSpec};
use camino::Utf8PathBuf;
use serde::Deserialize;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

const LIST_TIMEOUT: Duration = Duration::from_secs(30);
const ACCOUNT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from the discovery stage
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("az {command} failed: {message}")]
    CliFailed { command: String, message: String },

    #[error("Could not parse az {command} output: {source}")]
    Parse {
        command: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("No enabled subscriptions found. Check Azure CLI authentication and permissions.")]
    NoSubscriptions,
}

/// Result of `az account show`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    Authenticated { name: String, id: String },
    NotLoggedIn,
    /// The CLI could not be run at all; the run continues and lets discovery decide.
    Unknown(String),
}

#[derive(Debug, Deserialize)]
struct AccountEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

/// Thin wrapper around the `az` executable.
#[derive(Clone)]
pub struct AzureCli {
    runner: Arc<dyn CommandRunner>,
    az_path: String,
}

impl AzureCli {
    pub fn new(runner: Arc<dyn CommandRunner>, az_path: impl Into<String>) -> Self {
        Self {
            runner,
            az_path: az_path.into(),
        }
    }

    /// Create a wrapper using the `az` found by [`locate_az_cli`].
    pub fn discover(runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(runner, locate_az_cli())
    }

    pub fn az_path(&self) -> &str {
        &self.az_path
    }

    fn az(&self) -> CommandSpec {
        CommandSpec::new(&self.az_path)
    }

    async fn run_json(
        &self,
        command: &str,
        spec: CommandSpec,
        limit: Duration,
    ) -> Result<String, DiscoveryError> {
        let output = timeout(limit, self.runner.output(&spec))
            .await
            .map_err(|_| CommandError::Timeout {
                program: self.az_path.clone(),
                limit,
            })??;

        if !output.success() {
            return Err(DiscoveryError::CliFailed {
                command: command.to_string(),
                message: output.combined(),
            });
        }

        Ok(output.stdout)
    }

    /// Check whether the CLI has a logged-in account.
    pub async fn check_authentication(&self) -> AuthStatus {
        let spec = self.az().args([
            "account",
            "show",
            "--query",
            "{name:name, id:id}",
            "--output",
            "json",
        ]);

        match self.run_json("account show", spec, ACCOUNT_TIMEOUT).await {
            Ok(stdout) => match serde_json::from_str::<AccountEntry>(&stdout) {
                Ok(account) => AuthStatus::Authenticated {
                    name: account.name.unwrap_or_else(|| "N/A".to_string()),
                    id: account.id.unwrap_or_else(|| "N/A".to_string()),
                },
                Err(e) => AuthStatus::Unknown(format!("unexpected account output: {}", e)),
            },
            Err(DiscoveryError::CliFailed { .. }) => AuthStatus::NotLoggedIn,
            Err(e) => AuthStatus::Unknown(e.to_string()),
        }
    }

    /// List every enabled subscription visible to the CLI.
    pub async fn list_subscriptions(&self) -> Result<Vec<Subscription>, DiscoveryError> {
        let spec = self.az().args([
            "account",
            "list",
            "--query",
            "[].{id:id, name:name, state:state}",
            "--output",
            "json",
        ]);
        let stdout = self.run_json("account list", spec, LIST_TIMEOUT).await?;
        parse_enabled_subscriptions(&stdout)
    }

    /// List resource group names in a subscription.
    pub async fn list_resource_groups(
        &self,
        subscription_id: &str,
    ) -> Result<Vec<String>, DiscoveryError> {
        let spec = self.az().args([
            "group",
            "list",
            "--subscription",
            subscription_id,
            "--output",
            "json",
        ]);
        let stdout = self.run_json("group list", spec, LIST_TIMEOUT).await?;
        parse_resource_groups(&stdout)
    }
}

/// Parse `az account list` output, keeping enabled subscriptions with an ID.
pub fn parse_enabled_subscriptions(json: &str) -> Result<Vec<Subscription>, DiscoveryError> {
    let entries: Vec<AccountEntry> =
        serde_json::from_str(json).map_err(|source| DiscoveryError::Parse {
            command: "account list".to_string(),
            source,
        })?;

    Ok(entries
        .into_iter()
        .filter(|e| {
            e.state
                .as_deref()
                .is_some_and(|s| s.trim().eq_ignore_ascii_case("enabled"))
        })
        .filter_map(|e| {
            let id = e.id.unwrap_or_default();
            if id.trim().is_empty() {
                None
            } else {
                Some(Subscription::new(id, e.name.unwrap_or_default()))
            }
        })
        .collect())
}

/// Parse `az group list` output into trimmed, non-empty names.
pub fn parse_resource_groups(json: &str) -> Result<Vec<String>, DiscoveryError> {
    let groups: Vec<ResourceGroup> =
        serde_json::from_str(json).map_err(|source| DiscoveryError::Parse {
            command: "group list".to_string(),
            source,
        })?;

    Ok(groups
        .into_iter()
        .map(|g| g.name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect())
}

/// Find the Azure CLI: `PATH` first, then the usual install locations, else plain `az`.
pub fn locate_az_cli() -> String {
    let names: &[&str] = if cfg!(target_os = "windows") {
        &["az.cmd", "az.exe", "az"]
    } else {
        &["az"]
    };

    if let Some(paths) = env::var_os("PATH") {
        for dir in env::split_paths(&paths) {
            for name in names {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    if let Some(found) = candidate.to_str() {
                        return found.to_string();
                    }
                }
            }
        }
    }

    let common_paths: Vec<Utf8PathBuf> = if cfg!(target_os = "windows") {
        let mut paths = Vec::new();
        if let Ok(home) = env::var("USERPROFILE") {
            paths.push(Utf8PathBuf::from(home).join("AppData/Local/Programs/Azure CLI/az.exe"));
        }
        paths.push("C:/Program Files/Microsoft SDKs/Azure/CLI2/wbin/az.cmd".into());
        paths
    } else if cfg!(target_os = "macos") {
        vec![
            "/opt/homebrew/bin/az".into(),
            "/usr/local/bin/az".into(),
            "/usr/bin/az".into(),
        ]
    } else {
        vec![
            "/usr/bin/az".into(),
            "/usr/local/bin/az".into(),
            "/opt/az/bin/az".into(),
        ]
    };

    common_paths
        .into_iter()
        .find(|p| p.is_file())
        .map(|p| p.into_string())
        .unwrap_or_else(|| "az".to_string())
}
