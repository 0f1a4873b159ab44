//! Publishing a subscription's export to its Azure DevOps repository.
//!
//! Each subscription gets its own repository, named after the subscription.
//! The latest export is force-pushed to the main branch, a dated
//! `backup-YYYY-MM-DD` branch is pushed next to it, and backup branches
//! beyond the retention count are deleted from the remote.
//!
//! The access token is only ever handed to git through a global
//! `url.<authenticated>.insteadOf` rewrite, rendered as `***` in logs.

use crate::models::{AzureDevOpsSection, Subscription};
use crate::services::command::{CommandError, CommandOutput, CommandRunner, CommandSpec};
use crate::services::retention::{backup_branch_name, parse_backup_branches, plan_retention};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{Local, NaiveDate};
use secrecy::{ExposeSecret, SecretString};
use std::fs;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

pub const DEVOPS_HOST: &str = "https://dev.azure.com/";

/// Token variables, in lookup order.
pub const TOKEN_VARIABLES: [&str; 2] = ["AZURE_DEVOPS_PAT", "SYSTEM_ACCESS_TOKEN"];

const GITIGNORE: &str = "\
# Terraform files
*.tfstate
*.tfstate.*
*.tfvars
.terraform/
.terraform.lock.hcl
crash.log
crash.*.log
*.tfplan
override.tf
override.tf.json
*_override.tf
*_override.tf.json

# IDE
.idea/
.vscode/
*.swp
*.swo
*~

# OS
.DS_Store
Thumbs.db
";

/// Errors from publishing one subscription
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Azure DevOps PAT token not found. Set AZURE_DEVOPS_PAT or SYSTEM_ACCESS_TOKEN")]
    MissingToken,

    #[error("No repository URL configured for subscription {subscription}")]
    NoRepositoryUrl { subscription: String },

    #[error("Invalid repository URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("git {step} failed: {message}")]
    Git { step: String, message: String },

    #[error(
        "Repository does not exist in Azure DevOps. Please create the repository first \
         (organization: {organization}, project: {project}, repository: {repository})"
    )]
    RepositoryNotFound {
        organization: String,
        project: String,
        repository: String,
    },

    #[error("Failed to push: {message}")]
    PushRejected { message: String },

    #[error("Failed to write {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Azure DevOps personal access token.
#[derive(Clone)]
pub struct PatToken(SecretString);

impl PatToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::new(token.into()))
    }

    /// First non-empty value among [`TOKEN_VARIABLES`] according to `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        TOKEN_VARIABLES
            .iter()
            .filter_map(|name| lookup(name))
            .find(|value| !value.trim().is_empty())
            .map(Self::new)
    }

    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for PatToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PatToken(***)")
    }
}

fn organization_url(organization: &str) -> Result<Url, PublishError> {
    let mut url = Url::parse(DEVOPS_HOST)?;
    url.path_segments_mut()
        .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .push(organization)
        .push("");
    Ok(url)
}

/// `https://dev.azure.com/<org>/<project>/_git/<repository>`, every part percent-encoded.
pub fn repository_url(
    organization: &str,
    project: &str,
    repository: &str,
) -> Result<Url, PublishError> {
    let mut url = Url::parse(DEVOPS_HOST)?;
    url.path_segments_mut()
        .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .extend([organization, project, "_git", repository]);
    Ok(url)
}

/// Global git `insteadOf` rule that injects the token for one organization.
#[derive(Clone)]
pub struct CredentialRewrite {
    organization_url: String,
    token: PatToken,
}

impl CredentialRewrite {
    pub fn new(organization: &str, token: PatToken) -> Result<Self, PublishError> {
        Ok(Self {
            organization_url: organization_url(organization)?.to_string(),
            token,
        })
    }

    /// Config key carrying the authenticated prefix.
    fn key(&self) -> String {
        let rest = self
            .organization_url
            .strip_prefix("https://")
            .unwrap_or(&self.organization_url);
        format!("url.https://{}@{}.insteadOf", self.token.expose(), rest)
    }

    /// `git config --global` invocation applying the rewrite, with the token redacted.
    pub fn command(&self) -> CommandSpec {
        CommandSpec::new("git")
            .args(["config", "--global"])
            .arg(self.key())
            .arg(&self.organization_url)
            .redact(self.token.expose())
    }
}

/// Push failure, with a remediation message when the repository is missing.
pub fn classify_push_failure(
    message: &str,
    organization: &str,
    project: &str,
    repository: &str,
) -> PublishError {
    let lowered = message.to_lowercase();
    if lowered.contains("not found") || lowered.contains("does not exist") {
        PublishError::RepositoryNotFound {
            organization: organization.to_string(),
            project: project.to_string(),
            repository: repository.to_string(),
        }
    } else {
        PublishError::PushRejected {
            message: message.trim().to_string(),
        }
    }
}

fn readme(subscription: &Subscription) -> String {
    format!(
        "# Terraform Infrastructure as Code\n\
         \n\
         This repository contains Terraform code for Azure resources exported from subscription: **{name}**\n\
         \n\
         ## Subscription Information\n\
         \n\
         - **Subscription ID**: `{id}`\n\
         - **Subscription Name**: {name}\n\
         \n\
         ## Structure\n\
         \n\
         Each resource group is organized in its own directory:\n\
         \n\
         ```\n\
         resource-group-name/\n\
         ├── main.tf\n\
         ├── providers.tf\n\
         └── ...\n\
         ```\n\
         \n\
         ## Usage\n\
         \n\
         1. Navigate to a resource group directory: `cd resource-group-name`\n\
         2. Initialize Terraform: `terraform init`\n\
         3. Review the plan: `terraform plan`\n\
         \n\
         ## Notes\n\
         \n\
         - This code was generated automatically with `aztfexport`\n\
         - Review and test before applying to production\n\
         - Update provider versions as needed\n",
        name = subscription.name,
        id = subscription.id,
    )
}

/// What a successful publish did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub repository_url: String,
    pub branch: String,
    /// Backup branch, when its push succeeded.
    pub backup_branch: Option<String>,
    pub deleted_backups: Vec<String>,
}

/// Publishes export directories with the `git` CLI.
#[derive(Clone)]
pub struct GitPublisher {
    runner: Arc<dyn CommandRunner>,
    devops: AzureDevOpsSection,
    branch: String,
    retention: usize,
    token: Option<PatToken>,
}

impl GitPublisher {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        devops: AzureDevOpsSection,
        branch: impl Into<String>,
        retention: usize,
        token: Option<PatToken>,
    ) -> Self {
        Self {
            runner,
            devops,
            branch: branch.into(),
            retention,
            token,
        }
    }

    fn target(&self) -> Option<(&str, &str)> {
        let org = self.devops.organization.as_deref().map(str::trim)?;
        let project = self.devops.project.as_deref().map(str::trim)?;
        (!org.is_empty() && !project.is_empty()).then_some((org, project))
    }

    /// Repository URL for `subscription`, derived from its name.
    pub fn repository_url(&self, subscription: &Subscription) -> Result<Url, PublishError> {
        let (org, project) = self.target().ok_or_else(|| PublishError::NoRepositoryUrl {
            subscription: subscription.id.clone(),
        })?;
        repository_url(org, project, &subscription.name)
    }

    async fn git<I, S>(&self, dir: &Utf8Path, args: I) -> Result<CommandOutput, PublishError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = CommandSpec::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0");
        Ok(self.runner.output(&spec).await?)
    }

    /// Like [`Self::git`], but a non-zero exit becomes [`PublishError::Git`].
    async fn git_checked<I, S>(
        &self,
        dir: &Utf8Path,
        step: &str,
        args: I,
    ) -> Result<CommandOutput, PublishError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let output = self.git(dir, args).await?;
        if !output.success() {
            return Err(PublishError::Git {
                step: step.to_string(),
                message: output.combined(),
            });
        }
        Ok(output)
    }

    /// Publish `export_path` for `subscription`, dating the backup branch today.
    pub async fn publish(
        &self,
        subscription: &Subscription,
        export_path: &Utf8Path,
    ) -> Result<PublishReport, PublishError> {
        self.publish_on(subscription, export_path, Local::now().date_naive())
            .await
    }

    /// Publish with an explicit backup date.
    pub async fn publish_on(
        &self,
        subscription: &Subscription,
        export_path: &Utf8Path,
        today: NaiveDate,
    ) -> Result<PublishReport, PublishError> {
        let repo_url = self.repository_url(subscription)?;
        let backup_branch = backup_branch_name(today);

        tracing::info!("Pushing to repository: {}", repo_url);
        tracing::info!("Main branch: {} (latest export)", self.branch);
        tracing::info!(
            "Backup branch: {} (keeping last {} runs)",
            backup_branch,
            self.retention
        );

        let token = self.token.clone().ok_or(PublishError::MissingToken)?;
        let (org, project) = self.target().ok_or_else(|| PublishError::NoRepositoryUrl {
            subscription: subscription.id.clone(),
        })?;

        let rewrite = CredentialRewrite::new(org, token)?;
        match self.runner.output(&rewrite.command()).await {
            Ok(output) if output.success() => {}
            Ok(output) => tracing::warn!("Could not configure git credentials: {}", output.combined()),
            Err(e) => tracing::warn!("Could not configure git credentials: {}", e),
        }

        self.prepare_repository(subscription, export_path, repo_url.as_str())
            .await?;
        self.commit(subscription, export_path).await?;

        let push = self
            .git(
                export_path,
                ["push", "-u", "origin", self.branch.as_str(), "--force"],
            )
            .await?;
        if !push.success() {
            let repository = repo_url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .unwrap_or("N/A")
                .to_string();
            return Err(classify_push_failure(
                &push.combined(),
                org,
                project,
                &repository,
            ));
        }
        tracing::info!("Pushed to {} branch", self.branch);

        tracing::info!("Creating backup branch: {}", backup_branch);
        let backup_branch = match self.push_backup(export_path, &backup_branch).await {
            Ok(()) => Some(backup_branch),
            Err(e) => {
                tracing::warn!("Failed to create backup branch, but main push succeeded: {}", e);
                None
            }
        };

        tracing::info!(
            "Cleaning up backup branches, keeping last {} runs...",
            self.retention
        );
        let deleted_backups = match self.prune_backups(export_path).await {
            Ok(deleted) => deleted,
            Err(e) => {
                tracing::warn!("Backup branch cleanup failed: {}", e);
                Vec::new()
            }
        };

        tracing::info!("Successfully pushed to repository: {}", repo_url);
        Ok(PublishReport {
            repository_url: repo_url.to_string(),
            branch: self.branch.clone(),
            backup_branch,
            deleted_backups,
        })
    }

    async fn prepare_repository(
        &self,
        subscription: &Subscription,
        dir: &Utf8Path,
        repo_url: &str,
    ) -> Result<(), PublishError> {
        if !dir.join(".git").exists() {
            self.git_checked(dir, "init", ["init"]).await?;
        }

        for (name, contents) in [(".gitignore", GITIGNORE.to_string()), ("README.md", readme(subscription))] {
            let path = dir.join(name);
            fs::write(&path, contents).map_err(|source| PublishError::Io { path, source })?;
        }

        let current = self.git(dir, ["remote", "get-url", "origin"]).await?;
        if !current.success() {
            self.git_checked(dir, "remote add", ["remote", "add", "origin", repo_url])
                .await?;
        } else if current.stdout.trim() != repo_url {
            self.git_checked(dir, "remote set-url", ["remote", "set-url", "origin", repo_url])
                .await?;
        }

        let checkout = self
            .git(dir, ["checkout", "-b", self.branch.as_str()])
            .await?;
        if !checkout.success() {
            let message = checkout.combined().to_lowercase();
            let switched = if message.contains("already exists") || message.contains("already on") {
                self.git(dir, ["checkout", self.branch.as_str()])
                    .await?
                    .success()
            } else {
                false
            };
            if !switched {
                tracing::warn!("Could not switch to {}, continuing with current branch", self.branch);
            }
        }

        Ok(())
    }

    async fn commit(&self, subscription: &Subscription, dir: &Utf8Path) -> Result<(), PublishError> {
        self.git_checked(dir, "add", ["add", "-A"]).await?;

        let message = format!(
            "Export Terraform code for subscription: {}",
            subscription.name
        );
        let commit = self.git(dir, ["commit", "-m", message.as_str()]).await?;
        if commit.success() {
            tracing::info!("Committed changes: {}", message);
        } else if commit.combined().to_lowercase().contains("nothing to commit") {
            tracing::info!("No changes to commit");
        } else {
            return Err(PublishError::Git {
                step: "commit".to_string(),
                message: commit.combined(),
            });
        }
        Ok(())
    }

    async fn push_backup(&self, dir: &Utf8Path, backup_branch: &str) -> Result<(), PublishError> {
        self.git_checked(dir, "branch", ["branch", "--force", backup_branch])
            .await?;
        self.git_checked(dir, "push", ["push", "origin", backup_branch, "--force"])
            .await?;
        Ok(())
    }

    /// Delete remote backup branches beyond the retention count.
    async fn prune_backups(&self, dir: &Utf8Path) -> Result<Vec<String>, PublishError> {
        let listing = self
            .git_checked(dir, "ls-remote", ["ls-remote", "--heads", "origin", "backup-*"])
            .await?;

        let plan = plan_retention(parse_backup_branches(&listing.stdout), self.retention);
        if plan.delete.is_empty() {
            return Ok(Vec::new());
        }

        tracing::info!(
            "Cleaning up {} old backup branch(es) (keeping {} most recent)",
            plan.delete.len(),
            plan.keep.len()
        );

        let mut deleted = Vec::new();
        for branch in plan.delete {
            let result = self
                .git(dir, ["push", "origin", "--delete", branch.name.as_str()])
                .await?;
            if result.success() {
                tracing::debug!("Deleted old backup branch: {}", branch.name);
                deleted.push(branch.name);
            } else {
                tracing::warn!("Could not delete backup branch {}: {}", branch.name, result.combined());
            }
        }
        Ok(deleted)
    }
}
