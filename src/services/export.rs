use crate::models::AztfexportSection;
use crate::services::command::{CommandError, CommandRunner, CommandSpec, StreamedOutput};
use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::timeout;

/// Number of trailing output lines logged when an export fails.
pub const FAILURE_TAIL_LINES: usize = 20;

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);
const INSTALL_PACKAGE: &str = "github.com/Azure/aztfexport@latest";

/// Errors from exporting one resource group
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("{binary} not found. Make sure it's installed and in PATH")]
    ToolNotFound { binary: String },

    #[error("Timeout exporting {resource_group} (exceeded {limit:?})")]
    Timeout {
        resource_group: String,
        limit: Duration,
    },

    #[error("Export of {resource_group} exited with code {code:?}")]
    Failed {
        resource_group: String,
        code: Option<i32>,
        tail: Vec<String>,
    },

    #[error("Export completed but no .tf files found for {resource_group}")]
    NoArtifacts { resource_group: String },

    #[error("Could not prepare output directory {path}: {source}")]
    OutputDir {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Could not install {binary}: {message}")]
    InstallFailed { binary: String, message: String },

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Resource Graph filter for query mode.
///
/// A custom query replaces the generated one entirely. Otherwise every excluded
/// type becomes a `type != '<type>'` clause with single quotes doubled.
/// Returns `None` when there is nothing to filter on.
pub fn build_query(exclude_resource_types: &[String], custom_query: Option<&str>) -> Option<String> {
    if let Some(query) = custom_query.map(str::trim).filter(|q| !q.is_empty()) {
        return Some(query.to_string());
    }

    if exclude_resource_types.is_empty() {
        return None;
    }

    Some(
        exclude_resource_types
            .iter()
            .map(|t| format!("type != '{}'", escape_quotes(t)))
            .collect::<Vec<_>>()
            .join(" and "),
    )
}

fn escape_quotes(value: &str) -> String {
    value.replace('\'', "''")
}

/// Build the export tool invocation for one resource group.
///
/// Query mode is used when `section` excludes resource types or carries a
/// custom query; resource-group mode otherwise. `additional_flags` always come
/// right before the positional argument.
pub fn build_command(
    section: &AztfexportSection,
    subscription_id: &str,
    resource_group: &str,
    output_path: &Utf8Path,
) -> CommandSpec {
    let resource_group = resource_group.trim();
    let query = if section.uses_query_mode() {
        build_query(&section.exclude_resource_types, section.custom_query())
    } else {
        None
    };

    let mode = if query.is_some() {
        "query"
    } else {
        "resource-group"
    };

    let mut spec = CommandSpec::new(&section.binary).args([
        mode,
        "--subscription-id",
        subscription_id,
        "--output-dir",
        output_path.as_str(),
        "--non-interactive",
        "--plain-ui",
    ]);

    match query {
        Some(query) => {
            let positional = if resource_group.is_empty() {
                query
            } else {
                format!(
                    "{} and resourceGroup == '{}'",
                    query,
                    escape_quotes(resource_group)
                )
            };
            spec = spec.args(section.additional_flags.iter().cloned()).arg(positional);
        }
        None => {
            for resource_type in &section.resource_types {
                spec = spec.args(["--resource-type", resource_type.as_str()]);
            }
            for resource in &section.exclude_resources {
                spec = spec.args(["--exclude", resource.as_str()]);
            }
            spec = spec
                .args(section.additional_flags.iter().cloned())
                .arg(resource_group);
        }
    }

    spec
}

/// `.tf` files under `dir`: a recursive search, or the top level only when the
/// recursive search finds nothing.
pub fn find_artifacts(dir: &Utf8Path) -> Vec<Utf8PathBuf> {
    let escaped = Pattern::escape(dir.as_str());
    let recursive = collect_matches(&format!("{}/**/*.tf", escaped));
    if !recursive.is_empty() {
        return recursive;
    }
    collect_matches(&format!("{}/*.tf", escaped))
}

fn collect_matches(pattern: &str) -> Vec<Utf8PathBuf> {
    match glob::glob(pattern) {
        Ok(paths) => paths
            .filter_map(Result::ok)
            .filter(|p| p.is_file())
            .filter_map(|p| Utf8PathBuf::from_path_buf(p).ok())
            .collect(),
        Err(e) => {
            tracing::debug!("Invalid artifact pattern {}: {}", pattern, e);
            Vec::new()
        }
    }
}

/// Runs the export tool for single resource groups.
#[derive(Clone)]
pub struct ExportRunner {
    runner: Arc<dyn CommandRunner>,
    section: AztfexportSection,
    base_dir: Utf8PathBuf,
    timeout: Duration,
}

impl ExportRunner {
    /// Create a new runner.
    ///
    /// # Arguments
    /// * `runner` - Executes the tool
    /// * `section` - The `aztfexport` configuration section
    /// * `base_dir` - Output root, used as the tool's working directory
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        section: AztfexportSection,
        base_dir: impl Into<Utf8PathBuf>,
    ) -> Self {
        let timeout = Duration::from_secs(section.timeout_secs);
        Self {
            runner,
            section,
            base_dir: base_dir.into(),
            timeout,
        }
    }

    /// Override the per-invocation wall-clock limit.
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = limit;
        self
    }

    pub fn binary(&self) -> &str {
        &self.section.binary
    }

    /// Make sure the export tool can be run, installing it with `go install` if needed.
    pub async fn ensure_installed(&self) -> Result<(), ExportError> {
        let binary = self.binary().to_string();
        let version = CommandSpec::new(&binary).arg("--version");

        let installed = matches!(
            timeout(VERSION_CHECK_TIMEOUT, self.runner.output(&version)).await,
            Ok(Ok(output)) if output.success()
        );
        if installed {
            tracing::info!("{} is already installed", binary);
            return Ok(());
        }

        tracing::info!("Installing {}...", binary);
        let install = CommandSpec::new("go").args(["install", INSTALL_PACKAGE]);
        match self.runner.output(&install).await {
            Ok(output) if output.success() => {
                tracing::info!("{} installed successfully", binary);
                Ok(())
            }
            Ok(output) => Err(ExportError::InstallFailed {
                binary,
                message: output.combined(),
            }),
            Err(e) => Err(ExportError::InstallFailed {
                binary,
                message: e.to_string(),
            }),
        }
    }

    /// Export one resource group into `output_path`.
    ///
    /// # Returns
    /// The artifact files found after a successful run
    ///
    /// # Errors
    /// The tool is missing, times out, exits non-zero, or leaves no `.tf` files
    pub async fn run(
        &self,
        subscription_id: &str,
        resource_group: &str,
        output_path: &Utf8Path,
    ) -> Result<Vec<Utf8PathBuf>, ExportError> {
        let output_path = absolute(output_path)?;
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ExportError::OutputDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let work_dir = absolute(&self.base_dir)?;
        std::fs::create_dir_all(&work_dir).map_err(|source| ExportError::OutputDir {
            path: work_dir.clone(),
            source,
        })?;

        if self.section.uses_query_mode() {
            tracing::info!("Using query mode to exclude resource types");
            if !self.section.exclude_resource_types.is_empty() {
                tracing::debug!(
                    "Excluding types: {}",
                    self.section.exclude_resource_types.join(", ")
                );
            }
        }

        let spec = build_command(&self.section, subscription_id, resource_group, &output_path)
            .current_dir(work_dir)
            .env("AZTFEXPORT_NON_INTERACTIVE", "true")
            .env("TERM", "dumb")
            .env("NO_COLOR", "1");

        tracing::debug!("Running command: {}", spec);
        tracing::info!("Starting export for {}, this may take several minutes...", resource_group);

        let output = self
            .runner
            .stream(&spec, self.timeout)
            .await
            .map_err(|e| match e {
                CommandError::NotFound { .. } => ExportError::ToolNotFound {
                    binary: self.section.binary.clone(),
                },
                CommandError::Timeout { limit, .. } => ExportError::Timeout {
                    resource_group: resource_group.to_string(),
                    limit,
                },
                other => ExportError::Command(other),
            })?;

        classify(resource_group, &output, &output_path)
    }

    /// Export one resource group and report success.
    ///
    /// Every failure is logged here (with the tail of the tool output when
    /// there is one) and turned into `false`.
    pub async fn export_resource_group(
        &self,
        subscription_id: &str,
        resource_group: &str,
        output_path: &Utf8Path,
    ) -> bool {
        tracing::info!("Exporting resource group: {}", resource_group);
        let start = Instant::now();

        match self.run(subscription_id, resource_group, output_path).await {
            Ok(artifacts) => {
                tracing::info!(
                    "✓ Successfully exported {} in {:.1}s",
                    resource_group,
                    start.elapsed().as_secs_f32()
                );
                tracing::info!("   Created {} Terraform file(s)", artifacts.len());
                true
            }
            Err(ExportError::Failed { code, tail, .. }) => {
                tracing::error!(
                    "✗ Error exporting {} (exit code: {:?})",
                    resource_group,
                    code
                );
                if !tail.is_empty() {
                    tracing::error!("   Error output (last {} lines):", FAILURE_TAIL_LINES);
                    for line in &tail {
                        tracing::error!("     {}", line);
                    }
                }
                false
            }
            Err(e @ ExportError::NoArtifacts { .. }) => {
                tracing::warn!("⚠ {}", e);
                false
            }
            Err(e) => {
                tracing::error!("✗ {}", e);
                false
            }
        }
    }
}

fn classify(
    resource_group: &str,
    output: &StreamedOutput,
    output_path: &Utf8Path,
) -> Result<Vec<Utf8PathBuf>, ExportError> {
    if !output.success() {
        return Err(ExportError::Failed {
            resource_group: resource_group.to_string(),
            code: output.code,
            tail: output
                .tail(FAILURE_TAIL_LINES)
                .into_iter()
                .map(str::to_string)
                .collect(),
        });
    }

    let artifacts = find_artifacts(output_path);
    if artifacts.is_empty() {
        return Err(ExportError::NoArtifacts {
            resource_group: resource_group.to_string(),
        });
    }

    Ok(artifacts)
}

fn absolute(path: &Utf8Path) -> Result<Utf8PathBuf, ExportError> {
    let to_error = |source| ExportError::OutputDir {
        path: path.to_path_buf(),
        source,
    };
    let resolved = std::path::absolute(path).map_err(to_error)?;
    Utf8PathBuf::from_path_buf(resolved)
        .map_err(|_| to_error(io::Error::other("path is not valid UTF-8")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::command::{CommandOutput, MockCommandRunner};
    use std::fs;
    use tempfile::TempDir;

    fn temp_dir() -> (TempDir, Utf8PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        (temp_dir, dir)
    }

    fn types(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_build_query_from_types() {
        let query = build_query(
            &types(&["Microsoft.Network/networkWatchers", "Odd'Type"]),
            None,
        );
        assert_eq!(
            query.as_deref(),
            Some("type != 'Microsoft.Network/networkWatchers' and type != 'Odd''Type'")
        );
    }

    #[test]
    fn test_custom_query_overrides_types() {
        let query = build_query(&types(&["A"]), Some(" type =~ 'x' "));
        assert_eq!(query.as_deref(), Some("type =~ 'x'"));
        assert_eq!(build_query(&[], None), None);
    }

    #[test]
    fn test_resource_group_mode_command() {
        let section = AztfexportSection {
            resource_types: types(&["Microsoft.Web/sites"]),
            exclude_resources: types(&["/subscriptions/x/rg/y"]),
            additional_flags: types(&["--hcl-only"]),
            ..Default::default()
        };
        let spec = build_command(&section, "sub-1", " rg-app ", Utf8Path::new("/out/rg-app"));

        assert_eq!(spec.program, "aztfexport");
        assert_eq!(
            spec.args,
            types(&[
                "resource-group",
                "--subscription-id",
                "sub-1",
                "--output-dir",
                "/out/rg-app",
                "--non-interactive",
                "--plain-ui",
                "--resource-type",
                "Microsoft.Web/sites",
                "--exclude",
                "/subscriptions/x/rg/y",
                "--hcl-only",
                "rg-app",
            ])
        );
    }

    #[test]
    fn test_query_mode_command() {
        let section = AztfexportSection {
            exclude_resource_types: types(&["Microsoft.Insights/actionGroups"]),
            resource_types: types(&["ignored/in/query/mode"]),
            additional_flags: types(&["--parallelism", "4"]),
            ..Default::default()
        };
        let spec = build_command(&section, "sub-1", "rg-app", Utf8Path::new("/out"));

        assert_eq!(spec.args[0], "query");
        assert!(!spec.args.contains(&"--resource-type".to_string()));
        let tail = &spec.args[spec.args.len() - 3..];
        assert_eq!(
            tail,
            types(&[
                "--parallelism",
                "4",
                "type != 'Microsoft.Insights/actionGroups' and resourceGroup == 'rg-app'",
            ])
            .as_slice()
        );
    }

    #[test]
    fn test_find_artifacts_recursive() {
        let (_temp, dir) = temp_dir();
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("nested/main.tf"), "").unwrap();
        fs::write(dir.join("provider.tf"), "").unwrap();
        fs::write(dir.join("notes.txt"), "").unwrap();

        let found = find_artifacts(&dir);
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| p.extension() == Some("tf")));
    }

    #[test]
    fn test_find_artifacts_empty() {
        let (_temp, dir) = temp_dir();
        fs::write(dir.join("terraform.tfstate"), "").unwrap();
        assert!(find_artifacts(&dir).is_empty());
        assert!(find_artifacts(&dir.join("missing")).is_empty());
    }

    fn runner_with(stream: StreamedOutput, write_tf: Option<Utf8PathBuf>) -> MockCommandRunner {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_stream()
            .withf(|spec, _| {
                spec.envs.contains(&("AZTFEXPORT_NON_INTERACTIVE".to_string(), "true".to_string()))
                    && spec.envs.contains(&("NO_COLOR".to_string(), "1".to_string()))
            })
            .returning(move |_, _| {
                if let Some(dir) = &write_tf {
                    fs::create_dir_all(dir).unwrap();
                    fs::write(dir.join("main.tf"), "resource {}").unwrap();
                }
                Ok(stream.clone())
            });
        runner
    }

    #[tokio::test]
    async fn test_export_success_requires_artifacts() {
        let (_temp, dir) = temp_dir();
        let target = dir.join("sub").join("rg-a");
        let ok = StreamedOutput {
            code: Some(0),
            lines: vec![],
        };

        let with_files = ExportRunner::new(
            Arc::new(runner_with(ok.clone(), Some(target.clone()))),
            AztfexportSection::default(),
            &dir,
        );
        assert!(with_files.export_resource_group("sub-1", "rg-a", &target).await);

        let empty_target = dir.join("sub").join("rg-b");
        let without_files = ExportRunner::new(
            Arc::new(runner_with(ok, None)),
            AztfexportSection::default(),
            &dir,
        );
        assert!(matches!(
            without_files.run("sub-1", "rg-b", &empty_target).await,
            Err(ExportError::NoArtifacts { .. })
        ));
        assert!(!without_files.export_resource_group("sub-1", "rg-b", &empty_target).await);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure_with_tail() {
        let (_temp, dir) = temp_dir();
        let target = dir.join("rg-a");
        let failed = StreamedOutput {
            code: Some(2),
            lines: (0..30).map(|i| format!("line {}", i)).collect(),
        };

        let export = ExportRunner::new(
            Arc::new(runner_with(failed, Some(target.clone()))),
            AztfexportSection::default(),
            &dir,
        );
        match export.run("sub-1", "rg-a", &target).await {
            Err(ExportError::Failed { code, tail, .. }) => {
                assert_eq!(code, Some(2));
                assert_eq!(tail.len(), FAILURE_TAIL_LINES);
                assert_eq!(tail.last().map(String::as_str), Some("line 29"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_and_missing_tool_are_failures() {
        let (_temp, dir) = temp_dir();

        let mut runner = MockCommandRunner::new();
        runner.expect_stream().returning(|spec, limit| {
            Err(CommandError::Timeout {
                program: spec.program.clone(),
                limit,
            })
        });
        let export = ExportRunner::new(Arc::new(runner), AztfexportSection::default(), &dir)
            .with_timeout(Duration::from_secs(1));
        assert!(matches!(
            export.run("sub-1", "rg-a", &dir.join("rg-a")).await,
            Err(ExportError::Timeout { .. })
        ));

        let mut runner = MockCommandRunner::new();
        runner.expect_stream().returning(|spec, _| {
            Err(CommandError::NotFound {
                program: spec.program.clone(),
            })
        });
        let export = ExportRunner::new(Arc::new(runner), AztfexportSection::default(), &dir);
        assert!(!export.export_resource_group("sub-1", "rg-a", &dir.join("rg-a")).await);
    }

    #[tokio::test]
    async fn test_ensure_installed_skips_install_when_present() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_output()
            .withf(|spec| spec.args == ["--version"])
            .times(1)
            .returning(|_| {
                Ok(CommandOutput {
                    code: Some(0),
                    stdout: "aztfexport v0.15.0".to_string(),
                    stderr: String::new(),
                })
            });

        let export = ExportRunner::new(Arc::new(runner), AztfexportSection::default(), "./exports");
        assert!(export.ensure_installed().await.is_ok());
    }

    #[tokio::test]
    async fn test_ensure_installed_reports_failed_install() {
        let mut runner = MockCommandRunner::new();
        runner.expect_output().returning(|spec| {
            Err(CommandError::NotFound {
                program: spec.program.clone(),
            })
        });

        let export = ExportRunner::new(Arc::new(runner), AztfexportSection::default(), "./exports");
        assert!(matches!(
            export.ensure_installed().await,
            Err(ExportError::InstallFailed { .. })
        ));
    }
}
