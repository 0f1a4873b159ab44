use crate::models::{ExportConfig, ParsedConfig};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

pub mod settings;

pub use settings::{RunSettings, SettingsOverrides};

/// A configuration file after loading.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ExportConfig,

    /// Path the configuration was read from; `None` when defaults were used.
    pub source: Option<Utf8PathBuf>,

    /// Sections that were present but malformed and fell back to defaults.
    pub invalid_sections: Vec<String>,
}

impl LoadedConfig {
    /// Log how the configuration was obtained.
    ///
    /// Called once logging is up, since the log level itself comes from the config.
    pub fn log_report(&self) {
        match &self.source {
            Some(path) => tracing::info!("Loaded configuration from {}", path),
            None => tracing::warn!("Configuration file not found, using defaults"),
        }

        for section in &self.invalid_sections {
            tracing::warn!(
                "Configuration section '{}' is invalid and was replaced by its defaults",
                section
            );
        }
    }
}

/// Loads the exporter's YAML configuration (`subscriptions.yaml`).
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a manager for the configuration file at `config_path`.
    pub fn new<P: AsRef<Utf8Path>>(config_path: P) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
        }
    }

    /// Load the configuration.
    ///
    /// # Returns
    /// The parsed configuration, or defaults if the file doesn't exist
    ///
    /// # Errors
    /// The file exists but cannot be read or is not a YAML document
    pub fn load(&self) -> Result<LoadedConfig> {
        if !self.config_path.exists() {
            return Ok(LoadedConfig {
                config: ExportConfig::default(),
                source: None,
                invalid_sections: Vec::new(),
            });
        }

        let file_contents = fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read config: {}", self.config_path))?;

        let ParsedConfig {
            config,
            invalid_sections,
        } = ExportConfig::from_yaml_str(&file_contents)
            .with_context(|| format!("Failed to parse config: {}", self.config_path))?;

        Ok(LoadedConfig {
            config,
            source: Some(self.config_path.clone()),
            invalid_sections,
        })
    }

    /// Get the configuration file path.
    pub fn config_path(&self) -> &Utf8Path {
        &self.config_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_config(contents: &str) -> (TempDir, Utf8PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let path = dir.join("subscriptions.yaml");
        fs::write(&path, contents).unwrap();
        (temp_dir, path)
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let manager = ConfigManager::new(dir.join("absent.yaml"));

        let loaded = manager.load().unwrap();
        assert!(loaded.source.is_none());
        assert_eq!(loaded.config, ExportConfig::default());
    }

    #[test]
    fn test_load_file() {
        let (_temp_dir, path) = temp_config("git:\n  branch: release\n");
        let loaded = ConfigManager::new(&path).load().unwrap();

        assert_eq!(loaded.source.as_deref(), Some(path.as_path()));
        assert_eq!(loaded.config.git.branch, "release");
    }

    #[test]
    fn test_broken_yaml_is_error() {
        let (_temp_dir, path) = temp_config("git: [\n");
        assert!(ConfigManager::new(&path).load().is_err());
    }

    #[test]
    fn test_invalid_section_reported() {
        let (_temp_dir, path) = temp_config("output: 42\n");
        let loaded = ConfigManager::new(&path).load().unwrap();
        assert_eq!(loaded.invalid_sections, vec!["output".to_string()]);
        assert_eq!(loaded.config.output.base_dir, "./exports");
    }
}
