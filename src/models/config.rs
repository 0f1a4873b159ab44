use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml_ng::{Mapping, Value};

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "pipelines/subscriptions.yaml";

/// Wall-clock limit for one aztfexport invocation.
pub const DEFAULT_EXPORT_TIMEOUT_SECS: u64 = 3600;

/// Number of dated backup branches kept on the remote.
pub const DEFAULT_BACKUP_RETENTION: usize = 10;

/// Typed view of `subscriptions.yaml`.
///
/// Every section is optional. A section that is missing, null, or malformed
/// resolves to its default (see [`ExportConfig::from_yaml_str`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub logging: LoggingSection,
    pub output: OutputSection,
    pub aztfexport: AztfexportSection,
    pub global_excludes: GlobalExcludesSection,
    pub exclude_subscriptions: SubscriptionExclusions,
    pub subscription_spn_map: IndexMap<String, String>,
    pub default_spn: Option<String>,
    pub default_service_connection: Option<String>,
    pub azure_devops: AzureDevOpsSection,
    pub git: GitSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// `DEBUG`, `INFO`, `WARN` or `ERROR`. Takes precedence over `LOG_LEVEL`.
    pub level: Option<String>,

    /// Directory for daily rotated log files. Console only when unset.
    pub dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub base_dir: String,

    /// When false every resource group of a subscription is exported into the
    /// subscription directory itself and later exports overwrite earlier files.
    pub create_rg_folders: bool,

    /// Remove the subscription directory after a successful publish.
    pub cleanup_after_push: bool,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            base_dir: "./exports".to_string(),
            create_rg_folders: true,
            cleanup_after_push: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AztfexportSection {
    /// Executable name or path of the export tool.
    pub binary: String,

    pub timeout_secs: u64,

    #[serde(deserialize_with = "nullable_list")]
    pub exclude_resource_types: Vec<String>,

    #[serde(deserialize_with = "nullable_list")]
    pub exclude_resource_groups: Vec<String>,

    /// Resource Graph query that replaces the generated type filter.
    pub query: Option<String>,

    #[serde(deserialize_with = "nullable_list")]
    pub resource_types: Vec<String>,

    #[serde(deserialize_with = "nullable_list")]
    pub exclude_resources: Vec<String>,

    #[serde(deserialize_with = "nullable_list")]
    pub additional_flags: Vec<String>,
}

impl Default for AztfexportSection {
    fn default() -> Self {
        Self {
            binary: "aztfexport".to_string(),
            timeout_secs: DEFAULT_EXPORT_TIMEOUT_SECS,
            exclude_resource_types: Vec::new(),
            exclude_resource_groups: Vec::new(),
            query: None,
            resource_types: Vec::new(),
            exclude_resources: Vec::new(),
            additional_flags: Vec::new(),
        }
    }
}

impl AztfexportSection {
    /// The custom query, ignoring blank values.
    pub fn custom_query(&self) -> Option<&str> {
        self.query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
    }

    /// Query mode is used when resource types are excluded or a custom query is set.
    pub fn uses_query_mode(&self) -> bool {
        !self.exclude_resource_types.is_empty() || self.custom_query().is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalExcludesSection {
    #[serde(deserialize_with = "nullable_list")]
    pub resource_groups: Vec<String>,
}

/// Subscription exclusions, either split into `prod`/`non-prod` or as a flat list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubscriptionExclusions {
    Flat(Vec<String>),
    Categorized(CategorizedExclusions),
}

impl Default for SubscriptionExclusions {
    fn default() -> Self {
        Self::Categorized(CategorizedExclusions::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategorizedExclusions {
    #[serde(deserialize_with = "nullable_list")]
    pub prod: Vec<String>,

    #[serde(rename = "non-prod", deserialize_with = "nullable_list")]
    pub non_prod: Vec<String>,
}

impl SubscriptionExclusions {
    /// All excluded subscription IDs and names, `prod` entries first.
    pub fn merged(&self) -> Vec<String> {
        match self {
            Self::Flat(list) => list.clone(),
            Self::Categorized(c) => c.prod.iter().chain(c.non_prod.iter()).cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureDevOpsSection {
    pub organization: Option<String>,
    pub project: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitSection {
    pub branch: String,
    pub backup_retention_count: usize,
    pub push_to_repos: bool,
}

impl Default for GitSection {
    fn default() -> Self {
        Self {
            branch: "main".to_string(),
            backup_retention_count: DEFAULT_BACKUP_RETENTION,
            push_to_repos: false,
        }
    }
}

/// Result of parsing a configuration document.
#[derive(Debug, Clone, Default)]
pub struct ParsedConfig {
    pub config: ExportConfig,

    /// Top-level sections that were present but could not be deserialized.
    pub invalid_sections: Vec<String>,
}

impl ExportConfig {
    /// Parse a YAML document section by section.
    ///
    /// A document that is not valid YAML is an error. A section with the wrong
    /// shape falls back to its default and is listed in
    /// [`ParsedConfig::invalid_sections`]; the remaining sections still apply.
    pub fn from_yaml_str(contents: &str) -> Result<ParsedConfig, serde_yaml_ng::Error> {
        let document: Value = serde_yaml_ng::from_str(contents)?;
        let mut invalid_sections = Vec::new();

        let root = match document {
            Value::Mapping(map) => map,
            Value::Null => Mapping::new(),
            _ => {
                invalid_sections.push("<root>".to_string());
                Mapping::new()
            }
        };

        let mut sections = SectionReader {
            root: &root,
            invalid: &mut invalid_sections,
        };

        let config = ExportConfig {
            logging: sections.read("logging"),
            output: sections.read("output"),
            aztfexport: sections.read("aztfexport"),
            global_excludes: sections.read("global_excludes"),
            exclude_subscriptions: sections.read("exclude_subscriptions"),
            subscription_spn_map: sections.read("subscription_spn_map"),
            default_spn: sections.read("default_spn"),
            default_service_connection: sections.read("default_service_connection"),
            azure_devops: sections.read("azure_devops"),
            git: sections.read("git"),
        };

        Ok(ParsedConfig {
            config,
            invalid_sections,
        })
    }

    /// Merged `prod` + `non-prod` subscription exclusions.
    pub fn subscription_exclusions(&self) -> Vec<String> {
        self.exclude_subscriptions.merged()
    }

    /// Union of the global and the aztfexport-local resource group patterns.
    pub fn resource_group_exclusions(&self) -> Vec<String> {
        self.global_excludes
            .resource_groups
            .iter()
            .chain(self.aztfexport.exclude_resource_groups.iter())
            .cloned()
            .collect()
    }

    /// Configured default service connection, `default_spn` first.
    pub fn default_connection(&self) -> Option<&str> {
        [&self.default_spn, &self.default_service_connection]
            .into_iter()
            .filter_map(|v| v.as_deref())
            .find(|v| !v.trim().is_empty())
    }
}

struct SectionReader<'a> {
    root: &'a Mapping,
    invalid: &'a mut Vec<String>,
}

impl SectionReader<'_> {
    fn read<T: DeserializeOwned + Default>(&mut self, key: &str) -> T {
        match self.root.get(key) {
            None | Some(Value::Null) => T::default(),
            Some(value) => match serde_yaml_ng::from_value(value.clone()) {
                Ok(section) => section,
                Err(e) => {
                    tracing::debug!("Config section '{}' is invalid: {}", key, e);
                    self.invalid.push(key.to_string());
                    T::default()
                }
            },
        }
    }
}

/// Treat an explicit `null` list the same as an absent one.
fn nullable_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExportConfig::default();
        assert_eq!(config.output.base_dir, "./exports");
        assert!(config.output.create_rg_folders);
        assert!(!config.output.cleanup_after_push);
        assert_eq!(config.git.branch, "main");
        assert_eq!(config.git.backup_retention_count, 10);
        assert_eq!(config.aztfexport.timeout_secs, 3600);
        assert!(!config.aztfexport.uses_query_mode());
    }

    #[test]
    fn test_empty_document() {
        let parsed = ExportConfig::from_yaml_str("").unwrap();
        assert_eq!(parsed.config, ExportConfig::default());
        assert!(parsed.invalid_sections.is_empty());
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
logging:
  level: DEBUG
output:
  base_dir: /tmp/out
  create_rg_folders: false
  cleanup_after_push: true
aztfexport:
  exclude_resource_types:
    - Microsoft.Network/networkWatchers
  exclude_resource_groups: ["tmp-*"]
  additional_flags: ["--hcl-only"]
global_excludes:
  resource_groups:
    - NetworkWatcherRG
exclude_subscriptions:
  prod:
    - Production
  non-prod:
    - 0000-1111
subscription_spn_map:
  sub-1: conn-A
default_spn: conn-B
azure_devops:
  organization: contoso
  project: Infra
git:
  branch: exports
  backup_retention_count: 5
  push_to_repos: true
"#;
        let parsed = ExportConfig::from_yaml_str(yaml).unwrap();
        let config = parsed.config;

        assert!(parsed.invalid_sections.is_empty());
        assert_eq!(config.logging.level.as_deref(), Some("DEBUG"));
        assert_eq!(config.output.base_dir, "/tmp/out");
        assert!(!config.output.create_rg_folders);
        assert!(config.aztfexport.uses_query_mode());
        assert_eq!(config.aztfexport.binary, "aztfexport");
        assert_eq!(
            config.resource_group_exclusions(),
            vec!["NetworkWatcherRG".to_string(), "tmp-*".to_string()]
        );
        assert_eq!(
            config.subscription_exclusions(),
            vec!["Production".to_string(), "0000-1111".to_string()]
        );
        assert_eq!(config.subscription_spn_map.get("sub-1").unwrap(), "conn-A");
        assert_eq!(config.default_connection(), Some("conn-B"));
        assert_eq!(config.azure_devops.organization.as_deref(), Some("contoso"));
        assert_eq!(config.git.backup_retention_count, 5);
        assert!(config.git.push_to_repos);
    }

    #[test]
    fn test_flat_subscription_exclusions() {
        let parsed = ExportConfig::from_yaml_str("exclude_subscriptions: [a, b]").unwrap();
        assert_eq!(
            parsed.config.subscription_exclusions(),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_null_lists_are_empty() {
        let yaml = "exclude_subscriptions:\n  prod:\n  non-prod: [x]\naztfexport:\n  resource_types:\n";
        let parsed = ExportConfig::from_yaml_str(yaml).unwrap();
        assert!(parsed.invalid_sections.is_empty());
        assert_eq!(parsed.config.subscription_exclusions(), vec!["x".to_string()]);
        assert!(parsed.config.aztfexport.resource_types.is_empty());
    }

    #[test]
    fn test_invalid_section_falls_back() {
        let yaml = "git: not-a-mapping\noutput:\n  base_dir: ./elsewhere\n";
        let parsed = ExportConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(parsed.invalid_sections, vec!["git".to_string()]);
        assert_eq!(parsed.config.git, GitSection::default());
        assert_eq!(parsed.config.output.base_dir, "./elsewhere");
    }

    #[test]
    fn test_invalid_yaml_is_error() {
        assert!(ExportConfig::from_yaml_str("output: [unclosed").is_err());
    }

    #[test]
    fn test_default_connection_fallback() {
        let config = ExportConfig {
            default_spn: Some("  ".to_string()),
            default_service_connection: Some("svc".to_string()),
            ..Default::default()
        };
        assert_eq!(config.default_connection(), Some("svc"));
    }

    #[test]
    fn test_blank_query_is_not_query_mode() {
        let section = AztfexportSection {
            query: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(!section.uses_query_mode());
        assert_eq!(section.custom_query(), None);
    }
}
