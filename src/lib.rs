// azexport - Azure subscription export to Terraform
//
// This is the library crate containing the export pipeline and its data structures.
// The binary crate (main.rs) provides the command-line entry point.

pub mod cli;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod services;

// Re-export commonly used types for convenience
pub use config::{ConfigManager, LoadedConfig, RunSettings, SettingsOverrides};
pub use metrics::RunMetrics;
pub use models::{ExportConfig, Subscription, SubscriptionResult};
pub use pipeline::{Pipeline, RunOutcome};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
