//! Data models for the exporter.
//!
//! - [`ExportConfig`]: typed view of `subscriptions.yaml`, one struct per section
//! - [`Subscription`] / [`ResourceGroup`]: units discovered from the Azure CLI
//! - [`ExportUnitResult`], [`SubscriptionResult`], [`RunSummary`]: what a run
//!   produces and persists as JSON
//!
//! Results are built once per subscription and are not mutated after the
//! driver has decided the publish status.

pub mod config;
pub mod results;
pub mod subscription;

pub use config::{
    AzureDevOpsSection, AztfexportSection, ExportConfig, GitSection, OutputSection, ParsedConfig,
    SubscriptionExclusions,
};
pub use results::{
    ExportUnitResult, PublishStatus, RunMode, RunSummary, SubscriptionResult, SubscriptionStatus,
    UnitStatus,
};
pub use subscription::{ResourceGroup, Subscription, sanitize_name};
