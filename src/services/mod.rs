//! Services module - the stages of an export run.
//!
//! Every stage talks to an external CLI through [`CommandRunner`], so the
//! whole pipeline can be driven by a fake runner in tests.
//!
//! # Components
//!
//! - [`AzureCli`]: authentication check, subscription and resource group listing
//! - [`discovery`]: subscription selection and exclusion, service connection
//!   lookup and the CI build matrix
//! - [`ResourceGroupFilter`]: resource group exclusion by exact name or glob
//! - [`ExportRunner`]: one `aztfexport` invocation per resource group
//! - [`SubscriptionOrchestrator`]: runs the export for every resource group
//!   of a subscription and aggregates the outcomes
//! - [`GitPublisher`]: pushes an export to its repository and rotates the
//!   dated backup branches planned by [`retention`]

pub mod azure_cli;
pub mod command;
pub mod discovery;
pub mod export;
pub mod orchestrator;
pub mod publish;
pub mod retention;
pub mod rg_filter;

pub use azure_cli::{AuthStatus, AzureCli, DiscoveryError};
pub use command::{
    CommandError, CommandOutput, CommandRunner, CommandSpec, StreamedOutput, SystemRunner,
};
pub use discovery::{MatrixEntry, Selection, SubscriptionPartition};
pub use export::{ExportError, ExportRunner};
pub use orchestrator::SubscriptionOrchestrator;
pub use publish::{GitPublisher, PatToken, PublishError, PublishReport};
pub use retention::{BackupBranch, RetentionPlan};
pub use rg_filter::{ExclusionPatterns, ResourceGroupFilter, ResourceGroupPartition};
