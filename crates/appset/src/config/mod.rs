//! Controller configuration.
//!
//! A configuration directory holds Kubernetes-style YAML resources:
//! - exactly one `Settings` resource (repository, reconcile tuning, output)
//! - any number of `ApplicationSet` resources
//!
//! Resources are loaded recursively, hidden files are skipped, and the result
//! is cross-validated before the controller starts.

pub mod error;
pub mod loader;
pub mod resource;
pub mod validation;

pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, LoadedConfig};
pub use resource::{
    AnyResource, ApplicationSetResource, ApplicationSetSpec, ObjectMeta, OutputSettings,
    ReconcileSettings, RepositorySettings, RepositoryType, Resource, ResourceKind,
    ResourceWithPath, RetrySettings, SettingsResource, SettingsSpec, API_VERSION,
};
pub use validation::ConfigValidator;
