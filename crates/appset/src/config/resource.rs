//! K8s-style resource types for controller configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::generator::GeneratorSpec;
use crate::synth::{DescriptorTemplate, SyncPolicy};

/// The API version for all appset resources.
pub const API_VERSION: &str = "appset.io/v1";

/// The kind of resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Settings,
    ApplicationSet,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Settings => write!(f, "Settings"),
            ResourceKind::ApplicationSet => write!(f, "ApplicationSet"),
        }
    }
}

/// Metadata for a resource, following K8s conventions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// The unique name of the resource within its kind.
    pub name: String,

    /// Key-value labels for organizing and selecting resources.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

impl ObjectMeta {
    /// Creates a new ObjectMeta with just a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: HashMap::new(),
        }
    }

    /// Adds a label to the metadata.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// A generic K8s-style resource wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource<T> {
    /// API version, should always be `appset.io/v1`.
    pub api_version: String,

    /// The kind of resource.
    pub kind: ResourceKind,

    /// Resource metadata.
    pub metadata: ObjectMeta,

    /// The resource specification.
    pub spec: T,
}

impl<T> Resource<T> {
    /// Creates a new resource with the given kind and spec.
    pub fn new(kind: ResourceKind, name: impl Into<String>, spec: T) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind,
            metadata: ObjectMeta::new(name),
            spec,
        }
    }

    /// Returns the name of the resource.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

// ============================================================================
// Settings Resource
// ============================================================================

/// Settings specification - global controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsSpec {
    /// Where generator input is read from.
    pub repository: RepositorySettings,

    /// Reconciliation loop tuning.
    #[serde(default)]
    pub reconcile: ReconcileSettings,

    /// Trigger a pass when the repository checkout changes.
    #[serde(default)]
    pub watch: bool,

    /// Where applied descriptors are written.
    pub output: OutputSettings,
}

/// Kind of repository backing the snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryType {
    /// A plain directory, captured eagerly on every pass.
    #[default]
    Directory,
    /// A local git clone, read at a resolved commit.
    Git,
}

/// Repository settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySettings {
    #[serde(rename = "type", default)]
    pub repo_type: RepositoryType,

    /// Repository path; relative paths resolve against the config directory.
    pub path: String,

    /// Revision to resolve (git only).
    #[serde(default = "default_revision")]
    pub revision: String,

    /// Fetch from `remote` before every pass (git only).
    #[serde(default)]
    pub fetch: bool,

    #[serde(default = "default_remote")]
    pub remote: String,
}

fn default_revision() -> String {
    "HEAD".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

/// Reconciliation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSettings {
    /// Seconds between scheduled passes.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Upper bound for a single pass.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Application sets resolved in parallel.
    #[serde(default = "default_max_concurrent_sets")]
    pub max_concurrent_sets: usize,

    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_interval() -> u64 {
    180
}

fn default_timeout() -> u64 {
    120
}

fn default_max_concurrent_sets() -> usize {
    num_cpus::get()
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            timeout_secs: default_timeout(),
            max_concurrent_sets: default_max_concurrent_sets(),
            retry: RetrySettings::default(),
        }
    }
}

/// Backoff settings shared by apply retries and failed-pass retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySettings {
    /// Total apply attempts per descriptor, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay; doubled on every further attempt.
    #[serde(default = "default_base_delay_millis")]
    pub base_delay_millis: u64,

    /// Cap for the delay between failed passes.
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_millis() -> u64 {
    2000
}

fn default_max_delay_secs() -> u64 {
    300
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_millis: default_base_delay_millis(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

/// Output settings for the manifest apply engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSettings {
    /// Directory receiving `<owner>/<name>.yaml`; relative paths resolve
    /// against the config directory.
    pub directory: String,
}

/// Settings resource type alias.
pub type SettingsResource = Resource<SettingsSpec>;

// ============================================================================
// ApplicationSet Resource
// ============================================================================

/// ApplicationSet specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSetSpec {
    /// Generator stages, folded left to right like a matrix. A single entry
    /// is a plain generator.
    pub generators: Vec<GeneratorSpec>,

    /// Mapping from resolved tuples to descriptors.
    pub template: DescriptorTemplate,

    #[serde(default)]
    pub sync_policy: SyncPolicy,
}

/// ApplicationSet resource type alias.
pub type ApplicationSetResource = Resource<ApplicationSetSpec>;

// ============================================================================
// Any Resource (for generic handling)
// ============================================================================

/// A resource that can be any of the supported types.
#[derive(Debug, Clone)]
pub enum AnyResource {
    Settings(SettingsResource),
    ApplicationSet(ApplicationSetResource),
}

impl AnyResource {
    /// Returns the kind of this resource.
    pub fn kind(&self) -> ResourceKind {
        match self {
            AnyResource::Settings(_) => ResourceKind::Settings,
            AnyResource::ApplicationSet(_) => ResourceKind::ApplicationSet,
        }
    }

    /// Returns the name of this resource.
    pub fn name(&self) -> &str {
        match self {
            AnyResource::Settings(r) => &r.metadata.name,
            AnyResource::ApplicationSet(r) => &r.metadata.name,
        }
    }
}

/// Intermediate struct for parsing resources before determining their type.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceHeader {
    pub api_version: String,
    pub kind: ResourceKind,
    pub metadata: ObjectMeta,
}

// ============================================================================
// Resource with path information
// ============================================================================

/// A resource along with its file path.
#[derive(Debug, Clone)]
pub struct ResourceWithPath<T> {
    /// The resource.
    pub resource: T,
    /// The file path relative to the config directory.
    pub path: std::path::PathBuf,
}

impl<T> ResourceWithPath<T> {
    pub fn new(resource: T, path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            resource,
            path: path.into(),
        }
    }
}
