//! Apply engines: where desired descriptors are materialized.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ObjectMeta, API_VERSION};
use crate::synth::{DeployableDescriptor, Destination, SyncPolicy};

/// Label carrying the owning application set on written manifests.
pub const OWNER_LABEL: &str = "appset.io/owner";

/// Errors reported by an apply engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    #[error("Descriptor '{name}' was rejected: {message}")]
    Rejected { name: String, message: String },

    #[error("Transient failure applying '{name}': {message}")]
    Transient { name: String, message: String },

    #[error("I/O error at '{path}': {message}")]
    Io { path: PathBuf, message: String },

    #[error("Invalid manifest '{path}': {message}")]
    InvalidManifest { path: PathBuf, message: String },

    #[error("Apply engine state lock poisoned")]
    LockPoisoned,
}

impl ApplyError {
    /// Returns true if the failure may go away on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApplyError::Transient { .. } | ApplyError::Io { .. })
    }
}

/// What the engine did with an applied descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApplyOutcome {
    /// The descriptor is in place.
    Applied,
    /// The engine accepted the descriptor and is still rolling it out.
    InProgress,
}

/// External collaborator that owns current state.
#[async_trait]
pub trait ApplyEngine: Send + Sync {
    /// Descriptors currently applied on behalf of `owner`.
    async fn current(&self, owner: &str) -> Result<Vec<DeployableDescriptor>, ApplyError>;

    /// Creates or updates a descriptor.
    async fn apply(&self, descriptor: &DeployableDescriptor) -> Result<ApplyOutcome, ApplyError>;

    /// Removes a descriptor that is no longer desired.
    async fn prune(&self, descriptor: &DeployableDescriptor) -> Result<(), ApplyError>;
}

// ============================================================================
// In-memory engine
// ============================================================================

/// One recorded engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyAction {
    Apply(String),
    Prune(String),
}

#[derive(Debug, Clone)]
enum FailureMode {
    /// Fail this many more times, then succeed.
    Transient(u32),
    Reject,
}

#[derive(Default)]
struct MemoryState {
    /// owner -> name -> descriptor
    applied: BTreeMap<String, BTreeMap<String, DeployableDescriptor>>,
    actions: Vec<ApplyAction>,
    failures: HashMap<String, FailureMode>,
    in_flight: HashMap<String, usize>,
    max_in_flight: HashMap<String, usize>,
    total_in_flight: usize,
    max_total_in_flight: usize,
}

/// Engine that keeps applied descriptors in memory and records every call.
#[derive(Default)]
pub struct MemoryApplyEngine {
    state: Mutex<MemoryState>,
    delay: Option<Duration>,
}

impl MemoryApplyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds every apply for `delay` before completing it.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Makes applies of `name` fail transiently `times` times.
    pub fn fail_transiently(&self, name: &str, times: u32) {
        if let Ok(mut state) = self.state.lock() {
            state
                .failures
                .insert(name.to_string(), FailureMode::Transient(times));
        }
    }

    /// Makes every apply of `name` fail permanently.
    pub fn reject(&self, name: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.failures.insert(name.to_string(), FailureMode::Reject);
        }
    }

    /// Seeds current state without recording an action.
    pub fn preload(&self, descriptors: impl IntoIterator<Item = DeployableDescriptor>) {
        if let Ok(mut state) = self.state.lock() {
            for d in descriptors {
                state
                    .applied
                    .entry(d.owner.clone())
                    .or_default()
                    .insert(d.name.clone(), d);
            }
        }
    }

    /// Every call so far, in completion order.
    pub fn actions(&self) -> Vec<ApplyAction> {
        self.state
            .lock()
            .map(|state| state.actions.clone())
            .unwrap_or_default()
    }

    pub fn clear_actions(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.actions.clear();
        }
    }

    /// Names currently applied for `owner`, in order.
    pub fn applied_names(&self, owner: &str) -> Vec<String> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.applied.get(owner).map(|m| m.keys().cloned().collect()))
            .unwrap_or_default()
    }

    /// Highest number of simultaneous applies seen for one destination key.
    pub fn max_in_flight(&self, destination: &str) -> usize {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.max_in_flight.get(destination).copied())
            .unwrap_or_default()
    }

    /// Highest number of simultaneous applies seen overall.
    pub fn max_total_in_flight(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.max_total_in_flight)
            .unwrap_or_default()
    }

    fn enter(&self, key: &str) -> Result<(), ApplyError> {
        let mut state = self.state.lock().map_err(|_| ApplyError::LockPoisoned)?;
        let count = {
            let count = state.in_flight.entry(key.to_string()).or_default();
            *count += 1;
            *count
        };
        let max = state.max_in_flight.entry(key.to_string()).or_default();
        *max = (*max).max(count);
        state.total_in_flight += 1;
        state.max_total_in_flight = state.max_total_in_flight.max(state.total_in_flight);
        Ok(())
    }

    fn leave(&self, key: &str) -> Result<(), ApplyError> {
        let mut state = self.state.lock().map_err(|_| ApplyError::LockPoisoned)?;
        if let Some(count) = state.in_flight.get_mut(key) {
            *count = count.saturating_sub(1);
        }
        state.total_in_flight = state.total_in_flight.saturating_sub(1);
        Ok(())
    }

    fn finish_apply(&self, descriptor: &DeployableDescriptor) -> Result<ApplyOutcome, ApplyError> {
        let mut state = self.state.lock().map_err(|_| ApplyError::LockPoisoned)?;

        match state.failures.get_mut(&descriptor.name) {
            Some(FailureMode::Reject) => {
                return Err(ApplyError::Rejected {
                    name: descriptor.name.clone(),
                    message: "rejected by engine".to_string(),
                })
            }
            Some(FailureMode::Transient(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                return Err(ApplyError::Transient {
                    name: descriptor.name.clone(),
                    message: "engine unavailable".to_string(),
                });
            }
            _ => {}
        }

        state
            .applied
            .entry(descriptor.owner.clone())
            .or_default()
            .insert(descriptor.name.clone(), descriptor.clone());
        state
            .actions
            .push(ApplyAction::Apply(descriptor.name.clone()));
        Ok(ApplyOutcome::Applied)
    }
}

#[async_trait]
impl ApplyEngine for MemoryApplyEngine {
    async fn current(&self, owner: &str) -> Result<Vec<DeployableDescriptor>, ApplyError> {
        let state = self.state.lock().map_err(|_| ApplyError::LockPoisoned)?;
        Ok(state
            .applied
            .get(owner)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn apply(&self, descriptor: &DeployableDescriptor) -> Result<ApplyOutcome, ApplyError> {
        let key = descriptor.destination.key().to_string();
        self.enter(&key)?;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = self.finish_apply(descriptor);
        self.leave(&key)?;
        result
    }

    async fn prune(&self, descriptor: &DeployableDescriptor) -> Result<(), ApplyError> {
        let mut state = self.state.lock().map_err(|_| ApplyError::LockPoisoned)?;
        if let Some(owned) = state.applied.get_mut(&descriptor.owner) {
            owned.remove(&descriptor.name);
        }
        state
            .actions
            .push(ApplyAction::Prune(descriptor.name.clone()));
        Ok(())
    }
}

// ============================================================================
// Manifest directory engine
// ============================================================================

/// `Application` document written per descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationManifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: ApplicationSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    pub source: ApplicationSource,
    pub destination: Destination,
    pub sync_policy: SyncPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSource {
    pub path: String,
}

impl ApplicationManifest {
    pub const KIND: &'static str = "Application";

    pub fn from_descriptor(descriptor: &DeployableDescriptor) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: Self::KIND.to_string(),
            metadata: ObjectMeta::new(&descriptor.name).with_label(OWNER_LABEL, &descriptor.owner),
            spec: ApplicationSpec {
                source: ApplicationSource {
                    path: descriptor.source.clone(),
                },
                destination: descriptor.destination.clone(),
                sync_policy: descriptor.sync_policy,
            },
        }
    }

    /// The owner label, if present.
    pub fn owner(&self) -> Option<&str> {
        self.metadata.labels.get(OWNER_LABEL).map(String::as_str)
    }

    pub fn into_descriptor(self, owner: &str) -> DeployableDescriptor {
        DeployableDescriptor {
            name: self.metadata.name,
            owner: owner.to_string(),
            source: self.spec.source.path,
            destination: self.spec.destination,
            sync_policy: self.spec.sync_policy,
            params: Default::default(),
        }
    }
}

/// Engine that writes `<root>/<owner>/<name>.yaml` manifests.
pub struct ManifestDirApplyEngine {
    root: PathBuf,
}

impl ManifestDirApplyEngine {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the manifest for `descriptor`.
    pub fn manifest_path(&self, descriptor: &DeployableDescriptor) -> PathBuf {
        self.root
            .join(&descriptor.owner)
            .join(format!("{}.yaml", descriptor.name))
    }

    async fn read_manifest(path: &Path) -> Result<ApplicationManifest, ApplyError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| io_error(path, e))?;
        let manifest: ApplicationManifest =
            serde_yaml::from_str(&content).map_err(|e| ApplyError::InvalidManifest {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        if manifest.kind != ApplicationManifest::KIND {
            return Err(ApplyError::InvalidManifest {
                path: path.to_path_buf(),
                message: format!("unexpected kind '{}'", manifest.kind),
            });
        }
        Ok(manifest)
    }
}

fn io_error(path: &Path, err: std::io::Error) -> ApplyError {
    ApplyError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

#[async_trait]
impl ApplyEngine for ManifestDirApplyEngine {
    async fn current(&self, owner: &str) -> Result<Vec<DeployableDescriptor>, ApplyError> {
        let dir = self.root.join(owner);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&dir, e)),
        };

        let mut descriptors = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, e))? {
            let path = entry.path();
            let is_manifest = path.extension().and_then(|e| e.to_str()) == Some("yaml");
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if !is_manifest || hidden {
                continue;
            }

            let manifest = Self::read_manifest(&path).await?;
            if manifest.owner() != Some(owner) {
                log::debug!("Ignoring {} not owned by {}", path.display(), owner);
                continue;
            }
            descriptors.push(manifest.into_descriptor(owner));
        }

        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(descriptors)
    }

    async fn apply(&self, descriptor: &DeployableDescriptor) -> Result<ApplyOutcome, ApplyError> {
        let path = self.manifest_path(descriptor);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }

        let manifest = ApplicationManifest::from_descriptor(descriptor);
        let yaml = serde_yaml::to_string(&manifest).map_err(|e| ApplyError::Rejected {
            name: descriptor.name.clone(),
            message: e.to_string(),
        })?;

        // Write then rename so readers never see a partial manifest.
        let tmp = path.with_file_name(format!(".{}.yaml.tmp", descriptor.name));
        tokio::fs::write(&tmp, yaml)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(&path, e))?;

        log::debug!("Wrote {}", path.display());
        Ok(ApplyOutcome::Applied)
    }

    async fn prune(&self, descriptor: &DeployableDescriptor) -> Result<(), ApplyError> {
        let path = self.manifest_path(descriptor);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                log::debug!("Removed {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}
