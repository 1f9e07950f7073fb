//! Test harness for isolated reconciliation runs.
//!
//! The `TestHarness` lays out, in one temporary directory:
//! - `repo/`: a platform repository with clusters, locations and addons
//! - `config/`: a `Settings` resource plus the `base-apps` and `addons`
//!   application sets
//! - `rendered/`: the output directory of the manifest apply engine

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use assert_fs::prelude::*;
use assert_fs::TempDir;

use appset::config::{ApplicationSetResource, ConfigLoader, ConfigValidator, LoadedConfig};
use appset::reconcile::{
    resolve_application_set, ApplyEngine, ReconcileOptions, Reconciler, SetResolution,
};
use appset::repo::{FsSnapshotProvider, RepoSnapshot, SnapshotProvider};

/// Clusters in the default fixture: (name, location).
pub const CLUSTERS: &[(&str, &str)] = &[("c1", "us-east"), ("c2", "us-east"), ("c3", "eu-west")];

/// Base apps deployed at every location.
pub const BASE_APPS: &[&str] = &["monitoring", "ingress", "logging"];

/// Addon directories per cluster; c2 has none.
pub const ADDONS: &[(&str, &str)] = &[
    ("c1", "gpu-operator"),
    ("c3", "gpu-operator"),
    ("c3", "edge-cache"),
];

pub struct TestHarness {
    temp_dir: TempDir,
    pub repo_dir: PathBuf,
    pub config_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl TestHarness {
    /// Creates the default fixture with automated sync and pruning.
    pub fn new() -> Self {
        Self::with_prune(true)
    }

    pub fn with_prune(prune: bool) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let repo_dir = temp_dir.path().join("repo");
        let config_dir = temp_dir.path().join("config");
        let output_dir = temp_dir.path().join("rendered");

        let harness = Self {
            temp_dir,
            repo_dir,
            config_dir,
            output_dir,
        };
        harness.write_repository();
        harness.write_config(prune);
        harness
    }

    fn write_repository(&self) {
        for (cluster, location) in CLUSTERS {
            self.add_cluster(cluster, location);
        }

        for location in ["us-east", "eu-west"] {
            for app in BASE_APPS {
                self.repo_child(&format!("locations/{}/apps/{}", location, app))
                    .create_dir_all()
                    .unwrap();
            }
        }
        // Directory presence is enough; content is irrelevant.
        self.repo_child("locations/us-east/apps/ingress/kustomization.yaml")
            .write_str("resources: [deployment.yaml]\n")
            .unwrap();

        for (cluster, addon) in ADDONS {
            self.repo_child(&format!("clusters/{}/addons/{}", cluster, addon))
                .create_dir_all()
                .unwrap();
        }
    }

    fn write_config(&self, prune: bool) {
        self.config_child("settings.yaml")
            .write_str(&format!(
                r#"apiVersion: appset.io/v1
kind: Settings
metadata:
  name: default
spec:
  repository:
    type: directory
    path: {}
  reconcile:
    intervalSecs: 60
    timeoutSecs: 30
    maxConcurrentSets: 2
    retry:
      maxAttempts: 2
      baseDelayMillis: 1
  output:
    directory: {}
"#,
                self.repo_dir.display(),
                self.output_dir.display()
            ))
            .unwrap();

        self.config_child("applicationsets/base-apps.yaml")
            .write_str(&format!(
                r#"apiVersion: appset.io/v1
kind: ApplicationSet
metadata:
  name: base-apps
spec:
  generators:
    - files:
        path: clusters/*/config.yaml
    - directories:
        path: "locations/{{{{.location}}}}/apps/*"
  template:
    source: "locations/{{{{.location}}}}/apps/{{{{.appname}}}}"
    destination:
      namespace: "{{{{.appname}}}}"
  syncPolicy:
    automated: true
    prune: {}
"#,
                prune
            ))
            .unwrap();

        self.config_child("applicationsets/addons.yaml")
            .write_str(&format!(
                r#"apiVersion: appset.io/v1
kind: ApplicationSet
metadata:
  name: addons
spec:
  generators:
    - files:
        path: clusters/*/config.yaml
    - directories:
        path: "clusters/{{{{.cluster_name}}}}/addons/*"
  template:
    source: "clusters/{{{{.cluster_name}}}}/addons/{{{{.appname}}}}"
  syncPolicy:
    automated: true
    prune: {}
"#,
                prune
            ))
            .unwrap();
    }

    pub fn repo_child(&self, path: &str) -> assert_fs::fixture::ChildPath {
        self.temp_dir.child("repo").child(path)
    }

    pub fn config_child(&self, path: &str) -> assert_fs::fixture::ChildPath {
        self.temp_dir.child("config").child(path)
    }

    /// Adds `clusters/<name>/config.yaml` pointing at `location`.
    pub fn add_cluster(&self, name: &str, location: &str) {
        self.repo_child(&format!("clusters/{}/config.yaml", name))
            .write_str(&format!(
                "cluster_name: {}\ncluster_server: https://{}.k8s.example.com\nlocation: {}\n",
                name, name, location
            ))
            .unwrap();
    }

    pub fn remove_repo_dir(&self, path: &str) {
        std::fs::remove_dir_all(self.repo_dir.join(path)).unwrap();
    }

    /// Loads and validates the configuration directory.
    pub fn load_config(&self) -> LoadedConfig {
        let config = ConfigLoader::new(&self.config_dir).load().unwrap();
        ConfigValidator::new().validate(&config).unwrap();
        config
    }

    pub fn application_sets(&self) -> Vec<ApplicationSetResource> {
        self.load_config()
            .application_sets
            .into_iter()
            .map(|s| s.resource)
            .collect()
    }

    pub fn application_set(&self, name: &str) -> ApplicationSetResource {
        self.application_sets()
            .into_iter()
            .find(|s| s.metadata.name == name)
            .unwrap()
    }

    pub fn provider(&self) -> FsSnapshotProvider {
        FsSnapshotProvider::new(&self.repo_dir)
    }

    pub fn snapshot(&self) -> Arc<dyn RepoSnapshot> {
        self.provider().snapshot().unwrap()
    }

    /// Resolves one application set against a fresh snapshot.
    pub fn resolve(&self, name: &str) -> SetResolution {
        let snapshot = self.snapshot();
        resolve_application_set(&self.application_set(name), &*snapshot)
    }

    pub fn reconciler(&self, engine: Arc<dyn ApplyEngine>) -> Reconciler {
        let config = self.load_config();
        let options = ReconcileOptions::from(&config.settings.resource.spec.reconcile);
        Reconciler::new(
            Arc::new(self.provider()),
            engine,
            config.application_sets.into_iter().map(|s| s.resource).collect(),
            options,
        )
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }
}

/// Descriptor names of a resolution, in order.
pub fn names(resolution: &SetResolution) -> Vec<String> {
    resolution
        .descriptors
        .as_ref()
        .map(|d| d.iter().map(|d| d.name.clone()).collect())
        .unwrap_or_default()
}
