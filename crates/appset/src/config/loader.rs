//! Configuration loader for multi-file YAML configurations.

use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::error::{ConfigError, Result};
use super::resource::{
    AnyResource, ApplicationSetResource, ResourceHeader, ResourceKind, ResourceWithPath,
    SettingsResource, API_VERSION,
};

/// Loaded configuration from the config directory.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Directory the configuration was loaded from.
    pub config_dir: PathBuf,
    /// The settings resource (required).
    pub settings: ResourceWithPath<SettingsResource>,
    /// All application sets, sorted by name.
    pub application_sets: Vec<ResourceWithPath<ApplicationSetResource>>,
}

impl LoadedConfig {
    /// Resolves a configured path against the config directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }

    pub fn repository_path(&self) -> PathBuf {
        self.resolve_path(&self.settings.resource.spec.repository.path)
    }

    pub fn output_directory(&self) -> PathBuf {
        self.resolve_path(&self.settings.resource.spec.output.directory)
    }

    /// Returns all resources as a flat list.
    pub fn all_resources(&self) -> Vec<(ResourceKind, &str, &Path)> {
        let mut resources = vec![(
            ResourceKind::Settings,
            self.settings.resource.metadata.name.as_str(),
            self.settings.path.as_path(),
        )];
        for set in &self.application_sets {
            resources.push((
                ResourceKind::ApplicationSet,
                set.resource.metadata.name.as_str(),
                set.path.as_path(),
            ));
        }
        resources
    }
}

/// Configuration loader.
pub struct ConfigLoader {
    /// Root directory for configuration files.
    config_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new config loader for the given directory.
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// Returns the config directory path.
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Loads all configuration from the config directory.
    pub fn load(&self) -> Result<LoadedConfig> {
        if !self.config_dir.exists() {
            return Err(ConfigError::ConfigDirNotFound(self.config_dir.clone()));
        }

        let mut settings: Option<ResourceWithPath<SettingsResource>> = None;
        let mut application_sets: Vec<ResourceWithPath<ApplicationSetResource>> = Vec::new();

        for entry in WalkDir::new(&self.config_dir)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();

            if !path.is_file() {
                continue;
            }

            // Skip files in hidden directories or hidden files themselves
            if let Ok(relative) = path.strip_prefix(&self.config_dir) {
                let has_hidden_component = relative.components().any(|c| {
                    c.as_os_str()
                        .to_str()
                        .map(|s| s.starts_with('.'))
                        .unwrap_or(false)
                });
                if has_hidden_component {
                    continue;
                }
            }

            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if ext != "yaml" && ext != "yml" {
                continue;
            }

            let resource = self.load_file(path).inspect_err(|e| {
                log::warn!("Failed to load {}: {}", path.display(), e);
            })?;
            let relative_path = path
                .strip_prefix(&self.config_dir)
                .unwrap_or(path)
                .to_path_buf();

            match resource {
                AnyResource::Settings(r) => {
                    if settings.is_some() {
                        return Err(ConfigError::DuplicateName {
                            kind: ResourceKind::Settings.to_string(),
                            name: r.metadata.name.clone(),
                        });
                    }
                    settings = Some(ResourceWithPath::new(r, relative_path));
                }
                AnyResource::ApplicationSet(r) => {
                    if application_sets
                        .iter()
                        .any(|s| s.resource.metadata.name == r.metadata.name)
                    {
                        return Err(ConfigError::DuplicateName {
                            kind: ResourceKind::ApplicationSet.to_string(),
                            name: r.metadata.name.clone(),
                        });
                    }
                    application_sets.push(ResourceWithPath::new(r, relative_path));
                }
            }
        }

        let settings = settings.ok_or(ConfigError::MissingSettings)?;

        application_sets.sort_by(|a, b| a.resource.metadata.name.cmp(&b.resource.metadata.name));

        log::info!(
            "Loaded {} application sets from {}",
            application_sets.len(),
            self.config_dir.display()
        );

        Ok(LoadedConfig {
            config_dir: self.config_dir.clone(),
            settings,
            application_sets,
        })
    }

    /// Loads a single resource file.
    pub fn load_file(&self, path: &Path) -> Result<AnyResource> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        self.parse_resource(&content, path)
    }

    /// Parses a resource from YAML content.
    pub fn parse_resource(&self, content: &str, path: &Path) -> Result<AnyResource> {
        let parse_error = |e: serde_yaml::Error| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            message: e.to_string(),
        };

        // Parse the header first to determine the kind
        let header: ResourceHeader = serde_yaml::from_str(content).map_err(parse_error)?;

        if header.api_version != API_VERSION {
            return Err(ConfigError::InvalidApiVersion {
                path: path.to_path_buf(),
                version: header.api_version,
                expected: API_VERSION.to_string(),
            });
        }

        match header.kind {
            ResourceKind::Settings => {
                let resource: SettingsResource =
                    serde_yaml::from_str(content).map_err(parse_error)?;
                Ok(AnyResource::Settings(resource))
            }
            ResourceKind::ApplicationSet => {
                let resource: ApplicationSetResource =
                    serde_yaml::from_str(content).map_err(parse_error)?;
                Ok(AnyResource::ApplicationSet(resource))
            }
        }
    }
}
