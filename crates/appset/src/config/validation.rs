//! Cross-resource validation for controller configuration.

use std::collections::HashSet;

use super::error::{ConfigError, Result};
use super::loader::LoadedConfig;
use super::resource::{ApplicationSetResource, RepositoryType, SettingsResource};
use crate::generator::GeneratorSpec;
use crate::synth::is_valid_name;
use crate::template;

/// Validator for controller configuration.
pub struct ConfigValidator {
    /// Collected validation errors.
    errors: Vec<String>,
}

impl ConfigValidator {
    /// Creates a new validator.
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Validates the entire loaded configuration.
    pub fn validate(&mut self, config: &LoadedConfig) -> Result<()> {
        self.errors.clear();

        self.validate_settings(&config.settings.resource);

        for set in &config.application_sets {
            self.validate_application_set(&set.resource);
        }

        self.validate_unique_names(config);

        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(self.errors.join("; ")))
        }
    }

    /// Validates the settings resource.
    fn validate_settings(&mut self, settings: &SettingsResource) {
        let spec = &settings.spec;

        if spec.repository.path.is_empty() {
            self.errors
                .push("Settings: repository.path is required".to_string());
        }

        if spec.output.directory.is_empty() {
            self.errors
                .push("Settings: output.directory is required".to_string());
        }

        if spec.repository.repo_type == RepositoryType::Git {
            if spec.repository.revision.is_empty() {
                self.errors
                    .push("Settings: repository.revision is required for git".to_string());
            }
            if spec.repository.fetch && spec.repository.remote.is_empty() {
                self.errors.push(
                    "Settings: repository.remote is required when fetch is enabled".to_string(),
                );
            }
        }

        let reconcile = &spec.reconcile;
        if reconcile.interval_secs == 0 {
            self.errors
                .push("Settings: reconcile.intervalSecs must be greater than 0".to_string());
        }
        if reconcile.timeout_secs == 0 {
            self.errors
                .push("Settings: reconcile.timeoutSecs must be greater than 0".to_string());
        }
        if reconcile.max_concurrent_sets == 0 {
            self.errors.push(
                "Settings: reconcile.maxConcurrentSets must be greater than 0".to_string(),
            );
        }
        if reconcile.retry.max_attempts == 0 {
            self.errors.push(
                "Settings: reconcile.retry.maxAttempts must be greater than 0".to_string(),
            );
        }
    }

    /// Validates an application set resource.
    fn validate_application_set(&mut self, set: &ApplicationSetResource) {
        let name = &set.metadata.name;

        if name.is_empty() {
            self.errors
                .push("ApplicationSet: name is required".to_string());
            return;
        }

        if !is_valid_name(name) {
            self.errors.push(format!(
                "ApplicationSet '{}': name must be a valid DNS-1123 subdomain",
                name
            ));
        }

        let resource = format!("ApplicationSet '{}'", name);

        if set.spec.generators.is_empty() {
            self.errors
                .push(format!("{}: at least one generator is required", resource));
        } else {
            self.validate_first_stage(&set.spec.generators[0], &resource);
            for (i, generator) in set.spec.generators.iter().enumerate() {
                self.validate_generator(generator, &resource, &format!("generators[{}]", i));
            }
        }

        let template = &set.spec.template;
        if template.name_fields.is_empty() {
            self.errors
                .push(format!("{}: template.nameFields must not be empty", resource));
        }
        if template.source.is_empty() {
            self.errors
                .push(format!("{}: template.source is required", resource));
        }
        self.check_template(&template.source, &resource, "template.source");
        self.check_path_security(&template.source, &resource, "template.source");
        if let Some(namespace) = &template.destination.namespace {
            self.check_template(namespace, &resource, "template.destination.namespace");
        }
    }

    /// The first stage has nothing bound yet, so it may not reference fields.
    fn validate_first_stage(&mut self, generator: &GeneratorSpec, resource: &str) {
        for pattern in generator.templates() {
            if template::has_placeholders(pattern) {
                self.errors.push(format!(
                    "{}: first generator may not reference fields: '{}'",
                    resource, pattern
                ));
            }
        }
    }

    fn validate_generator(&mut self, generator: &GeneratorSpec, resource: &str, field: &str) {
        match generator {
            GeneratorSpec::Directories(g) => {
                self.check_pattern(&g.path, resource, &format!("{}.directories.path", field));
                if g.name_key.is_empty() {
                    self.errors.push(format!(
                        "{}: {}.directories.nameKey must not be empty",
                        resource, field
                    ));
                }
                for (i, exclude) in g.exclude.iter().enumerate() {
                    self.check_pattern(
                        exclude,
                        resource,
                        &format!("{}.directories.exclude[{}]", field, i),
                    );
                }
            }
            GeneratorSpec::Files(g) => {
                self.check_pattern(&g.path, resource, &format!("{}.files.path", field));
                if g.path_key.as_deref() == Some("") {
                    self.errors.push(format!(
                        "{}: {}.files.pathKey must not be empty",
                        resource, field
                    ));
                }
            }
            GeneratorSpec::List(g) => {
                if let Err(e) = g.parameter_sets() {
                    self.errors
                        .push(format!("{}: {}.list: {}", resource, field, e));
                }
            }
            GeneratorSpec::Matrix(m) => {
                if m.generators.is_empty() {
                    self.errors.push(format!(
                        "{}: {}.matrix needs at least one generator",
                        resource, field
                    ));
                }
                for (i, nested) in m.generators.iter().enumerate() {
                    self.validate_generator(
                        nested,
                        resource,
                        &format!("{}.matrix.generators[{}]", field, i),
                    );
                }
            }
        }
    }

    /// Checks a templated glob: well-formed placeholders, valid glob once the
    /// placeholders are blanked, and no escape from the repository root.
    fn check_pattern(&mut self, pattern: &str, resource: &str, field: &str) {
        if pattern.is_empty() {
            self.errors
                .push(format!("{}: {} is required", resource, field));
            return;
        }

        if !self.check_template(pattern, resource, field) {
            return;
        }

        let blanked: crate::params::ParameterSet = template::referenced_fields(pattern)
            .unwrap_or_default()
            .into_iter()
            .map(|f| (f, "x"))
            .collect();
        if let Ok(literal) = template::resolve(pattern, &blanked) {
            if let Err(e) = glob::Pattern::new(&literal) {
                self.errors.push(format!(
                    "{}: invalid glob in {} '{}': {}",
                    resource, field, pattern, e.msg
                ));
            }
        }

        self.check_path_security(pattern, resource, field);
    }

    /// Returns false if the template is malformed.
    fn check_template(&mut self, value: &str, resource: &str, field: &str) -> bool {
        match template::referenced_fields(value) {
            Ok(_) => true,
            Err(e) => {
                self.errors
                    .push(format!("{}: {}: {}", resource, field, e));
                false
            }
        }
    }

    fn check_path_security(&mut self, path: &str, resource: &str, field: &str) {
        if contains_path_traversal(path) {
            self.errors.push(format!(
                "Path traversal detected in {}.{}: '{}'",
                resource, field, path
            ));
        }

        if std::path::Path::new(path).is_absolute() {
            self.errors.push(format!(
                "Absolute path not allowed in {}.{}: paths are relative to the repository root",
                resource, field
            ));
        }
    }

    fn validate_unique_names(&mut self, config: &LoadedConfig) {
        let mut names: HashSet<&str> = HashSet::new();
        for set in &config.application_sets {
            let name = set.resource.metadata.name.as_str();
            if !names.insert(name) {
                self.errors
                    .push(format!("Duplicate application set name: '{}'", name));
            }
        }
    }

    /// Returns the collected errors.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks if a path could escape the repository root via `..`.
fn contains_path_traversal(path: &str) -> bool {
    path.split(&['/', '\\'][..]).any(|segment| segment == "..")
}

// ============================================================================
// Tests
// ============================================================================
