//! Directory-presence generator.

use glob::Pattern;
use serde::{Deserialize, Serialize};

use super::{loader, resolve_pattern, GeneratorError, GeneratorOutput};
use crate::params::ParameterSet;
use crate::repo::{basename, normalize_path, RepoSnapshot, MATCH_OPTIONS};
use crate::report::ScopedError;
use crate::template;

fn default_name_key() -> String {
    "appname".to_string()
}

/// Yields one parameter set per directory matching `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoriesGenerator {
    /// Glob over directory paths; may contain `{{.field}}` placeholders.
    pub path: String,

    /// Key that receives the terminal segment of each matched directory.
    #[serde(default = "default_name_key")]
    pub name_key: String,

    /// Globs (templated like `path`) of directories to leave out.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

impl DirectoriesGenerator {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name_key: default_name_key(),
            exclude: Vec::new(),
        }
    }

    pub fn with_name_key(mut self, name_key: impl Into<String>) -> Self {
        self.name_key = name_key.into();
        self
    }

    pub fn with_exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude.push(pattern.into());
        self
    }

    pub(crate) fn evaluate(
        &self,
        snapshot: &dyn RepoSnapshot,
        bound: &ParameterSet,
    ) -> Result<GeneratorOutput, GeneratorError> {
        let pattern = resolve_pattern(&self.path, snapshot, bound)?;
        let excludes = self.compile_excludes(bound)?;

        let dirs = snapshot
            .list_directories(&pattern)
            .map_err(|e| loader::listing_error(&pattern, e))?;

        let mut output = GeneratorOutput::default();
        for dir in dirs {
            if excludes.iter().any(|ex| ex.matches_with(&dir, MATCH_OPTIONS)) {
                log::trace!("Excluding directory {}", dir);
                continue;
            }

            let found = ParameterSet::new().with(self.name_key.as_str(), basename(&dir));
            match bound.merge(&found) {
                Ok(params) => output.params.push(params),
                Err(conflict) => output.errors.push(ScopedError::from_generator(
                    &GeneratorError::conflict(&dir, &conflict),
                    bound,
                )),
            }
        }

        log::debug!(
            "Directories '{}' produced {} parameter sets",
            pattern,
            output.params.len()
        );
        Ok(output)
    }

    fn compile_excludes(&self, bound: &ParameterSet) -> Result<Vec<Pattern>, GeneratorError> {
        self.exclude
            .iter()
            .map(|raw| {
                let resolved = normalize_path(&template::resolve_path(raw, bound)?);
                Pattern::new(&resolved).map_err(|e| GeneratorError::InvalidPattern {
                    pattern: resolved.clone(),
                    reason: e.msg.to_string(),
                })
            })
            .collect()
    }
}
