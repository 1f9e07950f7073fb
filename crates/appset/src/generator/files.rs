//! Structured-file generator.

use serde::{Deserialize, Serialize};

use super::{load_parameter_files, resolve_pattern, GeneratorError, GeneratorOutput};
use crate::params::ParameterSet;
use crate::repo::{basename, parent, RepoSnapshot};
use crate::report::ScopedError;

/// Yields one parameter set per structured file matching `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesGenerator {
    /// Glob over file paths; may contain `{{.field}}` placeholders.
    pub path: String,

    /// When set, the file's directory is exposed under this key and its
    /// terminal segment under `<pathKey>.basename`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_key: Option<String>,
}

impl FilesGenerator {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            path_key: None,
        }
    }

    pub fn with_path_key(mut self, key: impl Into<String>) -> Self {
        self.path_key = Some(key.into());
        self
    }

    pub(crate) fn evaluate(
        &self,
        snapshot: &dyn RepoSnapshot,
        bound: &ParameterSet,
    ) -> Result<GeneratorOutput, GeneratorError> {
        let pattern = resolve_pattern(&self.path, snapshot, bound)?;

        let mut output = GeneratorOutput::default();
        for loaded in load_parameter_files(snapshot, &pattern)? {
            let (path, mut content) = match loaded {
                Ok(loaded) => loaded,
                Err(e) => {
                    log::warn!("Skipping parameter file: {}", e);
                    output.errors.push(ScopedError::from_generator(&e, bound));
                    continue;
                }
            };

            if let Some(key) = &self.path_key {
                let dir = parent(&path);
                content.insert(key.as_str(), dir);
                content.insert(format!("{}.basename", key), basename(dir));
            }

            match bound.merge(&content) {
                Ok(params) => output.params.push(params),
                Err(conflict) => {
                    let err = GeneratorError::conflict(&path, &conflict);
                    log::debug!("{}", err);
                    output.errors.push(ScopedError::from_generator(&err, bound));
                }
            }
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{ErrorKind, ErrorScope};
    use crate::repo::MemorySnapshot;

    fn snapshot() -> MemorySnapshot {
        MemorySnapshot::new("r1")
            .with_file(
                "clusters/c1/config.yaml",
                "cluster_name: c1\nlocation: us-east\n",
            )
            .with_file(
                "clusters/c2/config.yaml",
                "cluster_name: c2\nlocation: us-east\n",
            )
            .with_file("clusters/c9/config.yaml", "cluster_name: [c9\n")
    }

    #[test]
    fn test_one_set_per_file() {
        let snap = snapshot();
        let output = FilesGenerator::new("clusters/*/config.yaml")
            .evaluate(&snap, &ParameterSet::new())
            .unwrap();

        assert_eq!(output.params.len(), 2);
        assert_eq!(output.params[0].get("cluster_name"), Some("c1"));
        assert_eq!(output.params[1].get("cluster_name"), Some("c2"));
    }

    #[test]
    fn test_parse_failure_is_scoped_to_file() {
        let snap = snapshot();
        let output = FilesGenerator::new("clusters/*/config.yaml")
            .evaluate(&snap, &ParameterSet::new())
            .unwrap();

        assert_eq!(output.errors.len(), 1);
        assert_eq!(output.errors[0].kind, ErrorKind::Parse);
        assert_eq!(
            output.errors[0].scope,
            ErrorScope::File("clusters/c9/config.yaml".to_string())
        );
    }

    #[test]
    fn test_path_key() {
        let snap = snapshot();
        let output = FilesGenerator::new("clusters/c1/config.yaml")
            .with_path_key("cluster_dir")
            .evaluate(&snap, &ParameterSet::new())
            .unwrap();

        let params = &output.params[0];
        assert_eq!(params.get("cluster_dir"), Some("clusters/c1"));
        assert_eq!(params.get("cluster_dir.basename"), Some("c1"));
    }

    #[test]
    fn test_file_contradicting_bound_is_conflict() {
        let snap = snapshot();
        let bound = ParameterSet::new().with("location", "eu-west");
        let output = FilesGenerator::new("clusters/c1/config.yaml")
            .evaluate(&snap, &bound)
            .unwrap();

        assert!(output.params.is_empty());
        assert_eq!(output.errors.len(), 1);
        assert_eq!(output.errors[0].kind, ErrorKind::Conflict);
    }

    #[test]
    fn test_templated_path() {
        let snap = snapshot();
        let bound = ParameterSet::new().with("cluster_name", "c2");
        let output = FilesGenerator::new("clusters/{{.cluster_name}}/config.yaml")
            .evaluate(&snap, &bound)
            .unwrap();
        assert_eq!(output.params.len(), 1);
        assert_eq!(output.params[0].get("location"), Some("us-east"));
    }

    #[test]
    fn test_dangling_templated_path() {
        let snap = snapshot();
        let bound = ParameterSet::new().with("cluster_name", "c7");
        let err = FilesGenerator::new("clusters/{{.cluster_name}}/config.yaml")
            .evaluate(&snap, &bound)
            .unwrap_err();
        assert!(matches!(err, GeneratorError::DanglingReference { .. }));
    }
}
