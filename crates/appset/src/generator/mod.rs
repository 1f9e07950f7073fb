//! Generators: turn a repository snapshot into parameter sets.
//!
//! Four kinds exist:
//! - `directories`: one set per directory matching a pattern
//! - `files`: one set per structured file matching a pattern
//! - `list`: static sets
//! - `matrix`: a left fold over nested generators, where each stage may
//!   template its pattern from the fields produced by earlier stages

pub mod directory;
pub mod files;
pub mod list;
pub mod loader;
pub mod matrix;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::params::{MergeConflict, ParameterSet};
use crate::repo::{is_glob, normalize_path, RepoSnapshot};
use crate::report::ScopedError;
use crate::template::{self, TemplateError};

pub use directory::DirectoriesGenerator;
pub use files::FilesGenerator;
pub use list::ListGenerator;
pub use loader::{load_parameter_files, parse_parameters, ParameterFiles};
pub use matrix::{combine, MatrixOutput, MatrixSpec};

/// Errors produced while evaluating a single generator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeneratorError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("Pattern '{pattern}' resolved to '{path}', which does not exist (fields: {})", fields.join(", "))]
    DanglingReference {
        pattern: String,
        path: String,
        fields: Vec<String>,
    },

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Failed to parse '{path}': {message}")]
    Parse { path: String, message: String },

    #[error("Failed to read '{path}': {message}")]
    Read { path: String, message: String },

    #[error("Parameters from '{path}' conflict with bound parameters: {conflict}")]
    Conflict { path: String, conflict: String },
}

impl GeneratorError {
    pub(crate) fn conflict(path: &str, conflict: &MergeConflict) -> Self {
        GeneratorError::Conflict {
            path: path.to_string(),
            conflict: conflict.to_string(),
        }
    }
}

/// A declarative generator description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GeneratorEntry", into = "GeneratorEntry")]
pub enum GeneratorSpec {
    Directories(DirectoriesGenerator),
    Files(FilesGenerator),
    List(ListGenerator),
    Matrix(MatrixSpec),
}

/// Wire form: a mapping with exactly one generator key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct GeneratorEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    directories: Option<DirectoriesGenerator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    files: Option<FilesGenerator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    list: Option<ListGenerator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    matrix: Option<MatrixSpec>,
}

impl TryFrom<GeneratorEntry> for GeneratorSpec {
    type Error = String;

    fn try_from(entry: GeneratorEntry) -> Result<Self, Self::Error> {
        let mut found = Vec::new();
        if let Some(g) = entry.directories {
            found.push(GeneratorSpec::Directories(g));
        }
        if let Some(g) = entry.files {
            found.push(GeneratorSpec::Files(g));
        }
        if let Some(g) = entry.list {
            found.push(GeneratorSpec::List(g));
        }
        if let Some(g) = entry.matrix {
            found.push(GeneratorSpec::Matrix(g));
        }

        match found.len() {
            1 => Ok(found.remove(0)),
            0 => Err("generator must set one of: directories, files, list, matrix".to_string()),
            n => Err(format!("generator sets {} kinds; exactly one is allowed", n)),
        }
    }
}

impl From<GeneratorSpec> for GeneratorEntry {
    fn from(spec: GeneratorSpec) -> Self {
        let mut entry = GeneratorEntry::default();
        match spec {
            GeneratorSpec::Directories(g) => entry.directories = Some(g),
            GeneratorSpec::Files(g) => entry.files = Some(g),
            GeneratorSpec::List(g) => entry.list = Some(g),
            GeneratorSpec::Matrix(g) => entry.matrix = Some(g),
        }
        entry
    }
}

impl GeneratorSpec {
    /// Short kind name, used in logs and validation messages.
    pub fn kind(&self) -> &'static str {
        match self {
            GeneratorSpec::Directories(_) => "directories",
            GeneratorSpec::Files(_) => "files",
            GeneratorSpec::List(_) => "list",
            GeneratorSpec::Matrix(_) => "matrix",
        }
    }

    /// Templates this generator resolves before evaluation.
    pub fn templates(&self) -> Vec<&str> {
        match self {
            GeneratorSpec::Directories(g) => {
                let mut t = vec![g.path.as_str()];
                t.extend(g.exclude.iter().map(String::as_str));
                t
            }
            GeneratorSpec::Files(g) => vec![g.path.as_str()],
            GeneratorSpec::List(_) => Vec::new(),
            GeneratorSpec::Matrix(m) => m
                .generators
                .first()
                .map(|first| first.templates())
                .unwrap_or_default(),
        }
    }
}

/// Parameter sets produced by one evaluation plus any scoped errors
/// (unparseable files, conflicting files, failures in nested stages).
#[derive(Debug, Clone, Default)]
pub struct GeneratorOutput {
    pub params: Vec<ParameterSet>,
    pub errors: Vec<ScopedError>,
}

/// Evaluates `spec` against `snapshot`, with `bound` holding the fields
/// produced by earlier matrix stages (empty at the top level).
///
/// An `Err` means this evaluation as a whole could not run for `bound`
/// (unbound field, dangling reference, invalid pattern).
pub fn evaluate(
    spec: &GeneratorSpec,
    snapshot: &dyn RepoSnapshot,
    bound: &ParameterSet,
) -> Result<GeneratorOutput, GeneratorError> {
    match spec {
        GeneratorSpec::Directories(g) => g.evaluate(snapshot, bound),
        GeneratorSpec::Files(g) => g.evaluate(snapshot, bound),
        GeneratorSpec::List(g) => Ok(g.evaluate(bound)),
        GeneratorSpec::Matrix(m) => {
            let output = combine(&m.generators, snapshot, bound);
            let mut errors = output.errors;
            errors.extend(output.conflicts);
            Ok(GeneratorOutput {
                params: output.tuples,
                errors,
            })
        }
    }
}

/// Resolves a path pattern against `bound`.
///
/// Bound values are matched literally and must not be empty. When the pattern carries placeholders, the resolved path up to the end of
/// the segment holding the last placeholder must exist in the snapshot:
/// a field that points at nothing is a broken reference, not an empty match.
pub(crate) fn resolve_pattern(
    pattern: &str,
    snapshot: &dyn RepoSnapshot,
    bound: &ParameterSet,
) -> Result<String, GeneratorError> {
    let resolved = normalize_path(&template::resolve_path(pattern, bound)?);

    let Some(end) = template::last_placeholder_end(pattern) else {
        return Ok(resolved);
    };
    let segment_end = pattern[end..]
        .find('/')
        .map(|offset| end + offset)
        .unwrap_or(pattern.len());
    let raw_anchor = &pattern[..segment_end];
    let anchor = normalize_path(&template::resolve_path(raw_anchor, bound)?);

    let anchor_exists = if is_glob(&anchor) {
        let dirs = snapshot
            .list_directories(&anchor)
            .map_err(|e| loader::listing_error(&anchor, e))?;
        let files = snapshot
            .list_files(&anchor)
            .map_err(|e| loader::listing_error(&anchor, e))?;
        !dirs.is_empty() || !files.is_empty()
    } else {
        snapshot.exists(&anchor)
    };

    if anchor_exists {
        Ok(resolved)
    } else {
        Err(GeneratorError::DanglingReference {
            pattern: pattern.to_string(),
            path: anchor,
            fields: template::referenced_fields(raw_anchor)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::MemorySnapshot;

    fn snapshot() -> MemorySnapshot {
        MemorySnapshot::new("r1")
            .with_file("clusters/c1/config.yaml", "cluster_name: c1\n")
            .with_dir("locations/us-east/apps/ingress")
    }

    #[test]
    fn test_deserialize_single_kind() {
        let spec: GeneratorSpec =
            serde_yaml::from_str("directories:\n  path: apps/*\n").unwrap();
        match spec {
            GeneratorSpec::Directories(g) => {
                assert_eq!(g.path, "apps/*");
                assert_eq!(g.name_key, "appname");
            }
            other => panic!("unexpected generator: {:?}", other),
        }
    }

    #[test]
    fn test_deserialize_rejects_two_kinds() {
        let result: Result<GeneratorSpec, _> = serde_yaml::from_str(
            "directories:\n  path: apps/*\nfiles:\n  path: a.yaml\n",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_rejects_empty() {
        let result: Result<GeneratorSpec, _> = serde_yaml::from_str("{}");
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_pattern_without_placeholders() {
        let snap = snapshot();
        let resolved = resolve_pattern("nothing/here/*", &snap, &ParameterSet::new()).unwrap();
        assert_eq!(resolved, "nothing/here/*");
    }

    #[test]
    fn test_resolve_pattern_existing_anchor() {
        let snap = snapshot();
        let bound = ParameterSet::new().with("location", "us-east");
        let resolved = resolve_pattern("locations/{{.location}}/apps/*", &snap, &bound).unwrap();
        assert_eq!(resolved, "locations/us-east/apps/*");
    }

    #[test]
    fn test_resolve_pattern_dangling_anchor() {
        let snap = snapshot();
        let bound = ParameterSet::new().with("location", "mars");
        let err = resolve_pattern("locations/{{.location}}/apps/*", &snap, &bound).unwrap_err();
        assert_eq!(
            err,
            GeneratorError::DanglingReference {
                pattern: "locations/{{.location}}/apps/*".to_string(),
                path: "locations/mars".to_string(),
                fields: vec!["location".to_string()],
            }
        );
    }

    #[test]
    fn test_resolve_pattern_anchor_only_checks_templated_prefix() {
        // clusters/c1 exists even though it has no addons directory.
        let snap = snapshot();
        let bound = ParameterSet::new().with("cluster_name", "c1");
        let resolved =
            resolve_pattern("clusters/{{.cluster_name}}/addons/*", &snap, &bound).unwrap();
        assert_eq!(resolved, "clusters/c1/addons/*");
    }

    #[test]
    fn test_resolve_pattern_unbound() {
        let snap = snapshot();
        let err = resolve_pattern("clusters/{{.cluster_name}}/*", &snap, &ParameterSet::new())
            .unwrap_err();
        assert!(matches!(err, GeneratorError::Template(TemplateError::UnboundField { .. })));
    }

    #[test]
    fn test_resolve_pattern_wildcard_value_is_literal() {
        let snap = snapshot().with_dir("locations/eu-west/apps/logging");
        let bound = ParameterSet::new().with("location", "*");
        let err = resolve_pattern("locations/{{.location}}/apps/*", &snap, &bound).unwrap_err();
        assert_eq!(
            err,
            GeneratorError::DanglingReference {
                pattern: "locations/{{.location}}/apps/*".to_string(),
                path: "locations/[*]".to_string(),
                fields: vec!["location".to_string()],
            }
        );
    }

    #[test]
    fn test_resolve_pattern_matches_literal_metacharacter_directory() {
        let snap = snapshot().with_dir("locations/lab[1]/apps/bench");
        let bound = ParameterSet::new().with("location", "lab[1]");
        let resolved = resolve_pattern("locations/{{.location}}/apps/*", &snap, &bound).unwrap();
        let dirs = snap.list_directories(&resolved).unwrap();
        assert_eq!(dirs, vec!["locations/lab[1]/apps/bench".to_string()]);
    }

    #[test]
    fn test_resolve_pattern_empty_value() {
        let snap = snapshot();
        let bound = ParameterSet::new().with("location", "");
        let err = resolve_pattern("locations/{{.location}}/*", &snap, &bound).unwrap_err();
        assert!(matches!(err, GeneratorError::Template(TemplateError::EmptyField { .. })));
    }

    #[test]
    fn test_templates_of_nested_matrix_are_first_stage() {
        let spec: GeneratorSpec = serde_yaml::from_str(
            r#"
matrix:
  generators:
    - files:
        path: clusters/*/config.yaml
    - directories:
        path: locations/{{.location}}/apps/*
"#,
        )
        .unwrap();
        assert_eq!(spec.kind(), "matrix");
        assert_eq!(spec.templates(), vec!["clusters/*/config.yaml"]);
    }
}
