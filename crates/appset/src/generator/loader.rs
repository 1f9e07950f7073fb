//! Loads parameter sets from structured files in a snapshot.

use serde_yaml::Value;

use super::GeneratorError;
use crate::params::ParameterSet;
use crate::repo::{RepoSnapshot, SnapshotError};

/// Lazily reads and parses every file matching a pattern.
///
/// Each item is either the parsed parameter set for one path or the error
/// for that path; a malformed file never stops iteration.
pub struct ParameterFiles<'a> {
    snapshot: &'a dyn RepoSnapshot,
    paths: std::vec::IntoIter<String>,
}

impl Iterator for ParameterFiles<'_> {
    type Item = Result<(String, ParameterSet), GeneratorError>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.paths.next()?;
        let loaded = match self.snapshot.read_file(&path) {
            Ok(content) => parse_parameters(&path, &content).map(|params| (path, params)),
            Err(e) => Err(GeneratorError::Read {
                path,
                message: e.to_string(),
            }),
        };
        Some(loaded)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.paths.size_hint()
    }
}

/// Lists files matching `pattern` (lexicographic order) for lazy loading.
pub fn load_parameter_files<'a>(
    snapshot: &'a dyn RepoSnapshot,
    pattern: &str,
) -> Result<ParameterFiles<'a>, GeneratorError> {
    let paths = snapshot
        .list_files(pattern)
        .map_err(|e| listing_error(pattern, e))?;
    Ok(ParameterFiles {
        snapshot,
        paths: paths.into_iter(),
    })
}

pub(crate) fn listing_error(pattern: &str, err: SnapshotError) -> GeneratorError {
    match err {
        SnapshotError::InvalidPattern { pattern, reason } => {
            GeneratorError::InvalidPattern { pattern, reason }
        }
        other => GeneratorError::Read {
            path: pattern.to_string(),
            message: other.to_string(),
        },
    }
}

/// Parses file content into a flat parameter set.
///
/// `.json` files are read as JSON, everything else as YAML. Nested mappings
/// flatten to dotted keys; scalars become their string form.
pub fn parse_parameters(path: &str, content: &[u8]) -> Result<ParameterSet, GeneratorError> {
    if content.iter().all(u8::is_ascii_whitespace) {
        return Ok(ParameterSet::new());
    }

    let value: Value = if path.ends_with(".json") {
        let json: serde_json::Value =
            serde_json::from_slice(content).map_err(|e| GeneratorError::Parse {
                path: path.to_string(),
                message: e.to_string(),
            })?;
        serde_yaml::to_value(json).map_err(|e| GeneratorError::Parse {
            path: path.to_string(),
            message: e.to_string(),
        })?
    } else {
        serde_yaml::from_slice(content).map_err(|e| GeneratorError::Parse {
            path: path.to_string(),
            message: e.to_string(),
        })?
    };

    flatten_document(&value).map_err(|message| GeneratorError::Parse {
        path: path.to_string(),
        message,
    })
}

/// Flattens a top-level mapping. Null documents are empty sets.
pub fn flatten_document(value: &Value) -> Result<ParameterSet, String> {
    let mut params = ParameterSet::new();
    match value {
        Value::Null => {}
        Value::Mapping(_) => flatten_into("", value, &mut params)?,
        Value::Tagged(tagged) => return flatten_document(&tagged.value),
        other => {
            return Err(format!(
                "expected a mapping at the top level, found {}",
                type_name(other)
            ))
        }
    }
    Ok(params)
}

fn flatten_into(prefix: &str, value: &Value, out: &mut ParameterSet) -> Result<(), String> {
    match value {
        Value::Mapping(map) => {
            for (key, child) in map {
                let key = scalar_to_string(key)
                    .ok_or_else(|| format!("unsupported {} key under '{}'", type_name(key), prefix))?;
                let full_key = if prefix.is_empty() {
                    key
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_into(&full_key, child, out)?;
            }
            Ok(())
        }
        Value::Tagged(tagged) => flatten_into(prefix, &tagged.value, out),
        Value::Sequence(_) => {
            let rendered = serde_json::to_string(value).map_err(|e| e.to_string())?;
            out.insert(prefix, rendered);
            Ok(())
        }
        scalar => {
            // Only reachable for scalars, which always render.
            let rendered = scalar_to_string(scalar).unwrap_or_default();
            out.insert(prefix, rendered);
            Ok(())
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}
