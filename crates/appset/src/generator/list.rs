//! Static list generator.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use super::loader::flatten_document;
use super::GeneratorOutput;
use crate::params::ParameterSet;
use crate::report::{ErrorKind, ErrorScope, ScopedError};

/// Yields each element, flattened like a parameter file, merged with the
/// bound fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListGenerator {
    #[serde(default)]
    pub elements: Vec<Value>,
}

impl ListGenerator {
    pub fn from_sets(sets: impl IntoIterator<Item = ParameterSet>) -> Self {
        let elements = sets
            .into_iter()
            .map(|set| {
                let mapping = set
                    .into_iter()
                    .map(|(k, v)| (Value::String(k), Value::String(v)))
                    .collect();
                Value::Mapping(mapping)
            })
            .collect();
        Self { elements }
    }

    /// Flattens every element, failing on the first one that is not a mapping.
    pub fn parameter_sets(&self) -> Result<Vec<ParameterSet>, String> {
        self.elements
            .iter()
            .enumerate()
            .map(|(i, element)| {
                flatten_document(element).map_err(|e| format!("list element {}: {}", i, e))
            })
            .collect()
    }

    pub(crate) fn evaluate(&self, bound: &ParameterSet) -> GeneratorOutput {
        let mut output = GeneratorOutput::default();
        for (i, element) in self.elements.iter().enumerate() {
            let params = match flatten_document(element) {
                Ok(params) => params,
                Err(e) => {
                    output.errors.push(ScopedError::new(
                        ErrorKind::Parse,
                        ErrorScope::Tuple(bound.clone()),
                        format!("list element {}: {}", i, e),
                    ));
                    continue;
                }
            };
            match bound.merge(&params) {
                Ok(merged) => output.params.push(merged),
                Err(conflict) => output.errors.push(ScopedError::new(
                    ErrorKind::Conflict,
                    ErrorScope::Tuple(bound.clone()),
                    format!("list element {}: {}", i, conflict),
                )),
            }
        }
        output
    }
}
