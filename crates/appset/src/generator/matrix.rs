//! Matrix combinator: a left fold over generator stages.

use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn};

use super::{evaluate, GeneratorSpec};
use crate::params::ParameterSet;
use crate::repo::RepoSnapshot;
use crate::report::{ErrorKind, ErrorScope, ScopedError};

/// Ordered generator stages. Stage `i + 1` may template its patterns from
/// fields produced by stages `0..=i`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixSpec {
    pub generators: Vec<GeneratorSpec>,
}

impl MatrixSpec {
    pub fn new(generators: Vec<GeneratorSpec>) -> Self {
        Self { generators }
    }
}

/// Result of folding all stages.
#[derive(Debug, Clone, Default)]
pub struct MatrixOutput {
    /// Fully merged tuples, in fold order.
    pub tuples: Vec<ParameterSet>,
    /// Failures that dropped a tuple or a file.
    pub errors: Vec<ScopedError>,
    /// Pairings pruned because two sets disagreed on a key.
    pub conflicts: Vec<ScopedError>,
}

/// Folds `specs` left to right starting from `[seed]`.
///
/// For every accumulated tuple, the next stage is evaluated with that tuple
/// bound, and each produced set is merged into it. A tuple whose stage
/// cannot be evaluated is dropped and its error recorded; the others
/// continue.
pub fn combine(
    specs: &[GeneratorSpec],
    snapshot: &dyn RepoSnapshot,
    seed: &ParameterSet,
) -> MatrixOutput {
    let mut output = MatrixOutput {
        tuples: vec![seed.clone()],
        ..Default::default()
    };

    for (index, spec) in specs.iter().enumerate() {
        let _stage = info_span!("matrix_stage", stage = index, kind = spec.kind()).entered();

        let mut next = Vec::new();
        for tuple in &output.tuples {
            let produced = match evaluate(spec, snapshot, tuple) {
                Ok(produced) => produced,
                Err(e) => {
                    warn!("Stage {} dropped tuple {}: {}", index, tuple, e);
                    output.errors.push(ScopedError::from_generator(&e, tuple));
                    continue;
                }
            };

            for err in produced.errors {
                if err.kind == ErrorKind::Conflict {
                    output.conflicts.push(err);
                } else {
                    output.errors.push(err);
                }
            }

            for params in produced.params {
                match tuple.merge(&params) {
                    Ok(merged) => next.push(merged),
                    Err(conflict) => output.conflicts.push(ScopedError::new(
                        ErrorKind::Conflict,
                        ErrorScope::Tuple(tuple.clone()),
                        conflict.to_string(),
                    )),
                }
            }
        }

        debug!(
            "Stage {} ({}) produced {} tuples from {}",
            index,
            spec.kind(),
            next.len(),
            output.tuples.len()
        );
        output.tuples = next;
    }

    output
}
