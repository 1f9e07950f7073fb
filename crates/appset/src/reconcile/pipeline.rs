//! Resolution of one application set: generators, then synthesis.

use serde::Serialize;
use tracing::info_span;

use crate::config::ApplicationSetResource;
use crate::generator::combine;
use crate::params::ParameterSet;
use crate::repo::RepoSnapshot;
use crate::report::ScopedError;
use crate::synth::{synthesize, DeployableDescriptor};

/// Desired state of one application set for one snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetResolution {
    pub name: String,
    /// `None` when a configuration defect aborted the set.
    pub descriptors: Option<Vec<DeployableDescriptor>>,
    /// Scoped failures, conflicts included.
    pub errors: Vec<ScopedError>,
}

impl SetResolution {
    pub fn is_aborted(&self) -> bool {
        self.descriptors.is_none()
    }
}

/// Folds the set's generators over `snapshot` and synthesizes descriptors.
pub fn resolve_application_set(
    set: &ApplicationSetResource,
    snapshot: &dyn RepoSnapshot,
) -> SetResolution {
    let name = set.metadata.name.clone();
    let _span = info_span!("appset.resolve", set = %name, revision = snapshot.revision()).entered();

    let combined = combine(&set.spec.generators, snapshot, &ParameterSet::new());
    let mut errors = combined.errors;
    errors.extend(combined.conflicts);

    let descriptors =
        match synthesize(&name, &combined.tuples, &set.spec.template, set.spec.sync_policy) {
            Ok(output) => {
                errors.extend(output.errors);
                log::debug!(
                    "Application set {} resolved to {} descriptors",
                    name,
                    output.descriptors.len()
                );
                Some(output.descriptors)
            }
            Err(e) => {
                log::error!("Application set {} aborted: {}", name, e);
                errors.push(ScopedError::from_synthesis(&e, &name));
                None
            }
        };

    SetResolution {
        name,
        descriptors,
        errors,
    }
}
