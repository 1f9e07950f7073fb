//! Desired-versus-current comparison by descriptor name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::synth::DeployableDescriptor;

/// Difference between the desired and current descriptors of one set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescriptorDiff {
    /// Desired but not present.
    pub added: Vec<DeployableDescriptor>,
    /// Present with a different source, destination or sync policy.
    pub changed: Vec<DeployableDescriptor>,
    /// Present but no longer desired.
    pub removed: Vec<DeployableDescriptor>,
    pub unchanged: usize,
}

/// Name-only view of a diff, for reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: usize,
}

impl DescriptorDiff {
    /// True when desired and current state agree.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    pub fn summary(&self) -> DiffSummary {
        let names = |list: &[DeployableDescriptor]| -> Vec<String> {
            list.iter().map(|d| d.name.clone()).collect()
        };
        DiffSummary {
            added: names(&self.added),
            changed: names(&self.changed),
            removed: names(&self.removed),
            unchanged: self.unchanged,
        }
    }
}

/// Compares `desired` against `current` by name. All output lists are
/// ordered by name.
pub fn diff(desired: &[DeployableDescriptor], current: &[DeployableDescriptor]) -> DescriptorDiff {
    let current_by_name: BTreeMap<&str, &DeployableDescriptor> =
        current.iter().map(|d| (d.name.as_str(), d)).collect();
    let desired_by_name: BTreeMap<&str, &DeployableDescriptor> =
        desired.iter().map(|d| (d.name.as_str(), d)).collect();

    let mut result = DescriptorDiff::default();

    for (name, wanted) in &desired_by_name {
        match current_by_name.get(name) {
            None => result.added.push((*wanted).clone()),
            Some(existing) if *existing != *wanted => result.changed.push((*wanted).clone()),
            Some(_) => result.unchanged += 1,
        }
    }

    for (name, existing) in &current_by_name {
        if !desired_by_name.contains_key(name) {
            result.removed.push((*existing).clone());
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterSet;
    use crate::synth::{Destination, SyncPolicy};

    fn descriptor(name: &str, source: &str) -> DeployableDescriptor {
        DeployableDescriptor {
            name: name.to_string(),
            owner: "addons".to_string(),
            source: source.to_string(),
            destination: Destination {
                server: Some("https://c1.example.com".to_string()),
                ..Default::default()
            },
            sync_policy: SyncPolicy {
                automated: true,
                prune: true,
            },
            params: ParameterSet::new(),
        }
    }

    #[test]
    fn test_self_diff_is_empty() {
        let set = vec![
            descriptor("c1-ingress", "apps/ingress"),
            descriptor("c1-logging", "apps/logging"),
        ];
        let result = diff(&set, &set);
        assert!(result.is_empty());
        assert_eq!(result.unchanged, 2);
    }

    #[test]
    fn test_added_changed_removed() {
        let current = vec![
            descriptor("a", "apps/a"),
            descriptor("b", "apps/b"),
            descriptor("c", "apps/c"),
        ];
        let desired = vec![
            descriptor("a", "apps/a"),
            descriptor("b", "apps/b2"),
            descriptor("d", "apps/d"),
        ];

        let summary = diff(&desired, &current).summary();
        assert_eq!(summary.added, vec!["d"]);
        assert_eq!(summary.changed, vec!["b"]);
        assert_eq!(summary.removed, vec!["c"]);
        assert_eq!(summary.unchanged, 1);
    }

    #[test]
    fn test_sync_policy_change_is_a_change() {
        let current = vec![descriptor("a", "apps/a")];
        let mut updated = descriptor("a", "apps/a");
        updated.sync_policy.prune = false;

        let result = diff(&[updated], &current);
        assert_eq!(result.changed.len(), 1);
    }

    #[test]
    fn test_params_do_not_count_as_change() {
        let current = vec![descriptor("a", "apps/a")];
        let mut desired = descriptor("a", "apps/a");
        desired.params = ParameterSet::new().with("cluster_name", "c1");

        assert!(diff(&[desired], &current).is_empty());
    }
}
