//! Turns resolved parameter tuples into named deployable descriptors.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::params::ParameterSet;
use crate::report::{ErrorKind, ErrorScope, ScopedError};
use crate::template;

static RE_DNS_SUBDOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").unwrap()
});

const MAX_NAME_LEN: usize = 253;

/// Failures that abort synthesis for the whole application set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("Descriptor name '{name}' is produced by {first} and {second} with different content")]
    DuplicateName {
        name: String,
        first: ParameterSet,
        second: ParameterSet,
    },

    #[error("Name field '{field}' is not bound in tuple {tuple}")]
    UnboundNameField { field: String, tuple: ParameterSet },
}

fn default_name_fields() -> Vec<String> {
    vec!["cluster_name".to_string(), "appname".to_string()]
}

fn default_name_separator() -> String {
    "-".to_string()
}

fn default_server_field() -> String {
    "cluster_server".to_string()
}

/// How a tuple maps onto a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorTemplate {
    #[serde(default = "default_name_fields")]
    pub name_fields: Vec<String>,

    #[serde(default = "default_name_separator")]
    pub name_separator: String,

    /// Source path template, e.g. `apps/base/{{.appname}}`.
    pub source: String,

    #[serde(default)]
    pub destination: DestinationTemplate,
}

impl DescriptorTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            name_fields: default_name_fields(),
            name_separator: default_name_separator(),
            source: source.into(),
            destination: DestinationTemplate::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationTemplate {
    /// Tuple field holding the cluster API server URL.
    #[serde(default = "default_server_field")]
    pub server_field: String,

    /// Tuple field holding a logical cluster name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_field: Option<String>,

    /// Namespace template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Default for DestinationTemplate {
    fn default() -> Self {
        Self {
            server_field: default_server_field(),
            name_field: None,
            namespace: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPolicy {
    #[serde(default)]
    pub automated: bool,
    #[serde(default)]
    pub prune: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Destination {
    /// Key applies are serialized on: the server URL, else the cluster name.
    pub fn key(&self) -> &str {
        self.server
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or_default()
    }
}

/// One unit of desired state.
///
/// Equality covers name, owner, source, destination and sync policy; the
/// originating parameters are informational.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployableDescriptor {
    pub name: String,
    pub owner: String,
    pub source: String,
    pub destination: Destination,
    pub sync_policy: SyncPolicy,
    #[serde(default, skip_serializing_if = "ParameterSet::is_empty")]
    pub params: ParameterSet,
}

impl PartialEq for DeployableDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.owner == other.owner
            && self.source == other.source
            && self.destination == other.destination
            && self.sync_policy == other.sync_policy
    }
}

impl Eq for DeployableDescriptor {}

/// Descriptors ordered by name plus tuple-scoped failures.
#[derive(Debug, Clone, Default)]
pub struct SynthesisOutput {
    pub descriptors: Vec<DeployableDescriptor>,
    pub errors: Vec<ScopedError>,
}

/// Returns true if `name` is a valid DNS-1123 subdomain.
pub fn is_valid_name(name: &str) -> bool {
    name.len() <= MAX_NAME_LEN && RE_DNS_SUBDOMAIN.is_match(name)
}

/// Builds one descriptor per tuple.
///
/// An unbound name field or two tuples that collide on name with different
/// content fail the whole set; source, destination and name-format problems
/// only drop their tuple.
pub fn synthesize(
    owner: &str,
    tuples: &[ParameterSet],
    template: &DescriptorTemplate,
    sync_policy: SyncPolicy,
) -> Result<SynthesisOutput, SynthesisError> {
    let mut by_name: BTreeMap<String, DeployableDescriptor> = BTreeMap::new();
    let mut errors = Vec::new();

    for tuple in tuples {
        let name = descriptor_name(template, tuple)?;

        if !is_valid_name(&name) {
            errors.push(ScopedError::new(
                ErrorKind::InvalidName,
                ErrorScope::Tuple(tuple.clone()),
                format!("'{}' is not a valid DNS-1123 subdomain", name),
            ));
            continue;
        }

        let (source, destination) = match resolve_target(template, tuple) {
            Ok(target) => target,
            Err(e) => {
                errors.push(e);
                continue;
            }
        };

        let descriptor = DeployableDescriptor {
            name: name.clone(),
            owner: owner.to_string(),
            source,
            destination,
            sync_policy,
            params: tuple.clone(),
        };

        match by_name.get(&name) {
            Some(existing) if *existing != descriptor => {
                return Err(SynthesisError::DuplicateName {
                    name,
                    first: existing.params.clone(),
                    second: tuple.clone(),
                });
            }
            Some(_) => log::debug!("Collapsing identical descriptor {}", name),
            None => {
                by_name.insert(name, descriptor);
            }
        }
    }

    Ok(SynthesisOutput {
        descriptors: by_name.into_values().collect(),
        errors,
    })
}

fn descriptor_name(
    template: &DescriptorTemplate,
    tuple: &ParameterSet,
) -> Result<String, SynthesisError> {
    let parts = template
        .name_fields
        .iter()
        .map(|field| {
            tuple
                .get(field)
                .ok_or_else(|| SynthesisError::UnboundNameField {
                    field: field.clone(),
                    tuple: tuple.clone(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parts.join(template.name_separator.as_str()))
}

fn resolve_target(
    template: &DescriptorTemplate,
    tuple: &ParameterSet,
) -> Result<(String, Destination), ScopedError> {
    let source = template::resolve(&template.source, tuple)
        .map_err(|e| ScopedError::from_template(&e, tuple))?;

    let server = tuple.get(&template.destination.server_field).map(str::to_string);
    let name = template
        .destination
        .name_field
        .as_deref()
        .and_then(|field| tuple.get(field))
        .map(str::to_string);

    if server.is_none() && name.is_none() {
        let mut fields = vec![template.destination.server_field.as_str()];
        fields.extend(template.destination.name_field.as_deref());
        return Err(ScopedError::new(
            ErrorKind::UnboundField,
            ErrorScope::Tuple(tuple.clone()),
            format!("no destination field bound (tried: {})", fields.join(", ")),
        ));
    }

    let namespace = template
        .destination
        .namespace
        .as_deref()
        .map(|ns| template::resolve(ns, tuple))
        .transpose()
        .map_err(|e| ScopedError::from_template(&e, tuple))?;

    Ok((
        source,
        Destination {
            server,
            name,
            namespace,
        },
    ))
}
