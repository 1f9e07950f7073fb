//! Aggregated, scoped failure reporting.
//!
//! Every failure that does not stop a pass is recorded here with enough
//! context (file path, parameter tuple, descriptor name or application set)
//! to locate it. Nothing is dropped: conflicts that merely prune a
//! combination still show up, with their own kind.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::generator::GeneratorError;
use crate::params::ParameterSet;
use crate::synth::SynthesisError;
use crate::template::TemplateError;

/// Failure class, mirroring how far a failure is allowed to propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Malformed structured content at one path.
    Parse,
    /// A template referenced a missing field, was malformed, or bound a
    /// field to a path that does not exist.
    UnboundField,
    /// Two parameter sets disagreed on a key; the pairing was pruned.
    Conflict,
    /// Two descriptors collided on name.
    DuplicateName,
    /// A synthesized name is not a valid resource name.
    InvalidName,
    /// The apply collaborator failed for one descriptor.
    Apply,
    /// The repository snapshot could not be read.
    Snapshot,
    /// A path pattern is not a valid glob once resolved.
    InvalidPattern,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Parse => "parse",
            ErrorKind::UnboundField => "unbound-field",
            ErrorKind::Conflict => "conflict",
            ErrorKind::DuplicateName => "duplicate-name",
            ErrorKind::InvalidName => "invalid-name",
            ErrorKind::Apply => "apply",
            ErrorKind::Snapshot => "snapshot",
            ErrorKind::InvalidPattern => "invalid-pattern",
        };
        f.write_str(s)
    }
}

/// The smallest unit a failure applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "value")]
pub enum ErrorScope {
    File(String),
    Tuple(ParameterSet),
    Descriptor(String),
    ApplicationSet(String),
}

impl fmt::Display for ErrorScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorScope::File(path) => write!(f, "file {}", path),
            ErrorScope::Tuple(params) => write!(f, "tuple {}", params),
            ErrorScope::Descriptor(name) => write!(f, "descriptor {}", name),
            ErrorScope::ApplicationSet(name) => write!(f, "application set {}", name),
        }
    }
}

/// One failure with its scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopedError {
    pub kind: ErrorKind,
    pub scope: ErrorScope,
    pub message: String,
}

impl ScopedError {
    pub fn new(kind: ErrorKind, scope: ErrorScope, message: impl Into<String>) -> Self {
        Self {
            kind,
            scope,
            message: message.into(),
        }
    }

    /// Scopes a template failure to the tuple it was resolved against.
    pub fn from_template(err: &TemplateError, params: &ParameterSet) -> Self {
        Self::new(
            ErrorKind::UnboundField,
            ErrorScope::Tuple(params.clone()),
            err.to_string(),
        )
    }

    /// Scopes a generator failure: file-level failures to their path,
    /// resolution failures to the tuple that was bound.
    pub fn from_generator(err: &GeneratorError, bound: &ParameterSet) -> Self {
        match err {
            // Unreadable files share the parse class; the message keeps the cause.
            GeneratorError::Parse { path, .. } | GeneratorError::Read { path, .. } => Self::new(
                ErrorKind::Parse,
                ErrorScope::File(path.clone()),
                err.to_string(),
            ),
            GeneratorError::Conflict { path, .. } => Self::new(
                ErrorKind::Conflict,
                ErrorScope::File(path.clone()),
                err.to_string(),
            ),
            GeneratorError::Template(_) | GeneratorError::DanglingReference { .. } => Self::new(
                ErrorKind::UnboundField,
                ErrorScope::Tuple(bound.clone()),
                err.to_string(),
            ),
            GeneratorError::InvalidPattern { .. } => Self::new(
                ErrorKind::InvalidPattern,
                ErrorScope::Tuple(bound.clone()),
                err.to_string(),
            ),
        }
    }

    pub fn from_synthesis(err: &SynthesisError, owner: &str) -> Self {
        match err {
            SynthesisError::DuplicateName { name, .. } => Self::new(
                ErrorKind::DuplicateName,
                ErrorScope::Descriptor(name.clone()),
                err.to_string(),
            ),
            SynthesisError::UnboundNameField { .. } => Self::new(
                ErrorKind::UnboundField,
                ErrorScope::ApplicationSet(owner.to_string()),
                err.to_string(),
            ),
        }
    }

    /// Whether this failure marks its application set as unhealthy.
    /// Conflicts only prune combinations.
    pub fn is_failure(&self) -> bool {
        self.kind != ErrorKind::Conflict
    }
}

impl fmt::Display for ScopedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.scope, self.message)
    }
}
