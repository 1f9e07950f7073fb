//! Pass-level reconciliation errors.

use std::time::Duration;
use thiserror::Error;

use super::reconciler::PassReport;
use crate::repo::SnapshotError;

/// Errors that end a reconciliation pass as `Failed`.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("A reconciliation pass is already in progress")]
    AlreadyRunning,

    /// `report` holds what the Applying phase finished before the deadline.
    #[error("Reconciliation pass exceeded its {timeout:?} deadline")]
    Timeout {
        timeout: Duration,
        report: Option<Box<PassReport>>,
    },

    /// `report` holds what the Applying phase finished before the cancel.
    #[error("Reconciliation pass was cancelled")]
    Cancelled { report: Option<Box<PassReport>> },

    #[error("Failed to acquire repository snapshot: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Resolution of application set '{set}' panicked: {message}")]
    ResolverPanicked { set: String, message: String },

    #[error("Background task failed: {0}")]
    TaskFailed(String),

    #[error("Watch error: {0}")]
    Watch(String),
}

impl ReconcileError {
    /// Whether the scheduler should retry the pass with backoff.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReconcileError::AlreadyRunning)
    }

    /// The partial report of a pass stopped during Applying.
    pub fn partial_report(&self) -> Option<&PassReport> {
        match self {
            ReconcileError::Timeout { report, .. } | ReconcileError::Cancelled { report } => {
                report.as_deref()
            }
            _ => None,
        }
    }

    pub(crate) fn with_report(self, partial: PassReport) -> Self {
        match self {
            ReconcileError::Timeout { timeout, .. } => ReconcileError::Timeout {
                timeout,
                report: Some(Box::new(partial)),
            },
            ReconcileError::Cancelled { .. } => ReconcileError::Cancelled {
                report: Some(Box::new(partial)),
            },
            other => other,
        }
    }
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;
