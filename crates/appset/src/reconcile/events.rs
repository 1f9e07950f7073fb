//! Events broadcast by the reconciler.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::reconciler::ReconcileState;

/// Something observable happened during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ReconcileEvent {
    /// The reconciler moved to a new state.
    StateChanged { state: ReconcileState },
    /// A pass finished; counts are totals across all application sets.
    #[serde(rename_all = "camelCase")]
    PassCompleted {
        revision: String,
        applied: usize,
        pruned: usize,
        errors: usize,
    },
    /// A pass ended as `Failed`.
    PassFailed { error: String },
}

/// Broadcasts an event, ignoring the absence of subscribers.
pub(crate) fn emit(sender: &broadcast::Sender<ReconcileEvent>, event: ReconcileEvent) {
    if let Err(e) = sender.send(event) {
        log::trace!("No reconcile event listeners: {}", e);
    }
}
