//! Reconciliation: keeping applied descriptors in line with the repository.
//!
//! - `pipeline`: resolves one application set against a snapshot
//! - `diff`: desired versus current descriptors
//! - `apply`: the engine that owns current state
//! - `reconciler`: the pass state machine
//! - `sync_scheduler`: periodic and triggered passes with backoff
//! - `watcher`: repository change notifications

pub mod apply;
pub mod diff;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod reconciler;
pub mod sync_scheduler;
pub mod watcher;

pub use apply::{
    ApplicationManifest, ApplyAction, ApplyEngine, ApplyError, ApplyOutcome,
    ManifestDirApplyEngine, MemoryApplyEngine, OWNER_LABEL,
};
pub use diff::{diff, DescriptorDiff, DiffSummary};
pub use error::{ReconcileError, Result};
pub use events::ReconcileEvent;
pub use pipeline::{resolve_application_set, SetResolution};
pub use reconciler::{
    CancelHandle, PassReport, ReconcileOptions, ReconcileState, Reconciler, SetReport,
};
pub use sync_scheduler::SyncScheduler;
pub use watcher::{AsyncRepoWatcher, ChangeType, RepoChangeEvent, RepoWatcher};
