//! Point-in-time repository views consumed by generators.
//!
//! A snapshot is acquired once per reconciliation pass and never changes
//! afterwards, so every generator in the pass observes the same content.
//! Paths are relative and `/`-separated; patterns are globs where `*` never
//! crosses a separator.

pub mod error;
pub mod fs;
pub mod git;
pub mod memory;

use std::sync::Arc;

use glob::{MatchOptions, Pattern};

pub use error::{Result, SnapshotError};
pub use fs::FsSnapshotProvider;
pub use git::{GitRepository, GitSnapshot, GitSnapshotProvider};
pub use memory::MemorySnapshot;

/// Read-only view of a repository at a fixed revision.
pub trait RepoSnapshot: Send + Sync {
    /// Identifier of the revision this snapshot was taken at.
    fn revision(&self) -> &str;

    /// Directories matching `pattern`, lexicographically ordered.
    fn list_directories(&self, pattern: &str) -> Result<Vec<String>>;

    /// Files matching `pattern`, lexicographically ordered.
    fn list_files(&self, pattern: &str) -> Result<Vec<String>>;

    /// Raw content of the file at `path`.
    fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    /// Whether `path` names a file or directory in the snapshot.
    fn exists(&self, path: &str) -> bool;
}

/// Source of fresh snapshots, one per reconciliation pass.
pub trait SnapshotProvider: Send + Sync {
    fn snapshot(&self) -> Result<Arc<dyn RepoSnapshot>>;
}

pub(crate) const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Compiles a glob pattern after normalizing it like a snapshot path.
pub(crate) fn compile_pattern(pattern: &str) -> Result<Pattern> {
    Pattern::new(&normalize_path(pattern)).map_err(|e| SnapshotError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.msg.to_string(),
    })
}

/// Returns true if the string contains glob metacharacters.
pub fn is_glob(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

/// Strips leading `./` and `/` and trailing `/`, and collapses repeated separators.
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// The last segment of a `/`-separated path.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Everything before the last segment, or an empty string at the root.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}
