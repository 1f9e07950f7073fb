//! Snapshots of a plain directory checkout.
//!
//! The directory is walked once and copied into a [`MemorySnapshot`], so a
//! pass keeps seeing the same content even if files change on disk while it
//! runs.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use super::error::{Result, SnapshotError};
use super::memory::MemorySnapshot;
use super::{RepoSnapshot, SnapshotProvider};

/// Files larger than this are listed but their content is not captured.
const MAX_CAPTURED_FILE_BYTES: u64 = 1024 * 1024;

/// Captures a local directory as a snapshot on every call.
pub struct FsSnapshotProvider {
    root: PathBuf,
}

impl FsSnapshotProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the repository root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walks the directory tree into an in-memory snapshot.
    pub fn capture(&self) -> Result<MemorySnapshot> {
        if !self.root.is_dir() {
            return Err(SnapshotError::RepositoryNotFound(self.root.clone()));
        }

        let mut entries: Vec<(String, Option<Vec<u8>>, bool)> = Vec::new();
        let mut hasher = DefaultHasher::new();

        let walker = WalkDir::new(&self.root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            // Skip hidden files and directories (.git, .github, editor swap files)
            .filter_entry(|e| {
                e.depth() == 0
                    || !e
                        .file_name()
                        .to_str()
                        .map(|s| s.starts_with('.'))
                        .unwrap_or(false)
            });

        for entry in walker {
            let entry = entry.map_err(|e| SnapshotError::ReadDirectory {
                path: self.root.clone(),
                source: e,
            })?;
            if entry.depth() == 0 {
                continue;
            }

            let relative = match entry.path().strip_prefix(&self.root) {
                Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };

            if entry.file_type().is_dir() {
                relative.hash(&mut hasher);
                entries.push((relative, None, true));
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if size > MAX_CAPTURED_FILE_BYTES {
                log::debug!("Not capturing content of large file {} ({} bytes)", relative, size);
                relative.hash(&mut hasher);
                size.hash(&mut hasher);
                entries.push((relative, None, false));
                continue;
            }

            let content = fs::read(entry.path()).map_err(|e| SnapshotError::ReadFile {
                path: relative.clone(),
                message: e.to_string(),
            })?;
            relative.hash(&mut hasher);
            content.hash(&mut hasher);
            entries.push((relative, Some(content), false));
        }

        let mut snapshot = MemorySnapshot::new(format!("fs-{:016x}", hasher.finish()));
        for (path, content, is_dir) in entries {
            match (is_dir, content) {
                (true, _) => snapshot.add_dir(&path),
                (false, Some(content)) => snapshot.add_file(&path, content),
                (false, None) => snapshot.add_uncaptured_file(
                    &path,
                    format!("file exceeds {} bytes", MAX_CAPTURED_FILE_BYTES),
                ),
            }
        }

        Ok(snapshot)
    }
}

impl SnapshotProvider for FsSnapshotProvider {
    fn snapshot(&self) -> Result<Arc<dyn RepoSnapshot>> {
        let snapshot = self.capture()?;
        log::debug!(
            "Captured directory snapshot {} from {}",
            snapshot.revision(),
            self.root.display()
        );
        Ok(Arc::new(snapshot))
    }
}
