//! In-memory snapshot, also the backing store for directory snapshots.

use std::collections::{BTreeMap, BTreeSet};

use super::error::{Result, SnapshotError};
use super::{compile_pattern, normalize_path, parent, RepoSnapshot, MATCH_OPTIONS};

/// Directory and file listing shared by the in-memory and git snapshots.
#[derive(Debug, Clone, Default)]
pub(crate) struct TreeIndex {
    dirs: BTreeSet<String>,
    files: BTreeSet<String>,
}

impl TreeIndex {
    /// Registers a directory and all of its ancestors.
    pub(crate) fn add_dir(&mut self, path: &str) {
        let mut current = normalize_path(path);
        while !current.is_empty() {
            if !self.dirs.insert(current.clone()) {
                break;
            }
            current = parent(&current).to_string();
        }
    }

    /// Registers a file and all of its ancestor directories.
    pub(crate) fn add_file(&mut self, path: &str) {
        let path = normalize_path(path);
        self.add_dir(parent(&path));
        self.files.insert(path);
    }

    pub(crate) fn list_dirs(&self, pattern: &str) -> Result<Vec<String>> {
        let pattern = compile_pattern(pattern)?;
        Ok(self
            .dirs
            .iter()
            .filter(|d| pattern.matches_with(d, MATCH_OPTIONS))
            .cloned()
            .collect())
    }

    pub(crate) fn list_files(&self, pattern: &str) -> Result<Vec<String>> {
        let pattern = compile_pattern(pattern)?;
        Ok(self
            .files
            .iter()
            .filter(|f| pattern.matches_with(f, MATCH_OPTIONS))
            .cloned()
            .collect())
    }

    pub(crate) fn contains(&self, path: &str) -> bool {
        let path = normalize_path(path);
        path.is_empty() || self.dirs.contains(&path) || self.files.contains(&path)
    }

    pub(crate) fn has_file(&self, path: &str) -> bool {
        self.files.contains(path)
    }
}

/// A snapshot held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemorySnapshot {
    revision: String,
    index: TreeIndex,
    contents: BTreeMap<String, Vec<u8>>,
    /// Files that are listed but whose content was not captured.
    uncaptured: BTreeMap<String, String>,
}

impl MemorySnapshot {
    pub fn new(revision: impl Into<String>) -> Self {
        Self {
            revision: revision.into(),
            index: TreeIndex::default(),
            contents: BTreeMap::new(),
            uncaptured: BTreeMap::new(),
        }
    }

    /// Adds a file (and its parent directories).
    pub fn add_file(&mut self, path: &str, content: impl Into<Vec<u8>>) {
        let path = normalize_path(path);
        self.index.add_file(&path);
        self.contents.insert(path, content.into());
    }

    /// Lists a file without its content; reading it fails with `reason`.
    pub(crate) fn add_uncaptured_file(&mut self, path: &str, reason: impl Into<String>) {
        let path = normalize_path(path);
        self.index.add_file(&path);
        self.uncaptured.insert(path, reason.into());
    }

    /// Adds a directory, which may stay empty.
    pub fn add_dir(&mut self, path: &str) {
        self.index.add_dir(path);
    }

    /// Builder-style [`add_file`](Self::add_file).
    pub fn with_file(mut self, path: &str, content: impl Into<Vec<u8>>) -> Self {
        self.add_file(path, content);
        self
    }

    /// Builder-style [`add_dir`](Self::add_dir).
    pub fn with_dir(mut self, path: &str) -> Self {
        self.add_dir(path);
        self
    }
}

impl RepoSnapshot for MemorySnapshot {
    fn revision(&self) -> &str {
        &self.revision
    }

    fn list_directories(&self, pattern: &str) -> Result<Vec<String>> {
        self.index.list_dirs(pattern)
    }

    fn list_files(&self, pattern: &str) -> Result<Vec<String>> {
        self.index.list_files(pattern)
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let path = normalize_path(path);
        if let Some(reason) = self.uncaptured.get(&path) {
            return Err(SnapshotError::ReadFile {
                path,
                message: reason.clone(),
            });
        }
        self.contents
            .get(&path)
            .cloned()
            .ok_or(SnapshotError::NotFound(path))
    }

    fn exists(&self, path: &str) -> bool {
        self.index.contains(path)
    }
}
