//! Read-side git operations against a local clone.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use super::parse::{format_git_error, parse_ls_tree, TreeEntry};
use crate::repo::error::{classify_git_error, Result, SnapshotError};

/// Git repository operations.
#[derive(Debug, Clone)]
pub struct GitRepository {
    /// Path to the git repository.
    repo_path: PathBuf,
}

impl GitRepository {
    /// Creates a new git repository handle.
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    /// Returns the repository path.
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Checks if the directory is a git repository.
    pub fn is_git_repo(&self) -> bool {
        self.repo_path.join(".git").exists()
    }

    /// Fetches `branch` from `remote` without touching the working tree.
    pub fn fetch(&self, remote: &str, branch: &str) -> Result<()> {
        if !self.is_git_repo() {
            return Err(SnapshotError::GitNotInitialized);
        }

        let output = self.run_git(&["fetch", remote, branch])?;
        if output.status.success() {
            Ok(())
        } else {
            Err(classify_git_error(&format_git_error(&output)))
        }
    }

    /// Resolves a revision expression to a full commit hash.
    pub fn resolve_commit(&self, revision: &str) -> Result<String> {
        if !self.is_git_repo() {
            return Err(SnapshotError::GitNotInitialized);
        }

        let spec = format!("{}^{{commit}}", revision);
        let output = self.run_git(&["rev-parse", "--verify", "--quiet", &spec])?;
        if !output.status.success() {
            return Err(SnapshotError::RevisionNotFound(revision.to_string()));
        }

        let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if commit.is_empty() {
            return Err(SnapshotError::RevisionNotFound(revision.to_string()));
        }
        Ok(commit)
    }

    /// Lists every tree and blob reachable from `commit`.
    pub fn list_tree(&self, commit: &str) -> Result<Vec<TreeEntry>> {
        let output = self.run_git(&["ls-tree", "-r", "-t", "-z", "--full-tree", commit])?;
        if !output.status.success() {
            return Err(classify_git_error(&format_git_error(&output)));
        }
        Ok(parse_ls_tree(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Reads the blob at `path` as of `commit`.
    pub fn read_blob(&self, commit: &str, path: &str) -> Result<Vec<u8>> {
        let object = format!("{}:{}", commit, path);
        let output = self.run_git(&["cat-file", "blob", &object])?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(SnapshotError::ReadFile {
                path: path.to_string(),
                message: format_git_error(&output),
            })
        }
    }

    /// Runs a git command in the repository directory.
    fn run_git(&self, args: &[&str]) -> Result<Output> {
        let output = Command::new("git")
            .current_dir(&self.repo_path)
            .args(args)
            .output()
            .map_err(|e| SnapshotError::GitOperation(e.to_string()))?;

        Ok(output)
    }
}
