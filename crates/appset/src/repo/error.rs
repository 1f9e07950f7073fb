//! Snapshot and git error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while acquiring or reading a repository snapshot.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Repository directory not found: {0}")]
    RepositoryNotFound(PathBuf),

    #[error("Failed to read repository directory '{path}': {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Failed to read file '{path}': {message}")]
    ReadFile { path: String, message: String },

    #[error("Path not found in snapshot: {0}")]
    NotFound(String),

    #[error("Invalid glob pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Revision '{0}' could not be resolved")]
    RevisionNotFound(String),

    #[error("Git operation failed: {0}")]
    GitOperation(String),

    #[error("Git network error: {0}")]
    GitNetworkError(String),

    #[error("Git repository not initialized")]
    GitNotInitialized,

    #[error("Git authentication failed: {0}")]
    GitAuthFailed(String),
}

impl SnapshotError {
    /// Returns true if the error is likely transient and the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SnapshotError::GitNetworkError(_))
    }
}

/// Classifies a git stderr string into a more specific error variant.
pub fn classify_git_error(stderr: &str) -> SnapshotError {
    let lower = stderr.to_lowercase();

    if lower.contains("could not resolve host")
        || lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("network is unreachable")
        || lower.contains("unable to access")
        || lower.contains("failed to connect")
        || lower.contains("couldn't connect to server")
        || lower.contains("the remote end hung up unexpectedly")
    {
        return SnapshotError::GitNetworkError(stderr.trim().to_string());
    }

    if lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("invalid credentials")
    {
        return SnapshotError::GitAuthFailed(stderr.trim().to_string());
    }

    if lower.contains("unknown revision")
        || lower.contains("bad revision")
        || lower.contains("needed a single revision")
    {
        return SnapshotError::RevisionNotFound(stderr.trim().to_string());
    }

    SnapshotError::GitOperation(stderr.trim().to_string())
}

/// Result type for snapshot operations.
pub type Result<T> = std::result::Result<T, SnapshotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_network_error() {
        let err = classify_git_error("fatal: unable to access 'https://example.com/repo.git/'");
        assert!(matches!(err, SnapshotError::GitNetworkError(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_auth_error() {
        let err = classify_git_error("remote: Authentication failed for 'https://example.com'");
        assert!(matches!(err, SnapshotError::GitAuthFailed(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_classify_unknown_revision() {
        let err = classify_git_error("fatal: Needed a single revision");
        assert!(matches!(err, SnapshotError::RevisionNotFound(_)));
    }

    #[test]
    fn test_classify_fallback() {
        let err = classify_git_error("  something odd happened  ");
        match err {
            SnapshotError::GitOperation(msg) => assert_eq!(msg, "something odd happened"),
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
