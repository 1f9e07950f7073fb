//! Git-backed snapshots pinned to a resolved commit.

pub mod parse;
pub mod repository;

use std::sync::Arc;
use std::time::Duration;

pub use repository::GitRepository;

use self::parse::TreeEntryKind;
use super::error::{Result, SnapshotError};
use super::memory::TreeIndex;
use super::{normalize_path, RepoSnapshot, SnapshotProvider};

/// Maximum number of retries for transient fetch errors.
const MAX_RETRIES: u32 = 3;
/// Base delay for exponential backoff (in milliseconds).
const RETRY_BASE_DELAY_MS: u64 = 2000;

/// A repository view at one commit. Listings are captured up front; file
/// content is read on demand from the immutable commit.
pub struct GitSnapshot {
    repo: GitRepository,
    commit: String,
    index: TreeIndex,
}

impl GitSnapshot {
    /// Lists the tree of `commit` and pins the snapshot to it.
    pub fn open(repo: GitRepository, commit: String) -> Result<Self> {
        let mut index = TreeIndex::default();
        for entry in repo.list_tree(&commit)? {
            match entry.kind {
                TreeEntryKind::Tree | TreeEntryKind::Commit => index.add_dir(&entry.path),
                TreeEntryKind::Blob => index.add_file(&entry.path),
            }
        }
        Ok(Self {
            repo,
            commit,
            index,
        })
    }

    pub fn commit(&self) -> &str {
        &self.commit
    }
}

impl RepoSnapshot for GitSnapshot {
    fn revision(&self) -> &str {
        &self.commit
    }

    fn list_directories(&self, pattern: &str) -> Result<Vec<String>> {
        self.index.list_dirs(pattern)
    }

    fn list_files(&self, pattern: &str) -> Result<Vec<String>> {
        self.index.list_files(pattern)
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let path = normalize_path(path);
        if !self.index.has_file(&path) {
            return Err(SnapshotError::NotFound(path));
        }
        self.repo.read_blob(&self.commit, &path)
    }

    fn exists(&self, path: &str) -> bool {
        self.index.contains(path)
    }
}

/// Optional fetch performed before each snapshot.
#[derive(Debug, Clone)]
pub struct FetchSpec {
    pub remote: String,
    pub branch: String,
}

/// Produces snapshots of a local clone at a configured revision.
pub struct GitSnapshotProvider {
    repo: GitRepository,
    revision: String,
    fetch: Option<FetchSpec>,
    retry_base_delay: Duration,
}

impl GitSnapshotProvider {
    pub fn new(repo: GitRepository, revision: impl Into<String>) -> Self {
        Self {
            repo,
            revision: revision.into(),
            fetch: None,
            retry_base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
        }
    }

    /// Fetches from `remote` before resolving the revision.
    pub fn with_fetch(mut self, fetch: FetchSpec) -> Self {
        self.fetch = Some(fetch);
        self
    }

    pub fn repo(&self) -> &GitRepository {
        &self.repo
    }

    /// Fetch with exponential backoff on network errors.
    fn fetch_with_retry(&self, fetch: &FetchSpec) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.repo.fetch(&fetch.remote, &fetch.branch) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    let delay = self.retry_base_delay * (1 << (attempt - 1));
                    log::warn!(
                        "Fetch failed with retryable error (attempt {}/{}), retrying in {:?}: {}",
                        attempt,
                        MAX_RETRIES + 1,
                        delay,
                        e
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl SnapshotProvider for GitSnapshotProvider {
    fn snapshot(&self) -> Result<Arc<dyn RepoSnapshot>> {
        if let Some(fetch) = &self.fetch {
            self.fetch_with_retry(fetch)?;
        }

        let commit = self.repo.resolve_commit(&self.revision)?;
        log::debug!("Resolved revision {} to {}", self.revision, commit);

        let snapshot = GitSnapshot::open(self.repo.clone(), commit)?;
        Ok(Arc::new(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process::Command;
    use tempfile::TempDir;

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn git(dir: &std::path::Path, args: &[&str]) {
        let status = Command::new("git")
            .current_dir(dir)
            .args([
                "-c",
                "user.name=appset",
                "-c",
                "user.email=appset@localhost",
                "-c",
                "commit.gpgsign=false",
            ])
            .args(args)
            .output()
            .unwrap();
        assert!(status.status.success(), "git {:?} failed", args);
    }

    fn setup_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        git(dir.path(), &["init", "-q"]);
        fs::create_dir_all(dir.path().join("clusters/c1")).unwrap();
        fs::write(
            dir.path().join("clusters/c1/config.yaml"),
            "cluster_name: c1\n",
        )
        .unwrap();
        git(dir.path(), &["add", "."]);
        git(dir.path(), &["commit", "-q", "-m", "initial"]);
        dir
    }

    #[test]
    fn test_snapshot_pins_commit() {
        if !git_available() {
            return;
        }
        let dir = setup_repo();
        let provider = GitSnapshotProvider::new(GitRepository::new(dir.path()), "HEAD");
        let snapshot = provider.snapshot().unwrap();

        assert_eq!(snapshot.revision().len(), 40);
        assert_eq!(
            snapshot.list_directories("clusters/*").unwrap(),
            vec!["clusters/c1"]
        );

        // A later commit is not visible through the pinned snapshot.
        fs::create_dir_all(dir.path().join("clusters/c2")).unwrap();
        fs::write(
            dir.path().join("clusters/c2/config.yaml"),
            "cluster_name: c2\n",
        )
        .unwrap();
        git(dir.path(), &["add", "."]);
        git(dir.path(), &["commit", "-q", "-m", "add c2"]);

        assert_eq!(snapshot.list_directories("clusters/*").unwrap().len(), 1);
        assert_eq!(
            snapshot.read_file("clusters/c1/config.yaml").unwrap(),
            b"cluster_name: c1\n".to_vec()
        );
        assert!(matches!(
            snapshot.read_file("clusters/c2/config.yaml"),
            Err(SnapshotError::NotFound(_))
        ));
    }

    #[test]
    fn test_unknown_revision() {
        if !git_available() {
            return;
        }
        let dir = setup_repo();
        let provider = GitSnapshotProvider::new(GitRepository::new(dir.path()), "no-such-branch");
        assert!(matches!(
            provider.snapshot(),
            Err(SnapshotError::RevisionNotFound(_))
        ));
    }
}
