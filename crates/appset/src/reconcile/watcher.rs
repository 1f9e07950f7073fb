//! File system watcher for a local repository checkout.
//!
//! Hidden paths are ignored, except the git refs that move when a commit
//! lands, so both plain directories and git checkouts wake the scheduler.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, Debouncer};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::error::{ReconcileError, Result};

/// Event emitted when something in the repository changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoChangeEvent {
    pub change_type: ChangeType,
    /// Path relative to the repository root.
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Created or modified; the debouncer does not tell them apart.
    Modified,
    Deleted,
    /// A git ref moved.
    RefUpdated,
}

/// Repository watcher.
pub struct RepoWatcher {
    root: PathBuf,
    sender: broadcast::Sender<RepoChangeEvent>,
    shutdown: Arc<AtomicBool>,
}

impl RepoWatcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let (sender, _) = broadcast::channel(100);
        Self {
            root: root.into(),
            sender,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RepoChangeEvent> {
        self.sender.subscribe()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Watches the repository until stopped. Blocks the calling thread.
    pub fn watch(&self) -> Result<()> {
        let (tx, rx) = std::sync::mpsc::channel();

        let mut debouncer: Debouncer<RecommendedWatcher> =
            new_debouncer(Duration::from_millis(500), tx)
                .map_err(|e| ReconcileError::Watch(e.to_string()))?;

        debouncer
            .watcher()
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| ReconcileError::Watch(e.to_string()))?;

        log::info!("Started watching repository: {}", self.root.display());

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Ok(events)) => {
                    for event in events {
                        if let Some(change) = self.process_event(event) {
                            log::debug!("Repository change: {:?} {}", change.change_type, change.path);
                            let _ = self.sender.send(change);
                        }
                    }
                }
                Ok(Err(e)) => {
                    log::error!("Watch error: {}", e);
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    break;
                }
            }
        }

        log::info!("Stopped watching repository");
        Ok(())
    }

    fn process_event(&self, event: DebouncedEvent) -> Option<RepoChangeEvent> {
        let relative = event.path.strip_prefix(&self.root).ok()?;
        let path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if path.is_empty() {
            return None;
        }

        let change_type = if is_git_ref(&path) {
            ChangeType::RefUpdated
        } else if is_hidden(&path) {
            return None;
        } else if event.path.exists() {
            ChangeType::Modified
        } else {
            ChangeType::Deleted
        };

        Some(RepoChangeEvent { change_type, path })
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn is_git_ref(path: &str) -> bool {
    path == ".git/HEAD" || path == ".git/packed-refs" || path.starts_with(".git/refs/")
}

fn is_hidden(path: &str) -> bool {
    path.split('/').any(|segment| segment.starts_with('.'))
}

/// Runs a [`RepoWatcher`] on a background thread.
pub struct AsyncRepoWatcher {
    watcher: Arc<RepoWatcher>,
    watch_handle: Option<std::thread::JoinHandle<Result<()>>>,
}

impl AsyncRepoWatcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            watcher: Arc::new(RepoWatcher::new(root)),
            watch_handle: None,
        }
    }

    pub fn start(&mut self) {
        if self.watch_handle.is_some() {
            return;
        }

        let watcher = Arc::clone(&self.watcher);
        self.watch_handle = Some(std::thread::spawn(move || watcher.watch()));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RepoChangeEvent> {
        self.watcher.subscribe()
    }

    pub fn stop(&mut self) {
        self.watcher.stop();
        if let Some(handle) = self.watch_handle.take() {
            match handle.join() {
                Ok(Err(e)) => log::error!("Repository watcher failed: {}", e),
                Err(_) => log::error!("Repository watcher panicked"),
                Ok(Ok(())) => {}
            }
        }
    }
}

impl Drop for AsyncRepoWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
