//! Periodic reconcile scheduler.
//!
//! Runs a first pass immediately, then one per interval. Manual triggers
//! and repository change events start a pass early. After a failed pass the
//! next one waits an exponential backoff instead of the interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::{broadcast, Notify};

use super::error::ReconcileError;
use super::reconciler::{ReconcileOptions, Reconciler};
use super::watcher::RepoChangeEvent;

/// Drives a reconciler from a background thread.
pub struct SyncScheduler {
    reconciler: Arc<Reconciler>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
    changes: Option<broadcast::Receiver<RepoChangeEvent>>,
}

impl SyncScheduler {
    pub fn new(reconciler: Arc<Reconciler>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            changes: None,
        }
    }

    /// Also starts a pass when the repository changes.
    pub fn with_change_events(mut self, changes: broadcast::Receiver<RepoChangeEvent>) -> Self {
        self.changes = Some(changes);
        self
    }

    /// Start the loop in a background thread.
    /// Accepts a trigger receiver for manual reconcile requests.
    pub fn start(&mut self, mut trigger_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let reconciler = Arc::clone(&self.reconciler);
        let shutdown = Arc::clone(&self.shutdown);
        let wake = Arc::clone(&self.wake);
        let interval = self.interval;
        let mut changes = self.changes.take();

        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    log::error!("Failed to start scheduler runtime: {}", e);
                    return;
                }
            };

            rt.block_on(async {
                let mut failures = 0u32;

                loop {
                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    match reconciler.reconcile().await {
                        Ok(_) => failures = 0,
                        Err(ReconcileError::AlreadyRunning) => {}
                        Err(e) => {
                            failures += 1;
                            log::error!("Reconcile failed ({} in a row): {}", failures, e);
                        }
                    }

                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    let wait = next_wait(reconciler.options(), interval, failures);
                    if failures > 0 {
                        log::info!("Backing off for {:?}", wait);
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {},
                        _ = wake.notified() => {},
                        Ok(()) = trigger_rx.recv() => {
                            log::info!("Manual reconcile triggered");
                        },
                        Some(event) = next_change(&mut changes) => {
                            log::info!("Repository changed ({:?} {}), reconciling", event.change_type, event.path);
                        },
                    }

                    if failures > 0 {
                        reconciler.recover();
                    }
                }
            });

            log::info!("Reconcile scheduler stopped");
        })
    }

    /// Signals the scheduler to stop. A pass in progress completes first.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

/// Interval after a success, capped exponential backoff after failures.
fn next_wait(options: &ReconcileOptions, interval: Duration, failures: u32) -> Duration {
    if failures == 0 {
        interval
    } else {
        options.retry_delay(failures)
    }
}

/// Next repository change, or never when change events are not wired.
async fn next_change(
    changes: &mut Option<broadcast::Receiver<RepoChangeEvent>>,
) -> Option<RepoChangeEvent> {
    let Some(rx) = changes.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::debug!("Skipped {} repository change events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {
                *changes = None;
                return std::future::pending().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::apply::MemoryApplyEngine;
    use crate::reconcile::events::ReconcileEvent;
    use crate::reconcile::watcher::ChangeType;
    use crate::repo::{self, MemorySnapshot, RepoSnapshot, SnapshotProvider};
    use std::sync::atomic::AtomicUsize;

    struct CountingProvider {
        calls: AtomicUsize,
        fail: bool,
    }

    impl SnapshotProvider for CountingProvider {
        fn snapshot(&self) -> repo::Result<Arc<dyn RepoSnapshot>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(repo::SnapshotError::GitNetworkError(
                    "could not resolve host".to_string(),
                ));
            }
            let snapshot: Arc<dyn RepoSnapshot> = Arc::new(MemorySnapshot::new("rev1"));
            Ok(snapshot)
        }
    }

    fn reconciler(provider: Arc<CountingProvider>) -> Arc<Reconciler> {
        let options = ReconcileOptions {
            timeout: Duration::from_secs(5),
            max_concurrent_sets: 1,
            max_attempts: 1,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        };
        Arc::new(Reconciler::new(
            provider,
            Arc::new(MemoryApplyEngine::new()),
            Vec::new(),
            options,
        ))
    }

    fn provider(fail: bool) -> Arc<CountingProvider> {
        Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    #[test]
    fn test_next_wait() {
        let options = ReconcileOptions {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            ..ReconcileOptions::default()
        };
        let interval = Duration::from_secs(180);
        assert_eq!(next_wait(&options, interval, 0), interval);
        assert_eq!(next_wait(&options, interval, 1), Duration::from_secs(2));
        assert_eq!(next_wait(&options, interval, 3), Duration::from_secs(8));
        assert_eq!(next_wait(&options, interval, 12), Duration::from_secs(300));
    }

    #[test]
    fn test_scheduler_runs_immediately_and_stops() {
        let provider = provider(false);
        let reconciler = reconciler(Arc::clone(&provider));
        let mut events = reconciler.subscribe();
        let mut scheduler = SyncScheduler::new(reconciler, Duration::from_secs(3600));

        let (_trigger_tx, trigger_rx) = broadcast::channel(16);
        let handle = scheduler.start(trigger_rx);

        std::thread::sleep(Duration::from_millis(200));
        scheduler.stop();
        handle.join().expect("scheduler thread panicked");

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        let mut completed = false;
        while let Ok(event) = events.try_recv() {
            completed |= matches!(event, ReconcileEvent::PassCompleted { .. });
        }
        assert!(completed);
    }

    #[test]
    fn test_manual_trigger_starts_pass() {
        let provider = provider(false);
        let mut scheduler =
            SyncScheduler::new(reconciler(Arc::clone(&provider)), Duration::from_secs(3600));

        let (trigger_tx, trigger_rx) = broadcast::channel(16);
        let handle = scheduler.start(trigger_rx);

        std::thread::sleep(Duration::from_millis(100));
        trigger_tx.send(()).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        scheduler.stop();
        handle.join().expect("scheduler thread panicked");

        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_change_event_starts_pass() {
        let provider = provider(false);
        let (change_tx, change_rx) = broadcast::channel(16);
        let mut scheduler =
            SyncScheduler::new(reconciler(Arc::clone(&provider)), Duration::from_secs(3600))
                .with_change_events(change_rx);

        let (_trigger_tx, trigger_rx) = broadcast::channel(16);
        let handle = scheduler.start(trigger_rx);

        std::thread::sleep(Duration::from_millis(100));
        change_tx
            .send(RepoChangeEvent {
                change_type: ChangeType::Modified,
                path: "clusters/c1/config.yaml".to_string(),
            })
            .unwrap();
        std::thread::sleep(Duration::from_millis(100));
        scheduler.stop();
        handle.join().expect("scheduler thread panicked");

        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_passes_back_off() {
        let provider = provider(true);
        let mut scheduler =
            SyncScheduler::new(reconciler(Arc::clone(&provider)), Duration::from_secs(3600));

        let (_trigger_tx, trigger_rx) = broadcast::channel(16);
        let handle = scheduler.start(trigger_rx);

        // Backoff of 10, 20, 40, 40ms keeps retrying well within the interval.
        std::thread::sleep(Duration::from_millis(300));
        scheduler.stop();
        handle.join().expect("scheduler thread panicked");

        assert!(provider.calls.load(Ordering::SeqCst) >= 3);
    }
}
