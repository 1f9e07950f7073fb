//! Reconciler: snapshot → resolve → diff → apply.
//!
//! One pass walks `Idle → Resolving → Diffing → Applying → Idle`. Any
//! pass-level failure moves the reconciler to `Failed`; the scheduler owns
//! the backoff and the return to `Idle`.
//!
//! Resolving and Diffing have no side effects, so cancellation and the pass
//! deadline interrupt them immediately. During Applying an apply that has
//! started always completes; the deadline and cancellation are only checked
//! before the next one starts.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, Mutex, RwLock, Semaphore};
use tokio::time::Instant;

use super::apply::{ApplyEngine, ApplyError, ApplyOutcome};
use super::diff::{diff, DiffSummary};
use super::error::{ReconcileError, Result};
use super::events::{emit, ReconcileEvent};
use super::pipeline::{resolve_application_set, SetResolution};
use crate::config::{ApplicationSetResource, ReconcileSettings};
use crate::repo::{RepoSnapshot, SnapshotProvider};
use crate::report::{ErrorKind, ErrorScope, ScopedError};
use crate::synth::DeployableDescriptor;

/// Where the reconciler is in its pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReconcileState {
    Idle,
    Resolving,
    Diffing,
    Applying,
    Failed,
}

/// Tuning for a reconciler.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Upper bound for one pass.
    pub timeout: Duration,
    /// Application sets resolved at the same time.
    pub max_concurrent_sets: usize,
    /// Total attempts per apply or prune, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled on each further retry.
    pub base_delay: Duration,
    /// Cap for any single retry delay.
    pub max_delay: Duration,
}

impl ReconcileOptions {
    /// Delay before retry number `attempt` (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(20);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self::from(&ReconcileSettings::default())
    }
}

impl From<&ReconcileSettings> for ReconcileOptions {
    fn from(settings: &ReconcileSettings) -> Self {
        Self {
            timeout: Duration::from_secs(settings.timeout_secs),
            max_concurrent_sets: settings.max_concurrent_sets.max(1),
            max_attempts: settings.retry.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.retry.base_delay_millis),
            max_delay: Duration::from_secs(settings.retry.max_delay_secs),
        }
    }
}

/// Outcome of one application set within a pass.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetReport {
    pub name: String,
    /// Desired descriptor count.
    pub descriptors: usize,
    /// A configuration defect stopped the set before diffing.
    pub aborted: bool,
    pub diff: DiffSummary,
    pub applied: Vec<String>,
    /// Accepted by the engine but not yet rolled out.
    pub in_progress: Vec<String>,
    pub pruned: Vec<String>,
    /// Additions and changes held back because sync is not automated.
    pub pending_applies: Vec<String>,
    /// Removals held back because pruning is disabled.
    pub pending_removals: Vec<String>,
    pub errors: Vec<ScopedError>,
}

impl SetReport {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// No abort and no failure other than pruned conflicts.
    pub fn is_healthy(&self) -> bool {
        !self.aborted && !self.errors.iter().any(ScopedError::is_failure)
    }
}

/// Outcome of a completed pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub revision: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub state: ReconcileState,
    /// One entry per application set, ordered by name.
    pub sets: Vec<SetReport>,
}

impl PassReport {
    pub fn set(&self, name: &str) -> Option<&SetReport> {
        self.sets.iter().find(|s| s.name == name)
    }

    pub fn applied_count(&self) -> usize {
        self.sets.iter().map(|s| s.applied.len()).sum()
    }

    pub fn pruned_count(&self) -> usize {
        self.sets.iter().map(|s| s.pruned.len()).sum()
    }

    /// Failures across all sets; conflicts are not counted.
    pub fn failure_count(&self) -> usize {
        self.sets
            .iter()
            .flat_map(|s| s.errors.iter())
            .filter(|e| e.is_failure())
            .count()
    }
}

/// Cancels the pass currently in progress.
#[derive(Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

#[derive(Debug, Clone)]
enum Action {
    Apply(DeployableDescriptor),
    Prune(DeployableDescriptor),
}

impl Action {
    fn descriptor(&self) -> &DeployableDescriptor {
        match self {
            Action::Apply(d) | Action::Prune(d) => d,
        }
    }
}

/// What a lane did before it finished or was stopped.
struct LaneResult {
    outcomes: Vec<(usize, Action, std::result::Result<ApplyOutcome, ApplyError>)>,
    stopped: Option<ReconcileError>,
}

/// Drives passes over the configured application sets.
pub struct Reconciler {
    provider: Arc<dyn SnapshotProvider>,
    engine: Arc<dyn ApplyEngine>,
    sets: RwLock<Arc<Vec<ApplicationSetResource>>>,
    options: ReconcileOptions,
    state: watch::Sender<ReconcileState>,
    /// Prevents overlapping passes.
    reconcile_lock: Mutex<()>,
    events: broadcast::Sender<ReconcileEvent>,
    cancel: Arc<watch::Sender<bool>>,
}

impl Reconciler {
    pub fn new(
        provider: Arc<dyn SnapshotProvider>,
        engine: Arc<dyn ApplyEngine>,
        sets: Vec<ApplicationSetResource>,
        options: ReconcileOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(100);
        Self {
            provider,
            engine,
            sets: RwLock::new(Arc::new(sets)),
            options,
            state: watch::Sender::new(ReconcileState::Idle),
            reconcile_lock: Mutex::new(()),
            events,
            cancel: Arc::new(watch::Sender::new(false)),
        }
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    pub fn state(&self) -> ReconcileState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ReconcileState> {
        self.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReconcileEvent> {
        self.events.subscribe()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            sender: Arc::clone(&self.cancel),
        }
    }

    /// Replaces the application sets used from the next pass on.
    pub async fn set_application_sets(&self, sets: Vec<ApplicationSetResource>) {
        *self.sets.write().await = Arc::new(sets);
    }

    /// Returns to `Idle` after a failed pass has been backed off.
    pub fn recover(&self) {
        if self.state() == ReconcileState::Failed {
            self.set_state(ReconcileState::Idle);
        }
    }

    fn set_state(&self, state: ReconcileState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            log::debug!("Reconciler state {:?} -> {:?}", previous, state);
            emit(&self.events, ReconcileEvent::StateChanged { state });
        }
    }

    /// Runs one pass.
    ///
    /// Returns `AlreadyRunning` immediately if another pass holds the lock.
    pub async fn reconcile(&self) -> Result<PassReport> {
        let _guard = match self.reconcile_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                log::info!("Reconcile skipped: another pass is already in progress");
                return Err(ReconcileError::AlreadyRunning);
            }
        };

        self.cancel.send_replace(false);
        let started_at = Utc::now();
        let deadline = Instant::now() + self.options.timeout;

        match self.run_pass(started_at, deadline).await {
            Ok(report) => {
                self.set_state(ReconcileState::Idle);
                log::info!(
                    "Pass at {} finished: {} applied, {} pruned, {} failures",
                    report.revision,
                    report.applied_count(),
                    report.pruned_count(),
                    report.failure_count()
                );
                emit(
                    &self.events,
                    ReconcileEvent::PassCompleted {
                        revision: report.revision.clone(),
                        applied: report.applied_count(),
                        pruned: report.pruned_count(),
                        errors: report.failure_count(),
                    },
                );
                Ok(report)
            }
            Err(e) => {
                self.set_state(ReconcileState::Failed);
                match e.partial_report() {
                    Some(partial) => log::error!(
                        "Pass at {} failed after {} applied, {} pruned, {} failures: {}",
                        partial.revision,
                        partial.applied_count(),
                        partial.pruned_count(),
                        partial.failure_count(),
                        e
                    ),
                    None => log::error!("Pass failed: {}", e),
                }
                emit(
                    &self.events,
                    ReconcileEvent::PassFailed {
                        error: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    async fn run_pass(&self, started_at: DateTime<Utc>, deadline: Instant) -> Result<PassReport> {
        self.set_state(ReconcileState::Resolving);

        let provider = Arc::clone(&self.provider);
        let snapshot = self
            .race(deadline, async move {
                tokio::task::spawn_blocking(move || provider.snapshot())
                    .await
                    .map_err(|e| ReconcileError::TaskFailed(e.to_string()))?
                    .map_err(ReconcileError::from)
            })
            .await?;
        let revision = snapshot.revision().to_string();
        log::info!("Reconciling revision {}", revision);

        let sets = Arc::clone(&*self.sets.read().await);
        let resolutions = self
            .race(deadline, self.resolve_all(&sets, Arc::clone(&snapshot)))
            .await?;

        self.set_state(ReconcileState::Diffing);
        let (mut reports, actions) = self
            .race(deadline, async { Ok(self.plan(&sets, resolutions).await) })
            .await?;

        self.set_state(ReconcileState::Applying);
        let stopped = self.apply_all(actions, &mut reports, deadline).await;

        for report in &mut reports {
            report.applied.sort();
            report.in_progress.sort();
            report.pruned.sort();
        }

        let report = PassReport {
            revision,
            started_at,
            finished_at: Utc::now(),
            state: if stopped.is_some() {
                ReconcileState::Failed
            } else {
                ReconcileState::Idle
            },
            sets: reports,
        };

        match stopped {
            Some(e) => Err(e.with_report(report)),
            None => Ok(report),
        }
    }

    fn timeout(&self) -> ReconcileError {
        ReconcileError::Timeout {
            timeout: self.options.timeout,
            report: None,
        }
    }

    /// Runs `fut` unless the pass is cancelled or its deadline passes first.
    async fn race<T>(&self, deadline: Instant, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            result = fut => result,
            _ = cancelled(self.cancel.subscribe()) => Err(ReconcileError::Cancelled { report: None }),
            _ = tokio::time::sleep_until(deadline) => Err(self.timeout()),
        }
    }

    async fn resolve_all(
        &self,
        sets: &[ApplicationSetResource],
        snapshot: Arc<dyn RepoSnapshot>,
    ) -> Result<Vec<SetResolution>> {
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_sets));

        let tasks = sets.iter().cloned().map(|set| {
            let snapshot = Arc::clone(&snapshot);
            let semaphore = Arc::clone(&semaphore);
            async move {
                let name = set.metadata.name.clone();
                let _permit = semaphore.acquire_owned().await.ok();
                tokio::task::spawn_blocking(move || resolve_application_set(&set, &*snapshot))
                    .await
                    .map_err(|e| ReconcileError::ResolverPanicked {
                        set: name,
                        message: e.to_string(),
                    })
            }
        });

        join_all(tasks).await.into_iter().collect()
    }

    /// Diffs every resolved set against the engine and decides what to do.
    async fn plan(
        &self,
        sets: &[ApplicationSetResource],
        resolutions: Vec<SetResolution>,
    ) -> (Vec<SetReport>, Vec<(usize, Action)>) {
        let mut reports = Vec::with_capacity(resolutions.len());
        let mut actions = Vec::new();

        for (index, (set, resolution)) in sets.iter().zip(resolutions).enumerate() {
            let mut report = SetReport::new(&resolution.name);
            report.errors = resolution.errors;

            let Some(desired) = resolution.descriptors else {
                report.aborted = true;
                reports.push(report);
                continue;
            };
            report.descriptors = desired.len();

            let current = match self.engine.current(&resolution.name).await {
                Ok(current) => current,
                Err(e) => {
                    log::warn!("Cannot read current state of {}: {}", resolution.name, e);
                    report.errors.push(ScopedError::new(
                        ErrorKind::Apply,
                        ErrorScope::ApplicationSet(resolution.name.clone()),
                        e.to_string(),
                    ));
                    reports.push(report);
                    continue;
                }
            };

            let delta = diff(&desired, &current);
            report.diff = delta.summary();
            let policy = set.spec.sync_policy;

            let upserts = delta.added.into_iter().chain(delta.changed);
            if policy.automated {
                actions.extend(upserts.map(|d| (index, Action::Apply(d))));
            } else {
                report.pending_applies = upserts.map(|d| d.name).collect();
                report.pending_applies.sort();
            }

            if policy.prune {
                actions.extend(delta.removed.into_iter().map(|d| (index, Action::Prune(d))));
            } else {
                report.pending_removals = delta.removed.into_iter().map(|d| d.name).collect();
            }

            reports.push(report);
        }

        (reports, actions)
    }

    /// Runs actions serialized per destination and concurrently across
    /// destinations.
    ///
    /// Every finished outcome is recorded in `reports`, including when a lane
    /// was stopped; the stop reason is returned.
    async fn apply_all(
        &self,
        actions: Vec<(usize, Action)>,
        reports: &mut [SetReport],
        deadline: Instant,
    ) -> Option<ReconcileError> {
        let mut lanes: BTreeMap<String, Vec<(usize, Action)>> = BTreeMap::new();
        for (index, action) in actions {
            let key = action.descriptor().destination.key().to_string();
            lanes.entry(key).or_default().push((index, action));
        }

        let results = join_all(
            lanes
                .into_iter()
                .map(|(key, lane)| self.run_lane(key, lane, deadline)),
        )
        .await;

        let mut stopped = None;
        for result in results {
            for (index, action, outcome) in result.outcomes {
                record_outcome(&mut reports[index], action, outcome);
            }
            if stopped.is_none() {
                stopped = result.stopped;
            }
        }

        stopped
    }

    async fn run_lane(&self, key: String, lane: Vec<(usize, Action)>, deadline: Instant) -> LaneResult {
        let cancel_rx = self.cancel.subscribe();
        let mut result = LaneResult {
            outcomes: Vec::with_capacity(lane.len()),
            stopped: None,
        };

        for (index, action) in lane {
            let cancelled = *cancel_rx.borrow();
            if cancelled {
                result.stopped = Some(ReconcileError::Cancelled { report: None });
                break;
            }
            if Instant::now() >= deadline {
                result.stopped = Some(self.timeout());
                break;
            }

            let name = action.descriptor().name.clone();
            log::debug!("Destination {}: {} {}", key, kind_of(&action), name);
            let outcome = match &action {
                Action::Apply(d) => self.with_retry(&name, || self.engine.apply(d)).await,
                Action::Prune(d) => self
                    .with_retry(&name, || self.engine.prune(d))
                    .await
                    .map(|()| ApplyOutcome::Applied),
            };
            result.outcomes.push((index, action, outcome));
        }

        result
    }

    async fn with_retry<T, F, Fut>(&self, name: &str, mut op: F) -> std::result::Result<T, ApplyError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ApplyError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.options.max_attempts => {
                    let delay = self.options.retry_delay(attempt);
                    log::warn!(
                        "Attempt {}/{} for {} failed, retrying in {:?}: {}",
                        attempt,
                        self.options.max_attempts,
                        name,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Completes once the cancel flag is set.
async fn cancelled(mut rx: watch::Receiver<bool>) {
    loop {
        let flag = *rx.borrow_and_update();
        if flag {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn kind_of(action: &Action) -> &'static str {
    match action {
        Action::Apply(_) => "apply",
        Action::Prune(_) => "prune",
    }
}

fn record_outcome(
    report: &mut SetReport,
    action: Action,
    outcome: std::result::Result<ApplyOutcome, ApplyError>,
) {
    match (action, outcome) {
        (Action::Apply(d), Ok(ApplyOutcome::Applied)) => report.applied.push(d.name),
        (Action::Apply(d), Ok(ApplyOutcome::InProgress)) => report.in_progress.push(d.name),
        (Action::Prune(d), Ok(_)) => report.pruned.push(d.name),
        (action, Err(e)) => {
            let name = action.descriptor().name.clone();
            log::error!("{} of {} failed: {}", kind_of(&action), name, e);
            report.errors.push(ScopedError::new(
                ErrorKind::Apply,
                ErrorScope::Descriptor(name),
                e.to_string(),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApplicationSetSpec, Resource, ResourceKind};
    use crate::generator::{GeneratorSpec, ListGenerator};
    use crate::params::ParameterSet;
    use crate::reconcile::apply::{ApplyAction, MemoryApplyEngine};
    use crate::repo::{self, MemorySnapshot};
    use crate::synth::{DescriptorTemplate, SyncPolicy};

    struct FixedProvider(Arc<MemorySnapshot>);

    impl SnapshotProvider for FixedProvider {
        fn snapshot(&self) -> repo::Result<Arc<dyn RepoSnapshot>> {
            let snapshot: Arc<dyn RepoSnapshot> = self.0.clone();
            Ok(snapshot)
        }
    }

    fn tuple(cluster: &str, app: &str, server: &str) -> ParameterSet {
        ParameterSet::new()
            .with("cluster_name", cluster)
            .with("appname", app)
            .with("cluster_server", server)
    }

    fn list_set(name: &str, tuples: Vec<ParameterSet>, policy: SyncPolicy) -> ApplicationSetResource {
        Resource::new(
            ResourceKind::ApplicationSet,
            name,
            ApplicationSetSpec {
                generators: vec![GeneratorSpec::List(ListGenerator::from_sets(tuples))],
                template: DescriptorTemplate::new("apps/{{.appname}}"),
                sync_policy: policy,
            },
        )
    }

    fn automated() -> SyncPolicy {
        SyncPolicy {
            automated: true,
            prune: true,
        }
    }

    fn options() -> ReconcileOptions {
        ReconcileOptions {
            timeout: Duration::from_secs(10),
            max_concurrent_sets: 2,
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
        }
    }

    fn reconciler(
        engine: Arc<MemoryApplyEngine>,
        sets: Vec<ApplicationSetResource>,
        options: ReconcileOptions,
    ) -> Reconciler {
        let provider = Arc::new(FixedProvider(Arc::new(MemorySnapshot::new("rev1"))));
        Reconciler::new(provider, engine, sets, options)
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let options = ReconcileOptions {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(5),
            ..options()
        };
        assert_eq!(options.retry_delay(1), Duration::from_secs(2));
        assert_eq!(options.retry_delay(2), Duration::from_secs(4));
        assert_eq!(options.retry_delay(3), Duration::from_secs(5));
        assert_eq!(options.retry_delay(40), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_pass_applies_then_is_idempotent() {
        let engine = Arc::new(MemoryApplyEngine::new());
        let set = list_set(
            "base",
            vec![
                tuple("c1", "ingress", "https://c1"),
                tuple("c2", "ingress", "https://c2"),
            ],
            automated(),
        );
        let reconciler = reconciler(engine.clone(), vec![set], options());

        let report = reconciler.reconcile().await.unwrap();
        assert_eq!(report.revision, "rev1");
        assert_eq!(report.state, ReconcileState::Idle);
        let base = report.set("base").unwrap();
        assert_eq!(base.applied, vec!["c1-ingress", "c2-ingress"]);
        assert!(base.is_healthy());
        assert_eq!(reconciler.state(), ReconcileState::Idle);

        engine.clear_actions();
        let second = reconciler.reconcile().await.unwrap();
        let base = second.set("base").unwrap();
        assert!(base.applied.is_empty());
        assert_eq!(base.diff.unchanged, 2);
        assert!(engine.actions().is_empty());
    }

    #[tokio::test]
    async fn test_manual_sync_reports_pending() {
        let engine = Arc::new(MemoryApplyEngine::new());
        let set = list_set(
            "base",
            vec![tuple("c1", "ingress", "https://c1")],
            SyncPolicy::default(),
        );
        let reconciler = reconciler(engine.clone(), vec![set], options());

        let report = reconciler.reconcile().await.unwrap();
        let base = report.set("base").unwrap();
        assert_eq!(base.pending_applies, vec!["c1-ingress"]);
        assert!(base.applied.is_empty());
        assert!(engine.actions().is_empty());
    }

    #[tokio::test]
    async fn test_prune_and_pending_removal() {
        let engine = Arc::new(MemoryApplyEngine::new());
        let keep = list_set(
            "keep",
            vec![tuple("c1", "ingress", "https://c1")],
            SyncPolicy {
                automated: true,
                prune: false,
            },
        );
        let dropped = list_set(
            "dropped",
            vec![tuple("c1", "logging", "https://c1")],
            automated(),
        );
        let reconciler = reconciler(engine.clone(), vec![dropped, keep], options());
        reconciler.reconcile().await.unwrap();

        reconciler
            .set_application_sets(vec![
                list_set("dropped", vec![], automated()),
                list_set(
                    "keep",
                    vec![],
                    SyncPolicy {
                        automated: true,
                        prune: false,
                    },
                ),
            ])
            .await;
        engine.clear_actions();

        let report = reconciler.reconcile().await.unwrap();
        assert_eq!(report.set("dropped").unwrap().pruned, vec!["c1-logging"]);
        assert_eq!(
            report.set("keep").unwrap().pending_removals,
            vec!["c1-ingress"]
        );
        assert_eq!(
            engine.actions(),
            vec![ApplyAction::Prune("c1-logging".to_string())]
        );
        assert_eq!(engine.applied_names("keep"), vec!["c1-ingress"]);
    }

    #[tokio::test]
    async fn test_apply_failures_are_scoped() {
        let engine = Arc::new(MemoryApplyEngine::new());
        engine.fail_transiently("c1-ingress", 2);
        engine.reject("c1-logging");
        let set = list_set(
            "base",
            vec![
                tuple("c1", "ingress", "https://c1"),
                tuple("c1", "logging", "https://c1"),
                tuple("c1", "metrics", "https://c1"),
            ],
            automated(),
        );
        let reconciler = reconciler(engine.clone(), vec![set], options());

        let report = reconciler.reconcile().await.unwrap();
        let base = report.set("base").unwrap();
        assert_eq!(base.applied, vec!["c1-ingress", "c1-metrics"]);
        assert_eq!(base.errors.len(), 1);
        assert_eq!(base.errors[0].kind, ErrorKind::Apply);
        assert_eq!(
            base.errors[0].scope,
            ErrorScope::Descriptor("c1-logging".to_string())
        );
        assert!(!base.is_healthy());
    }

    #[tokio::test]
    async fn test_applies_serialize_per_destination() {
        let engine = Arc::new(MemoryApplyEngine::new().with_delay(Duration::from_millis(20)));
        let set = list_set(
            "base",
            vec![
                tuple("c1", "ingress", "https://c1"),
                tuple("c1", "logging", "https://c1"),
                tuple("c2", "ingress", "https://c2"),
                tuple("c2", "logging", "https://c2"),
            ],
            automated(),
        );
        let reconciler = reconciler(engine.clone(), vec![set], options());

        reconciler.reconcile().await.unwrap();
        assert_eq!(engine.max_in_flight("https://c1"), 1);
        assert_eq!(engine.max_in_flight("https://c2"), 1);
        assert_eq!(engine.max_total_in_flight(), 2);
    }

    #[tokio::test]
    async fn test_aborted_set_does_not_block_others() {
        let engine = Arc::new(MemoryApplyEngine::new());
        let broken = list_set(
            "broken",
            vec![ParameterSet::new().with("appname", "ingress")],
            automated(),
        );
        let good = list_set("good", vec![tuple("c1", "ingress", "https://c1")], automated());
        let reconciler = reconciler(engine.clone(), vec![broken, good], options());

        let report = reconciler.reconcile().await.unwrap();
        assert!(report.set("broken").unwrap().aborted);
        assert_eq!(report.set("good").unwrap().applied, vec!["c1-ingress"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_reconcile_is_rejected() {
        let engine = Arc::new(MemoryApplyEngine::new().with_delay(Duration::from_millis(200)));
        let set = list_set("base", vec![tuple("c1", "ingress", "https://c1")], automated());
        let reconciler = Arc::new(reconciler(engine, vec![set], options()));

        let first = {
            let reconciler = Arc::clone(&reconciler);
            tokio::spawn(async move { reconciler.reconcile().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = reconciler.reconcile().await;
        assert!(matches!(second, Err(ReconcileError::AlreadyRunning)));
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_timeout_stops_before_next_apply() {
        let engine = Arc::new(MemoryApplyEngine::new().with_delay(Duration::from_millis(150)));
        let set = list_set(
            "base",
            vec![
                tuple("c1", "ingress", "https://c1"),
                tuple("c1", "logging", "https://c1"),
            ],
            automated(),
        );
        let options = ReconcileOptions {
            timeout: Duration::from_millis(100),
            ..options()
        };
        let reconciler = reconciler(engine.clone(), vec![set], options);
        let mut events = reconciler.subscribe();

        let result = reconciler.reconcile().await;
        assert!(matches!(result, Err(ReconcileError::Timeout { .. })));
        assert_eq!(reconciler.state(), ReconcileState::Failed);
        // The in-flight apply completed, the second never started.
        assert_eq!(
            engine.actions(),
            vec![ApplyAction::Apply("c1-ingress".to_string())]
        );

        let mut failed = false;
        while let Ok(event) = events.try_recv() {
            failed |= matches!(event, ReconcileEvent::PassFailed { .. });
        }
        assert!(failed);

        reconciler.recover();
        assert_eq!(reconciler.state(), ReconcileState::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_during_apply() {
        let engine = Arc::new(MemoryApplyEngine::new().with_delay(Duration::from_millis(100)));
        let set = list_set(
            "base",
            vec![
                tuple("c1", "ingress", "https://c1"),
                tuple("c1", "logging", "https://c1"),
            ],
            automated(),
        );
        let reconciler = Arc::new(reconciler(engine.clone(), vec![set], options()));
        let cancel = reconciler.cancel_handle();

        let pass = {
            let reconciler = Arc::clone(&reconciler);
            tokio::spawn(async move { reconciler.reconcile().await })
        };
        tokio::time::sleep(Duration::from_millis(40)).await;
        cancel.cancel();

        let result = pass.await.unwrap();
        assert!(matches!(result, Err(ReconcileError::Cancelled { .. })));
        assert_eq!(engine.actions().len(), 1);

        let partial = result.unwrap_err().partial_report().cloned().unwrap();
        assert_eq!(partial.state, ReconcileState::Failed);
        assert_eq!(partial.applied_count(), 1);
    }

    #[tokio::test]
    async fn test_timeout_keeps_outcomes_of_every_lane() {
        let engine = Arc::new(MemoryApplyEngine::new().with_delay(Duration::from_millis(150)));
        engine.reject("c2-ingress");
        let set = list_set(
            "base",
            vec![
                tuple("c1", "ingress", "https://c1"),
                tuple("c1", "logging", "https://c1"),
                tuple("c2", "ingress", "https://c2"),
            ],
            automated(),
        );
        let options = ReconcileOptions {
            timeout: Duration::from_millis(100),
            ..options()
        };
        let reconciler = reconciler(engine.clone(), vec![set], options);

        let err = reconciler.reconcile().await.unwrap_err();
        assert!(matches!(err, ReconcileError::Timeout { .. }));

        let partial = err.partial_report().unwrap();
        assert_eq!(partial.state, ReconcileState::Failed);
        let base = partial.set("base").unwrap();
        assert_eq!(base.applied, vec!["c1-ingress"]);
        assert_eq!(base.errors.len(), 1);
        assert_eq!(base.errors[0].kind, ErrorKind::Apply);
        assert_eq!(
            base.errors[0].scope,
            ErrorScope::Descriptor("c2-ingress".to_string())
        );
    }

    #[tokio::test]
    async fn test_timeout_before_applying_has_no_report() {
        let err = ReconcileError::Timeout {
            timeout: Duration::from_secs(1),
            report: None,
        };
        assert!(err.partial_report().is_none());
        assert!(ReconcileError::AlreadyRunning.partial_report().is_none());
    }
}
