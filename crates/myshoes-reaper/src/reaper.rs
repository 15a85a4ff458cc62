//! Reaper: reclaims runners that finished, idled too long or lost their
//! target.
//!
//! A sweep runs under the `reaper` advisory lock. Each active target is
//! visited concurrently: its live runners are matched by name against the
//! hosting service's list and classified. Deletions are handed to
//! background tasks so a slow provisioner never stalls the sweep; a
//! deletion that keeps failing is left for the next sweep.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{Semaphore, watch};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use myshoes_core::{DeleteReason, Runner, RunnerId, Target, TargetId, TargetStatus, extract_labels};
use myshoes_github::{HostingService, RunnerInfo};
use myshoes_metrics::Metrics;
use myshoes_metrics::catalog::{DELETE_INSTANCE, REAPER_DELETED};
use myshoes_provisioner::ProviderSet;
use myshoes_starter::backoff_delay;
use myshoes_starter::script::runner_labels;
use myshoes_store::{Store, StoreError};

use crate::classify::{Limits, Verdict, classify, runner_mode};
use crate::error::{ReaperError, ReaperResult};

pub const LOCK_NAME: &str = "reaper";

/// Status description of a target with no runners anywhere.
pub const NO_RUNNER_DESCRIPTION: &str = "runner for queueing is not found";

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub tick_interval: Duration,
    pub lock_timeout: Duration,
    pub must_running_time: Duration,
    pub must_goal_time: Duration,
    /// Width of the DeleteInstance semaphore.
    pub max_concurrency_deleting: usize,
    /// Delete attempts per runner within one sweep.
    pub delete_attempts: u32,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            lock_timeout: Duration::from_secs(10),
            must_running_time: Duration::from_secs(5 * 60),
            must_goal_time: Duration::from_secs(6 * 60 * 60),
            max_concurrency_deleting: 1,
            delete_attempts: 3,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub targets: usize,
    /// Targets whose pass failed; their runners are untouched.
    pub failed_targets: usize,
    /// Deletions handed to background tasks.
    pub scheduled: usize,
}

/// A runner selected for deletion.
struct Doomed {
    runner: Runner,
    /// `None` when the target row no longer exists.
    target: Option<Target>,
    hosting_id: Option<i64>,
    reason: DeleteReason,
}

/// Steps of a deletion already done, kept across retries.
#[derive(Default)]
struct Progress {
    hosting_removed: bool,
    instance_deleted: bool,
}

struct Shared {
    store: Store,
    hosting: Arc<dyn HostingService>,
    providers: Arc<ProviderSet>,
    metrics: Metrics,
    config: ReaperConfig,
    limits: Limits,
    delete_permits: Semaphore,
    inflight: Mutex<HashSet<RunnerId>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct Reaper {
    shared: Arc<Shared>,
}

impl Reaper {
    pub fn new(
        store: Store,
        hosting: Arc<dyn HostingService>,
        providers: Arc<ProviderSet>,
        metrics: Metrics,
        config: ReaperConfig,
    ) -> Self {
        let limits = Limits::new(config.must_running_time, config.must_goal_time);
        let delete_permits = Semaphore::new(config.max_concurrency_deleting.max(1));
        Self {
            shared: Arc::new(Shared {
                store,
                hosting,
                providers,
                metrics,
                config,
                limits,
                delete_permits,
                inflight: Mutex::new(HashSet::new()),
                tracker: TaskTracker::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>, drain: Duration) {
        let interval = self.shared.config.tick_interval;
        info!(
            interval_secs = interval.as_secs(),
            max_concurrency_deleting = self.shared.config.max_concurrency_deleting,
            "reaper started"
        );
        loop {
            tokio::select! {
                _ = sleep(interval) => {
                    if let Err(e) = self.sweep(Utc::now()).await {
                        error!(error = %e, "reaper sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("reaper shutting down");
                    break;
                }
            }
        }
        self.shutdown(drain).await;
    }

    /// One pass over every target. Returns once deletions are scheduled.
    pub async fn sweep(&self, now: DateTime<Utc>) -> ReaperResult<SweepReport> {
        let store = &self.shared.store;
        let lock = match store
            .acquire_advisory_lock(LOCK_NAME, self.shared.config.lock_timeout)
            .await
        {
            Ok(lock) => lock,
            Err(StoreError::LockTimeout(_)) => {
                debug!("reaper lock busy, skipping sweep");
                return Ok(SweepReport::default());
            }
            Err(e) => return Err(e.into()),
        };

        let result = self.sweep_locked(now).await;
        if let Err(e) = store.release_advisory_lock(&lock) {
            warn!(error = %e, "failed to release reaper lock");
        }
        result
    }

    async fn sweep_locked(&self, now: DateTime<Utc>) -> ReaperResult<SweepReport> {
        let targets = self.shared.store.list_targets(true)?;
        let mut report = SweepReport {
            targets: targets.len(),
            ..SweepReport::default()
        };

        let passes = join_all(targets.iter().map(|t| self.reap_target(t, now))).await;
        for (target, pass) in targets.iter().zip(passes) {
            match pass {
                Ok(scheduled) => report.scheduled += scheduled,
                Err(e) => {
                    report.failed_targets += 1;
                    warn!(target_id = %target.id, scope = %target.scope, error = %e, "reaper pass failed");
                }
            }
        }

        report.scheduled += self.reap_orphans(&targets)?;
        if report.scheduled > 0 {
            debug!(
                targets = report.targets,
                scheduled = report.scheduled,
                "reaper sweep scheduled deletions"
            );
        }
        Ok(report)
    }

    /// Classify the live runners of one target and schedule deletions.
    /// Returns how many were scheduled.
    pub async fn reap_target(&self, target: &Target, now: DateTime<Utc>) -> ReaperResult<usize> {
        let store = &self.shared.store;
        let live = store.list_runners_by_target(&target.id)?;
        let listed = self.shared.hosting.list_runners(target).await?;

        if live.is_empty() && listed.is_empty() {
            if target.status != TargetStatus::Err || target.status_description != NO_RUNNER_DESCRIPTION {
                warn!(target_id = %target.id, scope = %target.scope, "no runner found for target");
                store.update_target_status(&target.id, TargetStatus::Err, NO_RUNNER_DESCRIPTION)?;
            }
            return Ok(0);
        }
        // `err` stays until an admin resets it.
        if !live.is_empty() && target.status == TargetStatus::Active {
            store.update_target_status(&target.id, TargetStatus::Running, "")?;
        }

        let by_name: HashMap<&str, &RunnerInfo> =
            listed.iter().map(|r| (r.name.as_str(), r)).collect();
        let mut scheduled = 0;
        for runner in live {
            let name = runner.name();
            let entry = by_name.get(name.as_str()).copied();
            if let Verdict::Delete { reason, hosting_id } =
                classify(&runner, entry, now, &self.shared.limits)
            {
                debug!(
                    runner = %name,
                    mode = ?runner_mode(&runner),
                    listed = entry.is_some(),
                    %reason,
                    "runner selected for deletion"
                );
                let doomed = Doomed {
                    runner,
                    target: Some(target.clone()),
                    hosting_id,
                    reason,
                };
                if self.schedule(doomed) {
                    scheduled += 1;
                }
            }
        }
        Ok(scheduled)
    }

    /// Live runners whose target is missing or deleted.
    fn reap_orphans(&self, active: &[Target]) -> ReaperResult<usize> {
        let active_ids: HashSet<TargetId> = active.iter().map(|t| t.id).collect();
        let mut scheduled = 0;
        for runner in self.shared.store.list_runners()? {
            if active_ids.contains(&runner.target_id) {
                continue;
            }
            let target = match self.shared.store.get_target(&runner.target_id) {
                Ok(target) if !target.is_deleted() => continue,
                Ok(target) => Some(target),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e.into()),
            };
            let doomed = Doomed {
                runner,
                target,
                hosting_id: None,
                reason: DeleteReason::Gone,
            };
            if self.schedule(doomed) {
                scheduled += 1;
            }
        }
        Ok(scheduled)
    }

    /// Spawn a deletion unless one is already running for the runner.
    fn schedule(&self, doomed: Doomed) -> bool {
        let runner_id = doomed.runner.id;
        if !self
            .shared
            .inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(runner_id)
        {
            return false;
        }
        let shared = self.shared.clone();
        self.shared.tracker.spawn(async move {
            tokio::select! {
                _ = shared.delete(&doomed) => {}
                _ = shared.cancel.cancelled() => {
                    debug!(runner_id = %doomed.runner.id, "deletion cancelled");
                }
            }
            shared
                .inflight
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&runner_id);
        });
        true
    }

    /// Wait until every scheduled deletion has finished.
    pub async fn wait_idle(&self) {
        self.shared.tracker.close();
        self.shared.tracker.wait().await;
        self.shared.tracker.reopen();
    }

    pub async fn shutdown(&self, drain: Duration) {
        self.shared.cancel.cancel();
        self.shared.tracker.close();
        if timeout(drain, self.shared.tracker.wait()).await.is_err() {
            warn!(
                remaining = self.shared.tracker.len(),
                "deletions did not drain, abandoning"
            );
        }
    }
}

impl Shared {
    async fn delete(&self, doomed: &Doomed) {
        let name = doomed.runner.name();
        let attempts = self.config.delete_attempts.max(1);
        let mut progress = Progress::default();
        for attempt in 1..=attempts {
            match self.try_delete(doomed, &mut progress).await {
                Ok(()) => {
                    info!(
                        runner = %name,
                        cloud_id = %doomed.runner.cloud_id,
                        reason = %doomed.reason,
                        "runner reaped"
                    );
                    return;
                }
                Err(e) if attempt == attempts => {
                    warn!(runner = %name, attempt, error = %e, "runner not reaped, retrying next sweep");
                    return;
                }
                Err(e) => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        runner = %name,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "failed to reap runner"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Hosting entry, then instance, then tombstone. Not-found answers
    /// count as done.
    async fn try_delete(&self, doomed: &Doomed, progress: &mut Progress) -> ReaperResult<()> {
        let runner = &doomed.runner;

        if !progress.hosting_removed {
            if let (Some(target), Some(hosting_id)) = (&doomed.target, doomed.hosting_id) {
                match self.hosting.remove_runner(target, hosting_id).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {
                        debug!(runner = %runner.name(), "runner already gone from hosting service");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            progress.hosting_removed = true;
        }

        if !progress.instance_deleted {
            let provider_url = doomed.target.as_ref().and_then(|t| t.provider_url.as_deref());
            let provisioner = self.providers.for_target(provider_url).await?;
            let labels = runner_labels(&extract_labels(&runner.request_webhook));
            let result = {
                let _permit = self
                    .delete_permits
                    .acquire()
                    .await
                    .map_err(|_| ReaperError::Cancelled)?;
                provisioner.delete_instance(&runner.cloud_id, &labels).await
            };
            match result {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(cloud_id = %runner.cloud_id, "instance already gone");
                }
                Err(e) => {
                    self.metrics.inc(&DELETE_INSTANCE, &[("result", "error")]);
                    return Err(e.into());
                }
            }
            self.metrics.inc(&DELETE_INSTANCE, &[("result", "ok")]);
            progress.instance_deleted = true;
        }

        self.store.delete_runner(&runner.id, Utc::now(), doomed.reason)?;
        self.metrics
            .inc(&REAPER_DELETED, &[("reason", doomed.reason.as_str())]);
        Ok(())
    }
}
