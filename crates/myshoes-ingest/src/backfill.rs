//! BackFiller: re-enqueues work the webhook path missed.
//!
//! Repositories that recently had runners are scanned for workflow runs
//! that have been waiting for at least half an hour. Each queued job of
//! such a run whose labels are admitted becomes a new [`Job`].

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use myshoes_core::{Job, Target, is_admitted, parse_repository_url};
use myshoes_github::{HostingService, WorkflowRun};
use myshoes_metrics::Metrics;
use myshoes_metrics::catalog::JOBS_ENQUEUED;
use myshoes_store::{Store, StoreResult};

use crate::error::{IngestError, IngestResult};
use crate::resolve::resolve_target;

pub const BACKFILL_INTERVAL: Duration = Duration::from_secs(60);
/// How far back the runner log is read to find active repositories.
pub const LOOKBACK: TimeDelta = TimeDelta::hours(1);
/// Runs younger than this are left to the webhook path.
pub const MIN_RUN_AGE: TimeDelta = TimeDelta::minutes(30);
pub const RUNS_PER_REPOSITORY: usize = 50;
/// How long an enqueued workflow job is remembered.
const DEDUP_WINDOW: TimeDelta = TimeDelta::minutes(30);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackfillReport {
    pub repositories: usize,
    pub enqueued: usize,
}

pub struct BackFiller {
    store: Store,
    hosting: Arc<dyn HostingService>,
    metrics: Metrics,
    interval: Duration,
    /// Workflow job id → when it was enqueued.
    recent: Mutex<HashMap<i64, DateTime<Utc>>>,
}

impl BackFiller {
    pub fn new(store: Store, hosting: Arc<dyn HostingService>, metrics: Metrics) -> Self {
        Self {
            store,
            hosting,
            metrics,
            interval: BACKFILL_INTERVAL,
            recent: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "back-filler started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.sweep(Utc::now()).await {
                        error!(error = %e, "back-fill sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("back-filler shutting down");
                    break;
                }
            }
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> StoreResult<BackfillReport> {
        self.forget_before(now - DEDUP_WINDOW);

        let repositories: BTreeSet<String> = self
            .store
            .list_runner_log_since(now - LOOKBACK)?
            .into_iter()
            .map(|runner| runner.repository_url)
            .collect();

        let results = join_all(
            repositories
                .iter()
                .map(|url| self.backfill_repository(url, now)),
        )
        .await;

        let mut report = BackfillReport {
            repositories: repositories.len(),
            enqueued: 0,
        };
        for (url, result) in repositories.iter().zip(results) {
            match result {
                Ok(n) => report.enqueued += n,
                Err(e) => warn!(repository = %url, error = %e, "back-fill failed"),
            }
        }
        if report.enqueued > 0 {
            info!(enqueued = report.enqueued, "back-filled pending jobs");
        }
        Ok(report)
    }

    async fn backfill_repository(&self, url: &str, now: DateTime<Utc>) -> IngestResult<usize> {
        let (host, full_name) = parse_repository_url(url)?;
        let Some(target) = resolve_target(&self.store, host.as_deref(), &full_name)? else {
            debug!(repository = %full_name, "no target, skipping back-fill");
            return Ok(0);
        };

        let runs = self
            .hosting
            .list_workflow_runs_newest(&target, &full_name, RUNS_PER_REPOSITORY)
            .await?;

        let mut enqueued = 0;
        for run in runs.iter().filter(|r| is_stale(r, now)) {
            enqueued += self
                .backfill_run(&target, host.as_deref(), &full_name, run, now)
                .await?;
        }
        Ok(enqueued)
    }

    async fn backfill_run(
        &self,
        target: &Target,
        host: Option<&str>,
        full_name: &str,
        run: &WorkflowRun,
        now: DateTime<Utc>,
    ) -> IngestResult<usize> {
        let jobs = self
            .hosting
            .list_workflow_run_jobs(target, full_name, run.id)
            .await?;

        let mut enqueued = 0;
        for wf_job in jobs.iter().filter(|j| j.is_queued() && is_admitted(&j.labels)) {
            if !self.remember(wf_job.id, now) {
                continue;
            }
            let mut payload = run.raw.clone();
            if let Some(map) = payload.as_object_mut() {
                map.insert("labels".to_string(), wf_job.labels.clone().into());
            }
            let job = Job::new(target.id, full_name, payload, host.map(str::to_string));
            if let Err(e) = self.store.enqueue_job(&job) {
                self.forget(wf_job.id);
                return Err(IngestError::Store(e));
            }
            self.metrics.inc(&JOBS_ENQUEUED, &[("source", "backfill")]);
            info!(
                job_id = %job.id,
                target_id = %target.id,
                run_id = run.id,
                workflow_job_id = wf_job.id,
                "back-filled job enqueued"
            );
            enqueued += 1;
        }
        Ok(enqueued)
    }

    /// Record a workflow job; false if it was already enqueued recently.
    fn remember(&self, workflow_job_id: i64, now: DateTime<Utc>) -> bool {
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        if recent.contains_key(&workflow_job_id) {
            return false;
        }
        recent.insert(workflow_job_id, now);
        true
    }

    fn forget(&self, workflow_job_id: i64) {
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&workflow_job_id);
    }

    fn forget_before(&self, cutoff: DateTime<Utc>) {
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|_, at| *at > cutoff);
    }
}

fn is_stale(run: &WorkflowRun, now: DateTime<Utc>) -> bool {
    run.is_pending() && now - run.created_at >= MIN_RUN_AGE
}
