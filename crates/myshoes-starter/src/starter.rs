//! Starter: turns queued jobs into running instances.
//!
//! Each tick takes the `starter` advisory lock, lists jobs and spawns one
//! worker per job not already in flight. Workers run outside the lock,
//! bounded by a semaphore of `max_running` permits. A worker provisions,
//! records the runner, then deletes the job; failures back off and retry
//! up to [`MAX_ATTEMPTS`] times, after which the job waits for a later tick.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Semaphore, watch};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use myshoes_core::{
    Job, JobId, Runner, RunnerDefaults, RunnerMode, Target, extract_labels, repository_url,
    resource_type_from_labels, runner_name,
};
use myshoes_github::HostingService;
use myshoes_metrics::Metrics;
use myshoes_metrics::catalog::{ADD_INSTANCE, RETRY, STARTER_RUNNING, STARTER_WAITING};
use myshoes_provisioner::{Instance, InstanceSpec, ProviderSet, Provisioner};
use myshoes_store::{Store, StoreError};

use crate::backoff::{MAX_ATTEMPTS, backoff_delay};
use crate::error::{StarterError, StarterResult};
use crate::safety::{Safety, Unlimited};
use crate::script::{ScriptParams, build_setup_script, runner_labels};

/// Advisory lock serializing ticks across controller replicas.
pub const LOCK_NAME: &str = "starter";

#[derive(Debug, Clone)]
pub struct StarterConfig {
    /// Upper bound on concurrently provisioning workers.
    pub max_running: usize,
    /// Require the runner to show up in the hosting service before the
    /// job counts as started.
    pub strict: bool,
    pub runner_defaults: RunnerDefaults,
    pub tick_interval: Duration,
    pub lock_timeout: Duration,
    /// Budget for one worker, retries included.
    pub provision_deadline: Duration,
    pub registration_poll: Duration,
    pub registration_timeout: Duration,
}

impl Default for StarterConfig {
    fn default() -> Self {
        Self {
            max_running: 50,
            strict: true,
            runner_defaults: RunnerDefaults::default(),
            tick_interval: Duration::from_secs(10),
            lock_timeout: Duration::from_secs(10),
            provision_deadline: Duration::from_secs(10 * 60),
            registration_poll: Duration::from_secs(5),
            registration_timeout: Duration::from_secs(3 * 60),
        }
    }
}

/// What happened to a job in one worker run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Started(Uuid),
    /// The safety gate said not yet; the job stays queued.
    Deferred,
    /// The job's target is gone; the job was deleted.
    Dropped,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub jobs: usize,
    pub spawned: usize,
}

struct Shared {
    store: Store,
    hosting: Arc<dyn HostingService>,
    providers: Arc<ProviderSet>,
    metrics: Metrics,
    safety: Arc<dyn Safety>,
    config: StarterConfig,
    permits: Arc<Semaphore>,
    inflight: Mutex<HashSet<JobId>>,
    running: AtomicUsize,
    waiting: AtomicUsize,
    retry_attempts: Mutex<HashMap<JobId, u32>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct Starter {
    shared: Arc<Shared>,
}

impl Starter {
    pub fn new(
        store: Store,
        hosting: Arc<dyn HostingService>,
        providers: Arc<ProviderSet>,
        metrics: Metrics,
        config: StarterConfig,
    ) -> Self {
        Self::with_safety(store, hosting, providers, metrics, config, Arc::new(Unlimited))
    }

    pub fn with_safety(
        store: Store,
        hosting: Arc<dyn HostingService>,
        providers: Arc<ProviderSet>,
        metrics: Metrics,
        config: StarterConfig,
        safety: Arc<dyn Safety>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_running.max(1)));
        Self {
            shared: Arc::new(Shared {
                store,
                hosting,
                providers,
                metrics,
                safety,
                config,
                permits,
                inflight: Mutex::new(HashSet::new()),
                running: AtomicUsize::new(0),
                waiting: AtomicUsize::new(0),
                retry_attempts: Mutex::new(HashMap::new()),
                tracker: TaskTracker::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Run ticks until shutdown, then cancel workers and wait up to `drain`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>, drain: Duration) {
        let interval = self.shared.config.tick_interval;
        info!(
            interval_secs = interval.as_secs(),
            max_running = self.shared.config.max_running,
            strict = self.shared.config.strict,
            "starter started"
        );
        loop {
            tokio::select! {
                _ = sleep(interval) => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "starter tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("starter shutting down");
                    break;
                }
            }
        }
        self.shutdown(drain).await;
    }

    /// One dispatch pass. Returns once workers are spawned, not finished.
    pub async fn tick(&self) -> StarterResult<TickReport> {
        let store = &self.shared.store;
        let lock = match store
            .acquire_advisory_lock(LOCK_NAME, self.shared.config.lock_timeout)
            .await
        {
            Ok(lock) => lock,
            Err(StoreError::LockTimeout(_)) => {
                debug!("starter lock busy, skipping tick");
                return Ok(TickReport::default());
            }
            Err(e) => return Err(e.into()),
        };

        let result = self.spawn_workers();
        if let Err(e) = store.release_advisory_lock(&lock) {
            warn!(error = %e, "failed to release starter lock");
        }
        result
    }

    fn spawn_workers(&self) -> StarterResult<TickReport> {
        let jobs = self.shared.store.list_jobs()?;
        let mut report = TickReport {
            jobs: jobs.len(),
            spawned: 0,
        };
        if jobs.is_empty() {
            return Ok(report);
        }

        let mut inflight = self.shared.inflight.lock().unwrap_or_else(|e| e.into_inner());
        for job in jobs {
            if inflight.len() >= self.shared.config.max_running {
                debug!(inflight = inflight.len(), "starter at capacity");
                break;
            }
            if !inflight.insert(job.id) {
                continue;
            }
            let shared = self.shared.clone();
            self.shared.tracker.spawn(async move {
                let job_id = job.id;
                shared.work(job).await;
                shared
                    .inflight
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&job_id);
            });
            report.spawned += 1;
        }
        if report.spawned > 0 {
            debug!(jobs = report.jobs, spawned = report.spawned, "workers spawned");
        }
        Ok(report)
    }

    /// Wait until every spawned worker has finished.
    pub async fn wait_idle(&self) {
        self.shared.tracker.close();
        self.shared.tracker.wait().await;
        self.shared.tracker.reopen();
    }

    /// Cancel in-flight workers and give them `drain` to unwind.
    pub async fn shutdown(&self, drain: Duration) {
        self.shared.cancel.cancel();
        self.shared.tracker.close();
        if timeout(drain, self.shared.tracker.wait()).await.is_err() {
            warn!(
                remaining = self.shared.tracker.len(),
                "workers did not drain, abandoning"
            );
        }
    }

    /// Failed attempts recorded for a job still being worked on.
    pub fn retry_attempts(&self, job_id: &JobId) -> u32 {
        self.shared
            .retry_attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(job_id)
            .copied()
            .unwrap_or(0)
    }
}

impl Shared {
    async fn work(&self, job: Job) {
        let job_id = job.id;
        self.waiting.fetch_add(1, Ordering::SeqCst);
        self.publish_gauges();

        let permit = tokio::select! {
            permit = self.permits.clone().acquire_owned() => permit.ok(),
            _ = self.cancel.cancelled() => None,
        };
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        let Some(_permit) = permit else {
            self.publish_gauges();
            return;
        };

        self.running.fetch_add(1, Ordering::SeqCst);
        self.publish_gauges();

        let result = tokio::select! {
            r = timeout(self.config.provision_deadline, self.start_job(&job)) => {
                r.unwrap_or(Err(StarterError::DeadlineExceeded))
            }
            _ = self.cancel.cancelled() => Err(StarterError::Cancelled),
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.publish_gauges();

        match result {
            Ok(JobOutcome::Started(runner_id)) => {
                info!(%job_id, %runner_id, "job started");
            }
            Ok(JobOutcome::Deferred) => debug!(%job_id, "job deferred by safety check"),
            Ok(JobOutcome::Dropped) => info!(%job_id, "job dropped, target is gone"),
            Err(StarterError::Cancelled) => debug!(%job_id, "worker cancelled"),
            Err(e) => warn!(%job_id, error = %e, "job not started, will retry next tick"),
        }
        self.retry_attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&job_id);
    }

    fn publish_gauges(&self) {
        self.metrics.set(
            &STARTER_RUNNING,
            &[],
            self.running.load(Ordering::SeqCst) as f64,
        );
        self.metrics.set(
            &STARTER_WAITING,
            &[],
            self.waiting.load(Ordering::SeqCst) as f64,
        );
    }

    async fn start_job(&self, job: &Job) -> StarterResult<JobOutcome> {
        if !self.safety.check(job).await? {
            return Ok(JobOutcome::Deferred);
        }

        let target = match self.store.get_target(&job.target_id) {
            Ok(target) if !target.is_deleted() => target,
            Ok(_) => return self.drop_job(job),
            Err(e) if e.is_not_found() => return self.drop_job(job),
            Err(e) => return Err(e.into()),
        };

        let labels = extract_labels(&job.check_event);
        let resource_type = resource_type_from_labels(&labels, target.resource_type);
        let defaults = &self.config.runner_defaults;
        let runner_user = defaults.user_for(target.runner_user.as_deref()).to_string();
        let runner_version = defaults
            .version_for(target.runner_version.as_deref())
            .to_string();
        let mode = RunnerMode::from_version(&runner_version)?;

        let registration = self.hosting.registration_token(&target).await?;
        let provisioner = self
            .providers
            .for_target(target.provider_url.as_deref())
            .await?;
        let runner_url = repository_url(target.host_domain.as_deref(), &target.scope);

        for attempt in 1..=MAX_ATTEMPTS {
            let runner_id = Uuid::new_v4();
            let name = runner_name(&runner_id);
            let script = build_setup_script(&ScriptParams {
                runner_name: &name,
                runner_url: &runner_url,
                registration_token: &registration.token,
                runner_user: &runner_user,
                runner_version: &runner_version,
                mode,
                labels: &labels,
            })?;
            let spec = InstanceSpec {
                runner_name: name.clone(),
                setup_script: script,
                resource_type,
                labels: runner_labels(&labels),
            };

            match self.provision(provisioner.as_ref(), &target, &spec).await {
                Ok(instance) => {
                    self.metrics.inc(&ADD_INSTANCE, &[("result", "ok")]);
                    let runner = Runner {
                        id: runner_id,
                        cloud_id: instance.cloud_id.clone(),
                        shoes_type: instance.shoes_type,
                        ip_address: instance.ip_address,
                        target_id: target.id,
                        resource_type: instance.resource_type,
                        runner_version: runner_version.clone(),
                        runner_user: runner_user.clone(),
                        repository_url: repository_url(job.host_domain.as_deref(), &job.repository),
                        request_webhook: job.check_event.clone(),
                        created_at: Utc::now(),
                        updated_at: Utc::now(),
                        deleted_at: None,
                        reason: None,
                    };
                    if let Err(e) = self.store.create_runner(&runner) {
                        error!(
                            job_id = %job.id,
                            cloud_id = %instance.cloud_id,
                            error = %e,
                            "instance started but runner not recorded"
                        );
                        return Err(e.into());
                    }
                    self.store.delete_job(&job.id)?;
                    return Ok(JobOutcome::Started(runner_id));
                }
                Err(e) => {
                    self.metrics.inc(&ADD_INSTANCE, &[("result", "error")]);
                    self.record_retry(&job.id);
                    if attempt == MAX_ATTEMPTS {
                        warn!(job_id = %job.id, attempt, error = %e, "giving up on job for now");
                        break;
                    }
                    let delay = backoff_delay(attempt);
                    warn!(
                        job_id = %job.id,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "failed to start instance"
                    );
                    sleep(delay).await;
                }
            }
        }

        Err(StarterError::Exhausted {
            job_id: job.id,
            attempts: MAX_ATTEMPTS,
        })
    }

    /// Add the instance and, in strict mode, wait for it to register.
    /// An instance that never registers is deleted again.
    async fn provision(
        &self,
        provisioner: &dyn Provisioner,
        target: &Target,
        spec: &InstanceSpec,
    ) -> StarterResult<Instance> {
        let instance = provisioner.add_instance(spec).await?;
        debug!(
            runner = %spec.runner_name,
            cloud_id = %instance.cloud_id,
            resource_type = spec.resource_type.as_str(),
            "instance added"
        );
        if !self.config.strict {
            return Ok(instance);
        }

        match self.wait_registered(target, &spec.runner_name).await {
            Ok(()) => Ok(instance),
            Err(e) => {
                match provisioner
                    .delete_instance(&instance.cloud_id, &spec.labels)
                    .await
                {
                    Err(del) if !del.is_not_found() => {
                        warn!(cloud_id = %instance.cloud_id, error = %del, "failed to delete unregistered instance");
                    }
                    _ => {}
                }
                Err(e)
            }
        }
    }

    async fn wait_registered(&self, target: &Target, name: &str) -> StarterResult<()> {
        let deadline = tokio::time::Instant::now() + self.config.registration_timeout;
        loop {
            match self.hosting.list_runners(target).await {
                Ok(runners) if runners.iter().any(|r| r.name == name) => return Ok(()),
                Ok(_) => {}
                Err(e) => debug!(runner = %name, error = %e, "runner list failed while waiting"),
            }
            if tokio::time::Instant::now() + self.config.registration_poll > deadline {
                return Err(StarterError::NotRegistered(name.to_string()));
            }
            sleep(self.config.registration_poll).await;
        }
    }

    fn drop_job(&self, job: &Job) -> StarterResult<JobOutcome> {
        self.store.delete_job(&job.id)?;
        Ok(JobOutcome::Dropped)
    }

    fn record_retry(&self, job_id: &JobId) {
        let job_label = job_id.to_string();
        self.metrics.inc(&RETRY, &[("job_id", job_label.as_str())]);
        *self
            .retry_attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(*job_id)
            .or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeDelta;
    use myshoes_core::{ResourceType, TargetStatus};
    use myshoes_github::fake::{FakeHosting, runner_info};
    use myshoes_provisioner::fake::FakeProvisioner;
    use myshoes_provisioner::{ProvisionResult, ProvisionerFactory};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::time::Instant;

    const SCOPE: &str = "octocat/hello-world";

    fn target(provider_url: Option<&str>) -> Target {
        let now = Utc::now();
        Target {
            id: Uuid::new_v4(),
            scope: SCOPE.to_string(),
            host_domain: None,
            installation_id: 1,
            installation_token: "ghs_1".to_string(),
            token_expired_at: now + TimeDelta::hours(1),
            resource_type: ResourceType::Nano,
            runner_version: None,
            runner_user: None,
            provider_url: provider_url.map(str::to_string),
            status: TargetStatus::Active,
            status_description: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn job(target: &Target, labels: &[&str]) -> Job {
        Job::new(
            target.id,
            SCOPE,
            json!({"action": "queued", "workflow_job": {"id": 1, "labels": labels}}),
            None,
        )
    }

    fn config(strict: bool) -> StarterConfig {
        StarterConfig {
            strict,
            lock_timeout: Duration::from_millis(200),
            ..StarterConfig::default()
        }
    }

    struct Harness {
        store: Store,
        hosting: Arc<FakeHosting>,
        provisioner: Arc<FakeProvisioner>,
        metrics: Metrics,
        target: Target,
    }

    impl Harness {
        fn new() -> Self {
            let store = Store::open_in_memory().unwrap();
            let target = store.create_target(&target(None)).unwrap();
            Self {
                store,
                hosting: Arc::new(FakeHosting::new()),
                provisioner: Arc::new(FakeProvisioner::new()),
                metrics: Metrics::new(),
                target,
            }
        }

        fn starter(&self, config: StarterConfig) -> Starter {
            self.starter_with(self.provisioner.clone(), config)
        }

        fn starter_with(&self, provisioner: Arc<dyn Provisioner>, config: StarterConfig) -> Starter {
            Starter::new(
                self.store.clone(),
                self.hosting.clone(),
                Arc::new(ProviderSet::new(provisioner)),
                self.metrics.clone(),
                config,
            )
        }

        fn enqueue(&self, labels: &[&str]) -> Job {
            let job = job(&self.target, labels);
            self.store.enqueue_job(&job).unwrap();
            job
        }
    }

    /// Registers every instance it adds as an online runner.
    struct RegisteringProvisioner {
        inner: Arc<FakeProvisioner>,
        hosting: Arc<FakeHosting>,
    }

    #[async_trait]
    impl Provisioner for RegisteringProvisioner {
        async fn add_instance(&self, spec: &InstanceSpec) -> ProvisionResult<Instance> {
            let instance = self.inner.add_instance(spec).await?;
            self.hosting
                .add_runner(SCOPE, runner_info(7, &spec.runner_name, true));
            Ok(instance)
        }

        async fn delete_instance(&self, cloud_id: &str, labels: &[String]) -> ProvisionResult<()> {
            self.inner.delete_instance(cloud_id, labels).await
        }
    }

    struct Closed;

    #[async_trait]
    impl Safety for Closed {
        async fn check(&self, _job: &Job) -> StarterResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn queued_job_becomes_a_runner() {
        let h = Harness::new();
        let job = h.enqueue(&["myshoes", "self-hosted"]);
        let starter = h.starter(config(false));

        let report = starter.tick().await.unwrap();
        assert_eq!(report, TickReport { jobs: 1, spawned: 1 });
        starter.wait_idle().await;

        assert!(h.store.list_jobs().unwrap().is_empty());
        let runners = h.store.list_runners().unwrap();
        assert_eq!(runners.len(), 1);
        let runner = &runners[0];

        let added = h.provisioner.added();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].runner_name, runner.name());
        assert!(added[0].runner_name.starts_with("myshoes-"));
        assert_eq!(added[0].resource_type, ResourceType::Nano);
        assert_eq!(added[0].labels, vec!["myshoes", "self-hosted"]);

        assert_eq!(runner.target_id, h.target.id);
        assert_eq!(runner.resource_type, ResourceType::Nano);
        assert_eq!(runner.runner_version, "latest");
        assert_eq!(runner.runner_user, "runner");
        assert_eq!(runner.repository_url, "https://github.com/octocat/hello-world");
        assert_eq!(runner.request_webhook, job.check_event);
        assert_eq!(h.hosting.registration_tokens_minted(), 1);
        assert_eq!(h.metrics.get(&ADD_INSTANCE, &[("result", "ok")]), 1.0);
        assert_eq!(h.metrics.get(&STARTER_RUNNING, &[]), 0.0);
    }

    #[tokio::test]
    async fn size_label_overrides_target_size() {
        let h = Harness::new();
        h.enqueue(&["self-hosted", "large"]);
        let starter = h.starter(config(false));

        starter.tick().await.unwrap();
        starter.wait_idle().await;

        assert_eq!(h.provisioner.added()[0].resource_type, ResourceType::Large);
        assert_eq!(h.store.list_runners().unwrap()[0].resource_type, ResourceType::Large);
    }

    #[tokio::test]
    async fn job_of_missing_or_deleted_target_is_dropped() {
        let h = Harness::new();
        let orphan = Job::new(Uuid::new_v4(), SCOPE, json!({}), None);
        h.store.enqueue_job(&orphan).unwrap();
        h.enqueue(&["myshoes"]);
        h.store.delete_target(&h.target.id).unwrap();
        let starter = h.starter(config(false));

        starter.tick().await.unwrap();
        starter.wait_idle().await;

        assert!(h.store.list_jobs().unwrap().is_empty());
        assert!(h.provisioner.added().is_empty());
        assert!(h.store.list_runners().unwrap().is_empty());
    }

    #[tokio::test]
    async fn safety_gate_defers_job() {
        let h = Harness::new();
        h.enqueue(&["myshoes"]);
        let starter = Starter::with_safety(
            h.store.clone(),
            h.hosting.clone(),
            Arc::new(ProviderSet::new(h.provisioner.clone())),
            h.metrics.clone(),
            config(false),
            Arc::new(Closed),
        );

        starter.tick().await.unwrap();
        starter.wait_idle().await;

        assert_eq!(h.store.list_jobs().unwrap().len(), 1);
        assert_eq!(h.provisioner.add_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_back_off_then_succeed() {
        let h = Harness::new();
        let job = h.enqueue(&["myshoes"]);
        h.provisioner.fail_next_adds(2);
        let starter = h.starter(config(false));

        let started = Instant::now();
        starter.tick().await.unwrap();
        starter.wait_idle().await;
        let elapsed = started.elapsed();

        // 2 s and 4 s, each with under a second of jitter.
        assert!(elapsed >= Duration::from_secs(6), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(8), "{elapsed:?}");

        assert_eq!(h.provisioner.add_attempts(), 3);
        assert_eq!(h.store.list_runners().unwrap().len(), 1);
        assert!(h.store.list_jobs().unwrap().is_empty());
        let job_label = job.id.to_string();
        assert_eq!(h.metrics.get(&RETRY, &[("job_id", job_label.as_str())]), 2.0);
        assert_eq!(h.metrics.get(&ADD_INSTANCE, &[("result", "error")]), 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn job_stays_queued_after_exhausting_attempts() {
        let h = Harness::new();
        h.enqueue(&["myshoes"]);
        h.provisioner.fail_next_adds(usize::MAX);
        let starter = h.starter(StarterConfig {
            provision_deadline: Duration::from_secs(60 * 60),
            ..config(false)
        });

        starter.tick().await.unwrap();
        starter.wait_idle().await;

        assert_eq!(h.provisioner.add_attempts(), MAX_ATTEMPTS as usize);
        assert_eq!(h.store.list_jobs().unwrap().len(), 1);
        assert!(h.store.list_runners().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn strict_mode_waits_for_registration() {
        let h = Harness::new();
        h.enqueue(&["myshoes"]);
        let provisioner = Arc::new(RegisteringProvisioner {
            inner: h.provisioner.clone(),
            hosting: h.hosting.clone(),
        });
        let starter = h.starter_with(provisioner, config(true));

        starter.tick().await.unwrap();
        starter.wait_idle().await;

        assert_eq!(h.store.list_runners().unwrap().len(), 1);
        assert!(h.provisioner.deleted().is_empty());
        assert!(h.hosting.list_runner_calls() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn strict_mode_deletes_instances_that_never_register() {
        let h = Harness::new();
        h.enqueue(&["myshoes"]);
        let starter = h.starter(config(true));

        starter.tick().await.unwrap();
        starter.wait_idle().await;

        // Three full registration windows fit in the ten minute deadline.
        assert_eq!(h.provisioner.add_attempts(), 4);
        assert_eq!(h.provisioner.deleted().len(), 3);
        assert!(h.provisioner.live_instances().len() <= 1);
        assert!(h.store.list_runners().unwrap().is_empty());
        assert_eq!(h.store.list_jobs().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded_by_max_running() {
        let h = Harness::new();
        for _ in 0..5 {
            h.enqueue(&["myshoes"]);
        }
        h.provisioner.set_add_delay(Duration::from_secs(1));
        let starter = h.starter(StarterConfig {
            max_running: 2,
            ..config(false)
        });

        assert_eq!(starter.tick().await.unwrap().spawned, 2);
        assert_eq!(starter.tick().await.unwrap().spawned, 0);
        starter.wait_idle().await;
        assert_eq!(starter.tick().await.unwrap().spawned, 2);
        starter.wait_idle().await;
        assert_eq!(starter.tick().await.unwrap().spawned, 1);
        starter.wait_idle().await;

        assert!(h.provisioner.peak_concurrent_adds() <= 2);
        assert_eq!(h.store.list_runners().unwrap().len(), 5);
        assert!(h.store.list_jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn busy_lock_skips_the_tick() {
        let h = Harness::new();
        h.enqueue(&["myshoes"]);
        let held = h
            .store
            .acquire_advisory_lock(LOCK_NAME, Duration::from_secs(1))
            .await
            .unwrap();
        let starter = h.starter(config(false));

        assert_eq!(starter.tick().await.unwrap(), TickReport::default());

        h.store.release_advisory_lock(&held).unwrap();
        assert_eq!(starter.tick().await.unwrap().spawned, 1);
        starter.wait_idle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_workers_and_keeps_the_job() {
        let h = Harness::new();
        h.enqueue(&["myshoes"]);
        h.provisioner.set_add_delay(Duration::from_secs(3600));
        let starter = h.starter(config(false));

        starter.tick().await.unwrap();
        tokio::task::yield_now().await;
        starter.shutdown(Duration::from_secs(30)).await;

        assert_eq!(h.store.list_jobs().unwrap().len(), 1);
        assert!(h.store.list_runners().unwrap().is_empty());
    }

    struct SingleFactory(Arc<FakeProvisioner>);

    #[async_trait]
    impl ProvisionerFactory for SingleFactory {
        async fn open(&self, _location: &str) -> ProvisionResult<Arc<dyn Provisioner>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn target_provider_url_selects_its_plugin() {
        let store = Store::open_in_memory().unwrap();
        let target = store
            .create_target(&target(Some("https://plugins.example.com/shoes-lxd")))
            .unwrap();
        store.enqueue_job(&job(&target, &["myshoes"])).unwrap();

        let default = Arc::new(FakeProvisioner::with_shoes_type("default"));
        let custom = Arc::new(FakeProvisioner::with_shoes_type("lxd"));
        let providers = ProviderSet::new(default.clone())
            .with_factory(Arc::new(SingleFactory(custom.clone())));
        let starter = Starter::new(
            store.clone(),
            Arc::new(FakeHosting::new()),
            Arc::new(providers),
            Metrics::new(),
            config(false),
        );

        starter.tick().await.unwrap();
        starter.wait_idle().await;

        assert!(default.added().is_empty());
        assert_eq!(custom.added().len(), 1);
        assert_eq!(store.list_runners().unwrap()[0].shoes_type, "lxd");
    }
}
