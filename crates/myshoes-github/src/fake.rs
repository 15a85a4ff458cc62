//! In-memory [`HostingService`] for tests of the controller loops.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};

use myshoes_core::Target;

use crate::error::{GitHubError, GitHubResult};
use crate::service::HostingService;
use crate::types::{AccessToken, RunnerInfo, WorkflowJob, WorkflowRun};

#[derive(Default)]
struct State {
    runners: HashMap<String, Vec<RunnerInfo>>,
    removed: Vec<i64>,
    installations: HashMap<String, i64>,
    failing_installations: HashSet<i64>,
    fail_list_runners: bool,
    workflow_runs: HashMap<String, Vec<WorkflowRun>>,
    run_jobs: HashMap<i64, Vec<WorkflowJob>>,
    jobs: HashMap<i64, WorkflowJob>,
    registration_tokens: usize,
    list_runner_calls: usize,
}

/// Scriptable hosting service. Runners are keyed by target scope.
#[derive(Default)]
pub struct FakeHosting {
    state: Mutex<State>,
}

/// Build a listed runner.
pub fn runner_info(id: i64, name: &str, online: bool) -> RunnerInfo {
    RunnerInfo {
        id,
        name: name.to_string(),
        status: if online { "online" } else { "offline" }.to_string(),
        busy: false,
    }
}

impl FakeHosting {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_runners(&self, scope: &str, runners: Vec<RunnerInfo>) {
        self.lock().runners.insert(scope.to_string(), runners);
    }

    pub fn add_runner(&self, scope: &str, runner: RunnerInfo) {
        self.lock()
            .runners
            .entry(scope.to_string())
            .or_default()
            .push(runner);
    }

    pub fn removed_runners(&self) -> Vec<i64> {
        self.lock().removed.clone()
    }

    pub fn add_installation(&self, scope: &str, installation_id: i64) {
        self.lock()
            .installations
            .insert(scope.to_string(), installation_id);
    }

    pub fn fail_installation(&self, installation_id: i64) {
        self.lock().failing_installations.insert(installation_id);
    }

    pub fn fail_list_runners(&self, fail: bool) {
        self.lock().fail_list_runners = fail;
    }

    pub fn add_workflow_run(&self, repository: &str, run: WorkflowRun) {
        self.lock()
            .workflow_runs
            .entry(repository.to_string())
            .or_default()
            .push(run);
    }

    pub fn set_run_jobs(&self, run_id: i64, jobs: Vec<WorkflowJob>) {
        let mut state = self.lock();
        for job in &jobs {
            state.jobs.insert(job.id, job.clone());
        }
        state.run_jobs.insert(run_id, jobs);
    }

    pub fn add_job(&self, job: WorkflowJob) {
        self.lock().jobs.insert(job.id, job);
    }

    pub fn registration_tokens_minted(&self) -> usize {
        self.lock().registration_tokens
    }

    pub fn list_runner_calls(&self) -> usize {
        self.lock().list_runner_calls
    }
}

#[async_trait]
impl HostingService for FakeHosting {
    async fn installation_token(
        &self,
        _host_domain: Option<&str>,
        installation_id: i64,
    ) -> GitHubResult<AccessToken> {
        if self.lock().failing_installations.contains(&installation_id) {
            return Err(GitHubError::Unauthorized(format!(
                "installation {installation_id} revoked"
            )));
        }
        Ok(AccessToken {
            token: format!("ghs_{installation_id}"),
            expires_at: Utc::now() + TimeDelta::hours(1),
        })
    }

    async fn find_installation(&self, _host_domain: Option<&str>, scope: &str) -> GitHubResult<i64> {
        let state = self.lock();
        let owner = scope.split('/').next().unwrap_or_default();
        state
            .installations
            .get(scope)
            .or_else(|| state.installations.get(owner))
            .copied()
            .ok_or_else(|| GitHubError::NoInstallation(scope.to_string()))
    }

    async fn registration_token(&self, target: &Target) -> GitHubResult<AccessToken> {
        let mut state = self.lock();
        if state.failing_installations.contains(&target.installation_id) {
            return Err(GitHubError::Unauthorized("installation revoked".to_string()));
        }
        state.registration_tokens += 1;
        Ok(AccessToken {
            token: format!("AREG{}", state.registration_tokens),
            expires_at: Utc::now() + TimeDelta::hours(1),
        })
    }

    async fn list_runners(&self, target: &Target) -> GitHubResult<Vec<RunnerInfo>> {
        let mut state = self.lock();
        state.list_runner_calls += 1;
        if state.fail_list_runners {
            return Err(GitHubError::Network("connection reset".to_string()));
        }
        Ok(state.runners.get(&target.scope).cloned().unwrap_or_default())
    }

    async fn remove_runner(&self, target: &Target, runner_id: i64) -> GitHubResult<()> {
        let mut state = self.lock();
        state.removed.push(runner_id);
        if let Some(runners) = state.runners.get_mut(&target.scope) {
            runners.retain(|r| r.id != runner_id);
        }
        Ok(())
    }

    async fn list_workflow_runs_newest(
        &self,
        target: &Target,
        repository: &str,
        limit: usize,
    ) -> GitHubResult<Vec<WorkflowRun>> {
        let state = self.lock();
        if state.failing_installations.contains(&target.installation_id) {
            return Err(GitHubError::Unauthorized("installation revoked".to_string()));
        }
        let mut runs = state
            .workflow_runs
            .get(repository)
            .cloned()
            .unwrap_or_default();
        runs.truncate(limit);
        Ok(runs)
    }

    async fn list_workflow_run_jobs(
        &self,
        _target: &Target,
        _repository: &str,
        run_id: i64,
    ) -> GitHubResult<Vec<WorkflowJob>> {
        Ok(self.lock().run_jobs.get(&run_id).cloned().unwrap_or_default())
    }

    async fn get_workflow_job(
        &self,
        _target: &Target,
        _repository: &str,
        job_id: i64,
    ) -> GitHubResult<WorkflowJob> {
        self.lock()
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or_else(|| GitHubError::NotFound(format!("job {job_id}")))
    }
}
