//! The hosting-service seam consumed by ingest, starter, reaper and the
//! token refresher.

use async_trait::async_trait;
use myshoes_core::Target;

use crate::error::GitHubResult;
use crate::types::{AccessToken, RunnerInfo, WorkflowJob, WorkflowRun};

#[async_trait]
pub trait HostingService: Send + Sync {
    /// Installation access token, cached until six minutes before expiry.
    async fn installation_token(
        &self,
        host_domain: Option<&str>,
        installation_id: i64,
    ) -> GitHubResult<AccessToken>;

    /// Id of the installation that covers `scope`.
    async fn find_installation(&self, host_domain: Option<&str>, scope: &str) -> GitHubResult<i64>;

    /// Token a new runner uses to enroll under the target's scope.
    async fn registration_token(&self, target: &Target) -> GitHubResult<AccessToken>;

    /// Self-hosted runners registered under the target's scope.
    async fn list_runners(&self, target: &Target) -> GitHubResult<Vec<RunnerInfo>>;

    async fn remove_runner(&self, target: &Target, runner_id: i64) -> GitHubResult<()>;

    /// Newest workflow runs of `repository` (`owner/repo`).
    async fn list_workflow_runs_newest(
        &self,
        target: &Target,
        repository: &str,
        limit: usize,
    ) -> GitHubResult<Vec<WorkflowRun>>;

    async fn list_workflow_run_jobs(
        &self,
        target: &Target,
        repository: &str,
        run_id: i64,
    ) -> GitHubResult<Vec<WorkflowJob>>;

    async fn get_workflow_job(
        &self,
        target: &Target,
        repository: &str,
        job_id: i64,
    ) -> GitHubResult<WorkflowJob>;
}
