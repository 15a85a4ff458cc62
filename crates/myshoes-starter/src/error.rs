use myshoes_core::{CoreError, JobId};
use myshoes_github::GitHubError;
use myshoes_provisioner::ProvisionError;
use myshoes_store::StoreError;
use thiserror::Error;

pub type StarterResult<T> = Result<T, StarterError>;

#[derive(Debug, Error)]
pub enum StarterError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("hosting service error: {0}")]
    Hosting(#[from] GitHubError),

    #[error("provisioner error: {0}")]
    Provision(#[from] ProvisionError),

    #[error("invalid runner settings: {0}")]
    Config(#[from] CoreError),

    #[error("failed to build setup script: {0}")]
    Script(String),

    #[error("runner {0} never registered with the hosting service")]
    NotRegistered(String),

    #[error("job {job_id} not started after {attempts} attempts")]
    Exhausted { job_id: JobId, attempts: u32 },

    #[error("provisioning deadline exceeded")]
    DeadlineExceeded,

    #[error("cancelled by shutdown")]
    Cancelled,
}
