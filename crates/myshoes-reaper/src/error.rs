use myshoes_github::GitHubError;
use myshoes_provisioner::ProvisionError;
use myshoes_store::StoreError;
use thiserror::Error;

pub type ReaperResult<T> = Result<T, ReaperError>;

#[derive(Debug, Error)]
pub enum ReaperError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("hosting service error: {0}")]
    Hosting(#[from] GitHubError),

    #[error("provisioner error: {0}")]
    Provision(#[from] ProvisionError),

    #[error("cancelled by shutdown")]
    Cancelled,
}
