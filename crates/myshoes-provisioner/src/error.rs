//! Error types for the provisioner boundary.

use thiserror::Error;

pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The instance does not exist. Deleting it counts as done.
    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("provisioner call failed: {0}")]
    Rpc(String),

    #[error("provisioner unavailable: {0}")]
    Unavailable(String),

    #[error("plugin handshake failed: {0}")]
    Handshake(String),

    #[error("failed to start plugin: {0}")]
    Spawn(String),

    #[error("failed to fetch plugin: {0}")]
    Download(String),
}

impl ProvisionError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProvisionError::NotFound(_))
    }
}

impl From<tonic::Status> for ProvisionError {
    fn from(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::NotFound => ProvisionError::NotFound(status.message().to_string()),
            tonic::Code::Unavailable => ProvisionError::Unavailable(status.message().to_string()),
            code => ProvisionError::Rpc(format!("{code}: {}", status.message())),
        }
    }
}
