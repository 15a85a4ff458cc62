use myshoes_core::CoreError;
use myshoes_github::GitHubError;
use myshoes_store::StoreError;
use thiserror::Error;

pub type IngestResult<T> = Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("missing webhook signature")]
    MissingSignature,

    #[error("webhook signature mismatch")]
    BadSignature,

    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("hosting service error: {0}")]
    Hosting(#[from] GitHubError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl IngestError {
    /// Errors caused by the request itself rather than by the controller.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            IngestError::MissingSignature | IngestError::BadSignature | IngestError::InvalidPayload(_)
        )
    }
}
