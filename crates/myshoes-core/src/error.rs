//! Parse errors for core domain values.

use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid scope: {0}")]
    InvalidScope(String),

    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),

    #[error("invalid runner version: {0}")]
    InvalidRunnerVersion(String),

    #[error("invalid repository url: {0}")]
    InvalidRepositoryUrl(String),

    #[error("unknown webhook mode: {0}")]
    UnknownWebhookMode(String),
}
