//! Error types for the hosting client.

use myshoes_store::StoreError;
use thiserror::Error;

pub type GitHubResult<T> = Result<T, GitHubError>;

/// Hosting service failures.
///
/// `Clone` so that callers coalesced onto one in-flight request all observe
/// the same failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GitHubError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("http {status}: {message}")]
    Http { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("app authentication error: {0}")]
    Auth(String),

    #[error("no installation matches {0}")]
    NoInstallation(String),

    #[error("invalid scope: {0}")]
    InvalidScope(String),
}

impl GitHubError {
    /// Short class name used as a metric label.
    pub fn class(&self) -> &'static str {
        match self {
            GitHubError::NotFound(_) => "not_found",
            GitHubError::RateLimited(_) => "rate_limited",
            GitHubError::Unauthorized(_) => "unauthorized",
            GitHubError::Http { .. } => "http",
            GitHubError::Network(_) => "network",
            GitHubError::Decode(_) => "decode",
            GitHubError::Auth(_) => "auth",
            GitHubError::NoInstallation(_) => "no_installation",
            GitHubError::InvalidScope(_) => "invalid_scope",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GitHubError::NotFound(_))
    }
}

/// Why a target's installation token could not be refreshed.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("failed to refresh installation token: {0}")]
    Mint(#[from] GitHubError),

    #[error("failed to store installation token: {0}")]
    Persist(#[from] StoreError),
}
