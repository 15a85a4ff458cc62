//! myshoes-github: the controller's view of the hosting service.
//!
//! Authenticates as a GitHub App, caches installation and registration
//! tokens, coalesces hot list calls and records per-call metrics. The
//! [`HostingService`] trait is the seam the controller loops depend on;
//! [`GitHubClient`] is the REST implementation.
//!
//! # Architecture
//!
//! ```text
//! GitHubClient
//!   ├── AppCredentials       → app JWT for /app/* endpoints
//!   ├── SingleFlight caches  → tokens, runner lists, installations
//!   └── InstrumentedTransport → reqwest + metrics + rate-limit gauges
//!
//! TokenRefresher
//!   └── run() → periodic sweep persisting fresh installation tokens
//! ```

pub mod app;
pub mod cache;
pub mod client;
pub mod error;
pub mod refresher;
pub mod service;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use app::AppCredentials;
pub use client::{GitHubClient, TOKEN_MARGIN};
pub use error::{GitHubError, GitHubResult, RefreshError};
pub use refresher::TokenRefresher;
pub use service::HostingService;
pub use types::{AccessToken, Installation, RunnerInfo, WorkflowJob, WorkflowRun};
