//! TokenRefresher: keeps stored installation tokens ahead of expiry.
//!
//! Every sweep lists non-deleted targets and re-mints the installation
//! token of any target whose stored token expires within the horizon.
//! One target failing never aborts the sweep; it is marked `err`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use myshoes_core::{Target, TargetStatus};
use myshoes_metrics::Metrics;
use myshoes_metrics::catalog::TOKEN_REFRESH;
use myshoes_store::{Store, StoreResult};

use crate::error::RefreshError;
use crate::service::HostingService;

pub const REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Tokens expiring sooner than this are refreshed.
pub const REFRESH_HORIZON: TimeDelta = TimeDelta::minutes(10);

/// Outcome counts of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub refreshed: usize,
    pub failed: usize,
}

pub struct TokenRefresher {
    store: Store,
    hosting: Arc<dyn HostingService>,
    metrics: Metrics,
    interval: Duration,
}

impl TokenRefresher {
    pub fn new(store: Store, hosting: Arc<dyn HostingService>, metrics: Metrics) -> Self {
        Self {
            store,
            hosting,
            metrics,
            interval: REFRESH_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run the refresh loop until shutdown signal.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "token refresher started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.sweep(Utc::now()).await {
                        error!(error = %e, "token refresh sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("token refresher shutting down");
                    break;
                }
            }
        }
    }

    /// Refresh every target whose token expires before `now + horizon`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> StoreResult<SweepReport> {
        let mut report = SweepReport::default();
        for target in self.store.list_targets(true)? {
            if target.token_expired_at - now >= REFRESH_HORIZON {
                continue;
            }
            if self.refresh_target(&target).await {
                report.refreshed += 1;
            } else {
                report.failed += 1;
            }
        }
        debug!(refreshed = report.refreshed, failed = report.failed, "token sweep done");
        Ok(report)
    }

    /// Refresh one target, marking it `err` on failure. True if renewed.
    async fn refresh_target(&self, target: &Target) -> bool {
        let e = match self.refresh(target).await {
            Ok(()) => return true,
            Err(e) => e,
        };
        warn!(target_id = %target.id, error = %e, "token refresh failed");
        let description = e.to_string();
        if let Err(store_err) =
            self.store
                .update_target_status(&target.id, TargetStatus::Err, &description)
        {
            error!(target_id = %target.id, error = %store_err, "failed to mark target err");
        }
        false
    }

    async fn refresh(&self, target: &Target) -> Result<(), RefreshError> {
        let token = self
            .hosting
            .installation_token(target.host_domain.as_deref(), target.installation_id)
            .await;
        let token = match token {
            Ok(token) => token,
            Err(e) => {
                self.metrics.inc(&TOKEN_REFRESH, &[("result", "error")]);
                return Err(e.into());
            }
        };
        self.store
            .update_target_token(&target.id, &token.token, token.expires_at)?;
        self.metrics.inc(&TOKEN_REFRESH, &[("result", "ok")]);
        debug!(target_id = %target.id, expires_at = %token.expires_at, "installation token refreshed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GitHubError;
    use crate::fake::FakeHosting;
    use myshoes_core::ResourceType;
    use pretty_assertions::assert_eq;

    fn target(scope: &str, installation_id: i64, expires_in: TimeDelta) -> Target {
        let now = Utc::now();
        Target {
            id: uuid::Uuid::new_v4(),
            scope: scope.to_string(),
            host_domain: None,
            installation_id,
            installation_token: "ghs_old".to_string(),
            token_expired_at: now + expires_in,
            resource_type: ResourceType::Nano,
            runner_version: None,
            runner_user: None,
            provider_url: None,
            status: TargetStatus::Active,
            status_description: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn refreshes_only_tokens_near_expiry() {
        let store = Store::open_in_memory().unwrap();
        let hosting = Arc::new(FakeHosting::new());
        let soon = store
            .create_target(&target("a", 1, TimeDelta::minutes(9)))
            .unwrap();
        let later = store
            .create_target(&target("b", 2, TimeDelta::minutes(30)))
            .unwrap();

        let metrics = Metrics::new();
        let refresher = TokenRefresher::new(store.clone(), hosting.clone(), metrics.clone());
        let report = refresher.sweep(Utc::now()).await.unwrap();

        assert_eq!(report, SweepReport { refreshed: 1, failed: 0 });
        assert_eq!(store.get_target(&soon.id).unwrap().installation_token, "ghs_1");
        assert_eq!(store.get_target(&later.id).unwrap().installation_token, "ghs_old");
        assert_eq!(metrics.get(&TOKEN_REFRESH, &[("result", "ok")]), 1.0);
    }

    #[tokio::test]
    async fn failure_marks_target_err_and_continues() {
        let store = Store::open_in_memory().unwrap();
        let hosting = Arc::new(FakeHosting::new());
        hosting.fail_installation(1);
        let broken = store
            .create_target(&target("a", 1, TimeDelta::minutes(1)))
            .unwrap();
        let healthy = store
            .create_target(&target("b", 2, TimeDelta::minutes(1)))
            .unwrap();

        let refresher = TokenRefresher::new(store.clone(), hosting, Metrics::new());
        let report = refresher.sweep(Utc::now()).await.unwrap();

        assert_eq!(report, SweepReport { refreshed: 1, failed: 1 });
        let broken = store.get_target(&broken.id).unwrap();
        assert_eq!(broken.status, TargetStatus::Err);
        assert!(broken.status_description.contains("installation token"));
        assert_eq!(store.get_target(&healthy.id).unwrap().installation_token, "ghs_2");
    }

    #[tokio::test]
    async fn store_failures_are_reported_per_target() {
        let store = Store::open_in_memory().unwrap();
        let hosting = Arc::new(FakeHosting::new());
        hosting.fail_installation(1);
        let refresher = TokenRefresher::new(store, hosting, Metrics::new());

        let unstored = target("b", 2, TimeDelta::minutes(1));
        let err = refresher.refresh(&unstored).await.unwrap_err();
        assert!(matches!(err, RefreshError::Persist(_)));

        let revoked = target("a", 1, TimeDelta::minutes(1));
        let err = refresher.refresh(&revoked).await.unwrap_err();
        assert!(matches!(err, RefreshError::Mint(GitHubError::Unauthorized(_))));
        // The target row is gone, so marking it `err` fails too; that is logged.
        assert!(!refresher.refresh_target(&revoked).await);
    }

    #[tokio::test]
    async fn deleted_targets_are_skipped() {
        let store = Store::open_in_memory().unwrap();
        let hosting = Arc::new(FakeHosting::new());
        let gone = store
            .create_target(&target("a", 1, TimeDelta::minutes(1)))
            .unwrap();
        store.delete_target(&gone.id).unwrap();

        let refresher = TokenRefresher::new(store, hosting, Metrics::new());
        let report = refresher.sweep(Utc::now()).await.unwrap();
        assert_eq!(report, SweepReport::default());
    }
}
