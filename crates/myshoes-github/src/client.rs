//! GitHub REST client implementing [`HostingService`].
//!
//! Installation and registration tokens are cached per installation and
//! per scope until [`TOKEN_MARGIN`] before expiry. Runner and installation
//! lists go through single-flight TTL caches so reaper fan-out collapses
//! into one request per scope.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::Method;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use myshoes_core::{Scope, Target, api_base_url};
use myshoes_metrics::Metrics;
use myshoes_metrics::catalog::GITHUB_CACHE;

use crate::app::AppCredentials;
use crate::cache::{Fetched, SingleFlight};
use crate::error::{GitHubError, GitHubResult};
use crate::service::HostingService;
use crate::transport::InstrumentedTransport;
use crate::types::*;

/// Tokens are treated as expired this long before their real expiry.
pub const TOKEN_MARGIN: Duration = Duration::from_secs(6 * 60);
pub const RUNNER_LIST_TTL: Duration = Duration::from_secs(1);
pub const INSTALLATION_LIST_TTL: Duration = Duration::from_secs(60 * 60);

const PER_PAGE: usize = 100;
const MAX_PAGES: usize = 100;

/// How long a token with `expires_at` may be served from cache.
pub fn token_ttl(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    let margin = TimeDelta::from_std(TOKEN_MARGIN).unwrap_or(TimeDelta::zero());
    (expires_at - now - margin).to_std().unwrap_or(Duration::ZERO)
}

fn host_key(host_domain: Option<&str>) -> String {
    host_domain.unwrap_or_default().to_string()
}

fn parse_scope(scope: &str) -> GitHubResult<Scope> {
    scope
        .parse()
        .map_err(|_| GitHubError::InvalidScope(scope.to_string()))
}

/// Credentials for one request family.
struct Auth {
    host_domain: Option<String>,
    bearer: String,
    quota_scope: String,
}

#[derive(Clone)]
pub struct GitHubClient {
    inner: Arc<Inner>,
}

struct Inner {
    app: AppCredentials,
    transport: InstrumentedTransport,
    metrics: Metrics,
    installation_tokens: SingleFlight<(String, i64), AccessToken>,
    registration_tokens: SingleFlight<String, AccessToken>,
    runners: SingleFlight<String, Vec<RunnerInfo>>,
    installations: SingleFlight<String, Vec<Installation>>,
    installation_repos: SingleFlight<(String, i64), Vec<Repository>>,
}

impl GitHubClient {
    pub fn new(app: AppCredentials, metrics: Metrics) -> GitHubResult<Self> {
        let transport = InstrumentedTransport::new(metrics.clone())?;
        info!(app_id = app.app_id(), "hosting client ready");
        Ok(Self {
            inner: Arc::new(Inner {
                app,
                transport,
                metrics,
                installation_tokens: SingleFlight::new(),
                registration_tokens: SingleFlight::new(),
                runners: SingleFlight::new(),
                installations: SingleFlight::new(),
                installation_repos: SingleFlight::new(),
            }),
        })
    }

    // ── Plumbing ───────────────────────────────────────────────────

    async fn cached<K, V, F>(
        &self,
        name: &'static str,
        cache: &SingleFlight<K, V>,
        key: K,
        fetch: F,
    ) -> GitHubResult<V>
    where
        K: Eq + Hash + Clone,
        V: Clone + Send + Sync + 'static,
        F: FnOnce() -> BoxFuture<'static, Fetched<V>>,
    {
        let (result, lookup) = cache.get_or_fetch(key, fetch).await;
        self.inner
            .metrics
            .inc(&GITHUB_CACHE, &[("cache", name), ("result", lookup.as_label())]);
        result
    }

    fn app_auth(&self, host_domain: Option<&str>) -> GitHubResult<Auth> {
        Ok(Auth {
            host_domain: host_domain.map(str::to_string),
            bearer: self.inner.app.jwt()?,
            quota_scope: "app".to_string(),
        })
    }

    async fn installation_auth(
        &self,
        host_domain: Option<&str>,
        installation_id: i64,
    ) -> GitHubResult<Auth> {
        let token = self.installation_token(host_domain, installation_id).await?;
        Ok(Auth {
            host_domain: host_domain.map(str::to_string),
            bearer: token.token,
            quota_scope: format!("installation:{installation_id}"),
        })
    }

    fn request(&self, auth: &Auth, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", api_base_url(auth.host_domain.as_deref()), path);
        self.inner
            .transport
            .http()
            .request(method, url)
            .bearer_auth(&auth.bearer)
    }

    /// Follow `page=` until a short page comes back.
    async fn paginate<P, T>(
        &self,
        endpoint: &'static str,
        auth: &Auth,
        path: &str,
        extract: fn(P) -> Vec<T>,
    ) -> GitHubResult<Vec<T>>
    where
        P: DeserializeOwned,
    {
        let mut items = Vec::new();
        for page in 1..=MAX_PAGES {
            let request = self
                .request(auth, Method::GET, path)
                .query(&[("per_page", PER_PAGE), ("page", page)]);
            let body: P = self
                .inner
                .transport
                .execute_json(endpoint, &auth.quota_scope, request)
                .await?;
            let batch = extract(body);
            let short = batch.len() < PER_PAGE;
            items.extend(batch);
            if short {
                break;
            }
        }
        Ok(items)
    }

    // ── Tokens ─────────────────────────────────────────────────────

    async fn create_installation_token(
        &self,
        host_domain: Option<&str>,
        installation_id: i64,
    ) -> GitHubResult<AccessToken> {
        let auth = self.app_auth(host_domain)?;
        let path = format!("app/installations/{installation_id}/access_tokens");
        let request = self.request(&auth, Method::POST, &path);
        let token: AccessToken = self
            .inner
            .transport
            .execute_json("create_installation_token", &auth.quota_scope, request)
            .await?;
        debug!(installation_id, expires_at = %token.expires_at, "installation token minted");
        Ok(token)
    }

    async fn create_registration_token(&self, target: &Target) -> GitHubResult<AccessToken> {
        let scope = parse_scope(&target.scope)?;
        let auth = self
            .installation_auth(target.host_domain.as_deref(), target.installation_id)
            .await?;
        let path = format!("{}/actions/runners/registration-token", scope.api_path());
        let request = self.request(&auth, Method::POST, &path);
        self.inner
            .transport
            .execute_json("create_registration_token", &auth.quota_scope, request)
            .await
    }

    // ── Installations ──────────────────────────────────────────────

    /// All installations of the app on `host_domain`.
    pub async fn list_installations(
        &self,
        host_domain: Option<&str>,
    ) -> GitHubResult<Vec<Installation>> {
        let client = self.clone();
        let host = host_domain.map(str::to_string);
        self.cached(
            "installations",
            &self.inner.installations,
            host_key(host_domain),
            move || {
                async move {
                    let auth = client.app_auth(host.as_deref())?;
                    let list = client
                        .paginate("list_installations", &auth, "app/installations", |p: Vec<Installation>| p)
                        .await?;
                    Ok((list, INSTALLATION_LIST_TTL))
                }
                .boxed()
            },
        )
        .await
    }

    /// Repositories granted to an installation.
    pub async fn list_installation_repositories(
        &self,
        host_domain: Option<&str>,
        installation_id: i64,
    ) -> GitHubResult<Vec<Repository>> {
        let client = self.clone();
        let host = host_domain.map(str::to_string);
        self.cached(
            "installation_repositories",
            &self.inner.installation_repos,
            (host_key(host_domain), installation_id),
            move || {
                async move {
                    let auth = client
                        .installation_auth(host.as_deref(), installation_id)
                        .await?;
                    let list = client
                        .paginate(
                            "list_installation_repositories",
                            &auth,
                            "installation/repositories",
                            |p: RepositoryPage| p.repositories,
                        )
                        .await?;
                    Ok((list, INSTALLATION_LIST_TTL))
                }
                .boxed()
            },
        )
        .await
    }
}

#[async_trait]
impl HostingService for GitHubClient {
    async fn installation_token(
        &self,
        host_domain: Option<&str>,
        installation_id: i64,
    ) -> GitHubResult<AccessToken> {
        let client = self.clone();
        let host = host_domain.map(str::to_string);
        self.cached(
            "installation_token",
            &self.inner.installation_tokens,
            (host_key(host_domain), installation_id),
            move || {
                async move {
                    let token = client
                        .create_installation_token(host.as_deref(), installation_id)
                        .await?;
                    let ttl = token_ttl(token.expires_at, Utc::now());
                    Ok((token, ttl))
                }
                .boxed()
            },
        )
        .await
    }

    async fn find_installation(&self, host_domain: Option<&str>, scope: &str) -> GitHubResult<i64> {
        let wanted = parse_scope(scope)?;
        let installations = self.list_installations(host_domain).await?;
        let candidates = installations
            .iter()
            .filter(|i| !i.is_suspended())
            // The whole owner must match; `octo` does not serve `octocat`.
            .filter(|i| i.account.login.eq_ignore_ascii_case(wanted.owner()));

        for installation in candidates {
            if installation.has_selected_repositories() && wanted.is_repository() {
                let repos = self
                    .list_installation_repositories(host_domain, installation.id)
                    .await?;
                let full_name = wanted.to_string();
                if !repos
                    .iter()
                    .any(|r| r.full_name.eq_ignore_ascii_case(&full_name))
                {
                    continue;
                }
            }
            debug!(scope, installation_id = installation.id, "installation resolved");
            return Ok(installation.id);
        }
        Err(GitHubError::NoInstallation(scope.to_string()))
    }

    async fn registration_token(&self, target: &Target) -> GitHubResult<AccessToken> {
        let client = self.clone();
        let owned = target.clone();
        self.cached(
            "registration_token",
            &self.inner.registration_tokens,
            target.natural_key(),
            move || {
                async move {
                    let token = client.create_registration_token(&owned).await?;
                    let ttl = token_ttl(token.expires_at, Utc::now());
                    Ok((token, ttl))
                }
                .boxed()
            },
        )
        .await
    }

    async fn list_runners(&self, target: &Target) -> GitHubResult<Vec<RunnerInfo>> {
        let client = self.clone();
        let owned = target.clone();
        self.cached(
            "runners",
            &self.inner.runners,
            target.natural_key(),
            move || {
                async move {
                    let scope = parse_scope(&owned.scope)?;
                    let auth = client
                        .installation_auth(owned.host_domain.as_deref(), owned.installation_id)
                        .await?;
                    let path = format!("{}/actions/runners", scope.api_path());
                    let runners = client
                        .paginate("list_runners", &auth, &path, |p: RunnerPage| p.runners)
                        .await?;
                    Ok((runners, RUNNER_LIST_TTL))
                }
                .boxed()
            },
        )
        .await
    }

    async fn remove_runner(&self, target: &Target, runner_id: i64) -> GitHubResult<()> {
        let scope = parse_scope(&target.scope)?;
        let auth = self
            .installation_auth(target.host_domain.as_deref(), target.installation_id)
            .await?;
        let path = format!("{}/actions/runners/{runner_id}", scope.api_path());
        let request = self.request(&auth, Method::DELETE, &path);
        self.inner
            .transport
            .execute("remove_runner", &auth.quota_scope, request)
            .await?;
        self.inner.runners.invalidate(&target.natural_key());
        debug!(scope = %target.scope, runner_id, "runner deregistered");
        Ok(())
    }

    async fn list_workflow_runs_newest(
        &self,
        target: &Target,
        repository: &str,
        limit: usize,
    ) -> GitHubResult<Vec<WorkflowRun>> {
        let auth = self
            .installation_auth(target.host_domain.as_deref(), target.installation_id)
            .await?;
        let path = format!("repos/{repository}/actions/runs");
        let request = self
            .request(&auth, Method::GET, &path)
            .query(&[("per_page", limit), ("page", 1)]);
        let page: WorkflowRunPage = self
            .inner
            .transport
            .execute_json("list_workflow_runs", &auth.quota_scope, request)
            .await?;
        Ok(page
            .workflow_runs
            .into_iter()
            .filter_map(WorkflowRun::from_value)
            .collect())
    }

    async fn list_workflow_run_jobs(
        &self,
        target: &Target,
        repository: &str,
        run_id: i64,
    ) -> GitHubResult<Vec<WorkflowJob>> {
        let auth = self
            .installation_auth(target.host_domain.as_deref(), target.installation_id)
            .await?;
        let path = format!("repos/{repository}/actions/runs/{run_id}/jobs");
        self.paginate("list_workflow_jobs", &auth, &path, |p: WorkflowJobPage| p.jobs)
            .await
    }

    async fn get_workflow_job(
        &self,
        target: &Target,
        repository: &str,
        job_id: i64,
    ) -> GitHubResult<WorkflowJob> {
        let auth = self
            .installation_auth(target.host_domain.as_deref(), target.installation_id)
            .await?;
        let path = format!("repos/{repository}/actions/jobs/{job_id}");
        let request = self.request(&auth, Method::GET, &path);
        self.inner
            .transport
            .execute_json("get_workflow_job", &auth.quota_scope, request)
            .await
    }
}
