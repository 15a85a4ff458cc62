//! Instrumented HTTP transport.
//!
//! Every outbound hosting-service call goes through [`InstrumentedTransport`],
//! which records request counts, latency, the in-flight gauge, error class
//! and rate-limit headers before handing the response back.

use std::time::{Duration, Instant};

use http::HeaderMap;
use http::StatusCode;
use myshoes_metrics::Metrics;
use myshoes_metrics::catalog::{
    GITHUB_DURATION_COUNT, GITHUB_DURATION_SUM, GITHUB_ERRORS, GITHUB_INFLIGHT, GITHUB_REQUESTS,
    GITHUB_RATELIMIT_LIMIT, GITHUB_RATELIMIT_REMAINING,
};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::error::{GitHubError, GitHubResult};

const USER_AGENT: &str = concat!("myshoes/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const ACCEPT: &str = "application/vnd.github+json";

#[derive(Clone)]
pub struct InstrumentedTransport {
    http: reqwest::Client,
    metrics: Metrics,
}

impl InstrumentedTransport {
    pub fn new(metrics: Metrics) -> GitHubResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GitHubError::Network(e.to_string()))?;
        Ok(Self { http, metrics })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Send `request`, recording metrics under `endpoint`. Rate-limit
    /// headers are attributed to `quota_scope`.
    pub async fn execute(
        &self,
        endpoint: &'static str,
        quota_scope: &str,
        request: reqwest::RequestBuilder,
    ) -> GitHubResult<reqwest::Response> {
        let _inflight = self.metrics.inflight(&GITHUB_INFLIGHT);
        let started = Instant::now();
        let sent = request.header(http::header::ACCEPT, ACCEPT).send().await;

        let elapsed = started.elapsed();
        let labels = [("endpoint", endpoint)];
        self.metrics
            .add(&GITHUB_DURATION_SUM, &labels, elapsed.as_secs_f64());
        self.metrics.inc(&GITHUB_DURATION_COUNT, &labels);

        let outcome = match sent {
            Err(e) => Err(GitHubError::Network(e.to_string())),
            Ok(response) => {
                let status = response.status();
                self.metrics.inc(
                    &GITHUB_REQUESTS,
                    &[("endpoint", endpoint), ("status", status.as_str())],
                );
                self.record_rate_limit(quota_scope, response.headers());
                trace!(endpoint, %status, elapsed_ms = elapsed.as_millis() as u64, "api call");
                if status.is_success() {
                    Ok(response)
                } else {
                    let headers = response.headers().clone();
                    let body = response.text().await.unwrap_or_default();
                    Err(classify(status, &headers, &body))
                }
            }
        };

        if let Err(e) = &outcome {
            self.metrics.inc(&GITHUB_ERRORS, &[("class", e.class())]);
            debug!(endpoint, error = %e, "api call failed");
        }
        outcome
    }

    /// Send and decode a JSON body.
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        quota_scope: &str,
        request: reqwest::RequestBuilder,
    ) -> GitHubResult<T> {
        let response = self.execute(endpoint, quota_scope, request).await?;
        let decoded = response.json::<T>().await.map_err(|e| {
            let err = GitHubError::Decode(format!("{endpoint}: {e}"));
            self.metrics.inc(&GITHUB_ERRORS, &[("class", err.class())]);
            err
        })?;
        Ok(decoded)
    }

    fn record_rate_limit(&self, quota_scope: &str, headers: &HeaderMap) {
        let labels = [("scope", quota_scope)];
        if let Some(remaining) = header_f64(headers, "x-ratelimit-remaining") {
            self.metrics
                .set(&GITHUB_RATELIMIT_REMAINING, &labels, remaining);
        }
        if let Some(limit) = header_f64(headers, "x-ratelimit-limit") {
            self.metrics.set(&GITHUB_RATELIMIT_LIMIT, &labels, limit);
        }
    }
}

fn header_f64(headers: &HeaderMap, name: &str) -> Option<f64> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

/// Map a non-success response onto an error kind.
pub(crate) fn classify(status: StatusCode, headers: &HeaderMap, body: &str) -> GitHubError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect());
    let exhausted = header_f64(headers, "x-ratelimit-remaining") == Some(0.0);

    match status {
        StatusCode::NOT_FOUND => GitHubError::NotFound(message),
        StatusCode::UNAUTHORIZED => GitHubError::Unauthorized(message),
        StatusCode::TOO_MANY_REQUESTS => GitHubError::RateLimited(message),
        StatusCode::FORBIDDEN if exhausted => GitHubError::RateLimited(message),
        _ => GitHubError::Http {
            status: status.as_u16(),
            message,
        },
    }
}
