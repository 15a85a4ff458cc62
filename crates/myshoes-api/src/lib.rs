//! myshoes-api: HTTP surface of the controller.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/github/events` | Webhook deliveries (204, or 400 on a bad signature) |
//! | GET | `/target` | List targets |
//! | POST | `/target` | Create a target, or resurrect a deleted one |
//! | GET | `/target/{id}` | Get a target |
//! | PATCH | `/target/{id}` | Change size, runner user, runner version or plugin |
//! | DELETE | `/target/{id}` | Soft delete (refused while runners are live) |
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/healthz` | Liveness |
//!
//! Errors are JSON objects of the form `{ "error": "<message>" }`.

pub mod error;
pub mod handlers;
pub mod targets;
pub mod webhook;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use myshoes_github::HostingService;
use myshoes_ingest::Ingestor;
use myshoes_metrics::Metrics;
use myshoes_store::Store;

pub use error::{ApiError, ApiResult};
pub use targets::{CreateTarget, TargetView};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: Store,
    pub hosting: Arc<dyn HostingService>,
    pub ingestor: Arc<Ingestor>,
    pub metrics: Metrics,
    /// Enterprise host new targets are created under; `None` for github.com.
    pub host_domain: Option<String>,
}

/// Build the complete router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/github/events", post(webhook::receive_event))
        .route("/target", get(targets::list_targets).post(targets::create_target))
        .route(
            "/target/{id}",
            get(targets::get_target)
                .patch(targets::update_target)
                .delete(targets::delete_target),
        )
        .route("/metrics", get(handlers::prometheus_metrics))
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
}

#[cfg(test)]
impl ApiState {
    pub(crate) const TEST_SECRET: &'static str = "It's a Secret to Everybody";

    pub(crate) fn for_tests(hosting: Arc<myshoes_github::fake::FakeHosting>) -> Self {
        let store = Store::open_in_memory().unwrap();
        let metrics = Metrics::new();
        let ingestor = Ingestor::new(
            store.clone(),
            hosting.clone(),
            metrics.clone(),
            myshoes_core::WebhookMode::WorkflowJob,
            Self::TEST_SECRET,
        );
        Self {
            store,
            hosting,
            ingestor: Arc::new(ingestor),
            metrics,
            host_domain: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use myshoes_github::fake::FakeHosting;
    use myshoes_ingest::sign;
    use serde_json::json;
    use tower::ServiceExt;

    fn router() -> (Router, ApiState) {
        let state = ApiState::for_tests(Arc::new(FakeHosting::new()));
        (build_router(state.clone()), state)
    }

    fn delivery(event: &str, body: &[u8], signature: Option<String>) -> Request<Body> {
        let mut builder = Request::post("/github/events").header(webhook::EVENT_HEADER, event);
        if let Some(sig) = signature {
            builder = builder.header(webhook::SIGNATURE_HEADER, sig);
        }
        builder.body(Body::from(body.to_vec())).unwrap()
    }

    #[tokio::test]
    async fn healthz_route() {
        let (app, _) = router();
        let resp = app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ping_is_acknowledged() {
        let (app, _) = router();
        let body = br#"{"zen":"Keep it logically awesome."}"#;
        let sig = sign(ApiState::TEST_SECRET.as_bytes(), body);
        let resp = app.oneshot(delivery("ping", body, Some(sig))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_with_json_error() {
        let (app, state) = router();
        let body = json!({"action": "queued"}).to_string();
        let resp = app
            .oneshot(delivery("workflow_job", body.as_bytes(), Some("sha256=00".to_string())))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let err: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(err["error"].as_str().unwrap().contains("signature"));
        assert!(state.store.list_jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_event_header_is_bad_request() {
        let (app, _) = router();
        let req = Request::post("/github/events").body(Body::from("{}")).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_target_body_is_bad_request() {
        let (app, _) = router();
        let req = Request::post("/target")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"scope": 7}"#))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
