//! End-to-end controller scenarios.
//!
//! Drives the HTTP router with `oneshot` requests and runs the starter
//! against in-memory fakes of the hosting service and the provisioner.

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;

use myshoes_api::{ApiState, build_router};
use myshoes_core::{ResourceType, WebhookMode};
use myshoes_github::fake::FakeHosting;
use myshoes_ingest::{Ingestor, sign};
use myshoes_metrics::Metrics;
use myshoes_provisioner::ProviderSet;
use myshoes_provisioner::fake::FakeProvisioner;
use myshoes_starter::{Starter, StarterConfig};
use myshoes_store::Store;

const SECRET: &[u8] = b"webhook-secret";

struct Controller {
    store: Store,
    hosting: Arc<FakeHosting>,
    provisioner: Arc<FakeProvisioner>,
    metrics: Metrics,
    router: Router,
}

impl Controller {
    fn new(mode: WebhookMode) -> Self {
        let store = Store::open_in_memory().unwrap();
        let hosting = Arc::new(FakeHosting::new());
        hosting.add_installation("octocat", 42);
        let metrics = Metrics::new();
        let ingestor = Ingestor::new(store.clone(), hosting.clone(), metrics.clone(), mode, SECRET);
        let router = build_router(ApiState {
            store: store.clone(),
            hosting: hosting.clone(),
            ingestor: Arc::new(ingestor),
            metrics: metrics.clone(),
            host_domain: None,
        });
        Self {
            store,
            hosting,
            provisioner: Arc::new(FakeProvisioner::new()),
            metrics,
            router,
        }
    }

    fn starter(&self) -> Starter {
        Starter::new(
            self.store.clone(),
            self.hosting.clone(),
            Arc::new(ProviderSet::new(self.provisioner.clone())),
            self.metrics.clone(),
            StarterConfig {
                strict: false,
                ..StarterConfig::default()
            },
        )
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    async fn json(&self, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(req).await
    }

    async fn deliver(&self, event: &str, payload: Value) -> StatusCode {
        let body = payload.to_string();
        let req = Request::post("/github/events")
            .header("x-github-event", event)
            .header("x-hub-signature-256", sign(SECRET, body.as_bytes()))
            .body(Body::from(body))
            .unwrap();
        self.send(req).await.0
    }

    async fn create_target(&self, body: Value) -> Value {
        let (status, target) = self.json("POST", "/target", body).await;
        assert_eq!(status, StatusCode::CREATED, "{target}");
        target
    }
}

fn check_run(labels: &[&str]) -> Value {
    json!({
        "action": "created",
        "check_run": {"id": 4242, "status": "queued", "labels": labels},
        "repository": {
            "full_name": "octocat/hello-world",
            "html_url": "https://github.com/octocat/hello-world"
        }
    })
}

#[tokio::test]
async fn webhook_to_runner_happy_path() {
    let c = Controller::new(WebhookMode::CheckRun);
    let target = c
        .create_target(json!({"scope": "octocat/hello-world", "resource_type": "nano"}))
        .await;

    let status = c.deliver("check_run", check_run(&["myshoes", "self-hosted"])).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let jobs = c.store.list_jobs().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].target_id.to_string(), target["id"].as_str().unwrap());

    let starter = c.starter();
    assert_eq!(starter.tick().await.unwrap().spawned, 1);
    starter.wait_idle().await;

    let added = c.provisioner.added();
    assert_eq!(added.len(), 1);
    assert!(added[0].runner_name.starts_with("myshoes-"));

    let runners = c.store.list_runners().unwrap();
    assert_eq!(runners.len(), 1);
    assert_eq!(runners[0].name(), added[0].runner_name);
    assert_eq!(runners[0].resource_type, ResourceType::Nano);
    assert!(runners[0].is_live());
    assert!(c.store.list_jobs().unwrap().is_empty());
}

#[tokio::test]
async fn foreign_labels_are_acknowledged_but_not_queued() {
    let c = Controller::new(WebhookMode::CheckRun);
    c.create_target(json!({"scope": "octocat/hello-world", "resource_type": "nano"}))
        .await;

    let status = c.deliver("check_run", check_run(&["ubuntu-latest"])).await;

    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(c.store.list_jobs().unwrap().is_empty());
    let starter = c.starter();
    starter.tick().await.unwrap();
    starter.wait_idle().await;
    assert_eq!(c.provisioner.add_attempts(), 0);
}

#[tokio::test]
async fn recreating_a_deleted_target_keeps_its_id() {
    let c = Controller::new(WebhookMode::WorkflowJob);
    let first = c
        .create_target(json!({"scope": "octocat", "resource_type": "small"}))
        .await;
    let id = first["id"].as_str().unwrap().to_string();

    let (status, _) = c.send(Request::delete(format!("/target/{id}")).body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = c.send(Request::get(format!("/target/{id}")).body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let second = c
        .create_target(json!({
            "scope": "octocat",
            "resource_type": "large",
            "provider_url": "https://plugins.example.com/shoes-aws"
        }))
        .await;
    assert_eq!(second["id"], first["id"]);
    assert_eq!(second["status"], "active");
    assert_eq!(second["resource_type"], "large");
    assert_eq!(second["provider_url"], "https://plugins.example.com/shoes-aws");
}

#[tokio::test]
async fn duplicate_target_is_bad_request() {
    let c = Controller::new(WebhookMode::CheckRun);
    c.create_target(json!({"scope": "octocat/hello-world"})).await;

    let (status, body) = c
        .json("POST", "/target", json!({"scope": "octocat/hello-world"}))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("already exists"));
}

#[tokio::test]
async fn target_with_live_runners_cannot_be_deleted() {
    let c = Controller::new(WebhookMode::CheckRun);
    let target = c.create_target(json!({"scope": "octocat/hello-world"})).await;
    c.deliver("check_run", check_run(&["myshoes"])).await;
    let starter = c.starter();
    starter.tick().await.unwrap();
    starter.wait_idle().await;

    let id = target["id"].as_str().unwrap();
    let (status, body) = c
        .send(Request::delete(format!("/target/{id}")).body(Body::empty()).unwrap())
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("live runners"));
}

#[tokio::test]
async fn patch_changes_provisioning_parameters() {
    let c = Controller::new(WebhookMode::CheckRun);
    let target = c.create_target(json!({"scope": "octocat/hello-world"})).await;
    let uri = format!("/target/{}", target["id"].as_str().unwrap());

    let (status, updated) = c
        .json("PATCH", &uri, json!({"resource_type": "xlarge", "runner_user": "ci"}))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["resource_type"], "xlarge");
    assert_eq!(updated["runner_user"], "ci");

    let (status, _) = c.json("PATCH", &uri, json!({"runner_version": "latest-ish"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn metrics_reflect_webhook_traffic() {
    let c = Controller::new(WebhookMode::CheckRun);
    c.create_target(json!({"scope": "octocat/hello-world"})).await;
    c.deliver("check_run", check_run(&["myshoes"])).await;

    let resp = c
        .router
        .clone()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("myshoes_webhook_received_total{event=\"check_run\"} 1"));
    assert!(text.contains("myshoes_jobs_enqueued_total{source=\"webhook\"} 1"));
}
