//! Webhook ingestion: verify, parse, admit, resolve, enqueue.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use myshoes_core::{Job, JobId, Target, WebhookMode, extract_labels, is_admitted};
use myshoes_github::HostingService;
use myshoes_metrics::Metrics;
use myshoes_metrics::catalog::{JOBS_ENQUEUED, WEBHOOK_RECEIVED, WEBHOOK_REJECTED};
use myshoes_store::Store;

use crate::error::IngestResult;
use crate::event::{RepositoryRef, WebhookEvent, parse_event};
use crate::resolve::resolve_target;
use crate::signature::verify_signature;

/// Why a delivery was dropped without enqueueing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// `runs-on` labels do not ask for this controller.
    Labels,
    /// No live target covers the repository.
    Target,
    /// The payload shape is not the configured webhook mode.
    Mode,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::Labels => "labels",
            Rejection::Target => "target",
            Rejection::Mode => "mode",
        }
    }
}

/// Admission decision for a label set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected,
}

impl Admission {
    pub fn of(labels: &[String]) -> Self {
        if is_admitted(labels) {
            Admission::Admitted
        } else {
            Admission::Rejected
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Enqueued(JobId),
    Rejected(Rejection),
    /// Pings, other actions and events the controller does not act on.
    Ignored,
}

pub struct Ingestor {
    store: Store,
    hosting: Arc<dyn HostingService>,
    metrics: Metrics,
    mode: WebhookMode,
    secret: Vec<u8>,
}

impl Ingestor {
    pub fn new(
        store: Store,
        hosting: Arc<dyn HostingService>,
        metrics: Metrics,
        mode: WebhookMode,
        secret: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            store,
            hosting,
            metrics,
            mode,
            secret: secret.into(),
        }
    }

    /// Handle one delivery.
    pub async fn handle(
        &self,
        event_name: &str,
        signature: Option<&str>,
        body: &[u8],
    ) -> IngestResult<Outcome> {
        verify_signature(&self.secret, body, signature)?;
        self.metrics.inc(&WEBHOOK_RECEIVED, &[("event", event_name)]);

        let (event, raw) = parse_event(event_name, body)?;
        match event {
            WebhookEvent::Ping => {
                info!("webhook ping received");
                Ok(Outcome::Ignored)
            }
            WebhookEvent::Other(name) => {
                debug!(event = %name, "ignoring webhook event");
                Ok(Outcome::Ignored)
            }
            WebhookEvent::CheckRun { .. } | WebhookEvent::WorkflowJob { .. }
                if event_name != self.mode.event_name() =>
            {
                debug!(event = event_name, mode = %self.mode, "event shape not enabled");
                Ok(self.reject(Rejection::Mode))
            }
            WebhookEvent::WorkflowJob {
                action,
                job_id,
                labels,
                repository,
            } => {
                if action != "queued" {
                    return Ok(Outcome::Ignored);
                }
                if Admission::of(&labels) == Admission::Rejected {
                    debug!(job_id, ?labels, "labels not for this controller");
                    return Ok(self.reject(Rejection::Labels));
                }
                let Some(target) = self.target_for(&repository)? else {
                    return Ok(self.reject(Rejection::Target));
                };
                self.enqueue(&target, &repository, raw)
            }
            WebhookEvent::CheckRun {
                action,
                check_run_id,
                labels,
                repository,
            } => {
                if action != "created" {
                    return Ok(Outcome::Ignored);
                }
                let Some(target) = self.target_for(&repository)? else {
                    return Ok(self.reject(Rejection::Target));
                };
                let labels = match labels {
                    Some(labels) => labels,
                    None => self.check_run_labels(&target, &repository, check_run_id).await?,
                };
                if Admission::of(&labels) == Admission::Rejected {
                    debug!(check_run_id, ?labels, "labels not for this controller");
                    return Ok(self.reject(Rejection::Labels));
                }
                self.enqueue(&target, &repository, with_labels(raw, &labels))
            }
        }
    }

    fn target_for(&self, repository: &RepositoryRef) -> IngestResult<Option<Target>> {
        let host = repository.host_domain();
        let target = resolve_target(&self.store, host.as_deref(), &repository.full_name)?;
        if target.is_none() {
            debug!(repository = %repository.full_name, "no target for repository");
        }
        Ok(target)
    }

    /// Labels of the workflow job behind a check run. Check runs that are
    /// not workflow jobs have none.
    async fn check_run_labels(
        &self,
        target: &Target,
        repository: &RepositoryRef,
        check_run_id: i64,
    ) -> IngestResult<Vec<String>> {
        match self
            .hosting
            .get_workflow_job(target, &repository.full_name, check_run_id)
            .await
        {
            Ok(job) => Ok(job.labels),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn enqueue(
        &self,
        target: &Target,
        repository: &RepositoryRef,
        payload: Value,
    ) -> IngestResult<Outcome> {
        let job = Job::new(
            target.id,
            repository.full_name.clone(),
            payload,
            repository.host_domain(),
        );
        self.store.enqueue_job(&job)?;
        self.metrics.inc(&JOBS_ENQUEUED, &[("source", "webhook")]);
        info!(
            job_id = %job.id,
            target_id = %target.id,
            repository = %job.repository,
            labels = ?extract_labels(&job.check_event),
            "job enqueued"
        );
        Ok(Outcome::Enqueued(job.id))
    }

    fn reject(&self, reason: Rejection) -> Outcome {
        self.metrics
            .inc(&WEBHOOK_REJECTED, &[("reason", reason.as_str())]);
        Outcome::Rejected(reason)
    }
}

/// Attach `labels` at the top level so downstream label extraction finds them.
fn with_labels(mut payload: Value, labels: &[String]) -> Value {
    if let Value::Object(map) = &mut payload {
        map.insert("labels".to_string(), Value::from(labels.to_vec()));
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use crate::signature::sign;
    use crate::tests_support::target;
    use myshoes_github::fake::FakeHosting;
    use myshoes_github::WorkflowJob;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const SECRET: &[u8] = b"webhook-secret";

    fn ingestor(store: &Store, hosting: Arc<FakeHosting>, mode: WebhookMode) -> (Ingestor, Metrics) {
        let metrics = Metrics::new();
        let ingestor = Ingestor::new(store.clone(), hosting, metrics.clone(), mode, SECRET);
        (ingestor, metrics)
    }

    fn workflow_job(labels: &[&str]) -> Vec<u8> {
        json!({
            "action": "queued",
            "workflow_job": {"id": 42, "run_id": 7, "labels": labels},
            "repository": {"full_name": "octocat/hello-world", "html_url": "https://github.com/octocat/hello-world"}
        })
        .to_string()
        .into_bytes()
    }

    fn check_run(id: i64) -> Vec<u8> {
        json!({
            "action": "created",
            "check_run": {"id": id, "status": "queued"},
            "repository": {"full_name": "octocat/hello-world", "html_url": "https://github.com/octocat/hello-world"}
        })
        .to_string()
        .into_bytes()
    }

    async fn deliver(ingestor: &Ingestor, event: &str, body: &[u8]) -> IngestResult<Outcome> {
        ingestor.handle(event, Some(&sign(SECRET, body)), body).await
    }

    #[tokio::test]
    async fn admitted_workflow_job_is_enqueued() {
        let store = Store::open_in_memory().unwrap();
        let t = store.create_target(&target("octocat/hello-world")).unwrap();
        let (ingestor, metrics) =
            ingestor(&store, Arc::new(FakeHosting::new()), WebhookMode::WorkflowJob);

        let outcome = deliver(&ingestor, "workflow_job", &workflow_job(&["self-hosted", "large"]))
            .await
            .unwrap();

        let jobs = store.list_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(outcome, Outcome::Enqueued(jobs[0].id));
        assert_eq!(jobs[0].target_id, t.id);
        assert_eq!(jobs[0].repository, "octocat/hello-world");
        assert_eq!(extract_labels(&jobs[0].check_event), vec!["self-hosted", "large"]);
        assert_eq!(metrics.get(&JOBS_ENQUEUED, &[("source", "webhook")]), 1.0);
    }

    #[tokio::test]
    async fn foreign_labels_are_dropped() {
        let store = Store::open_in_memory().unwrap();
        store.create_target(&target("octocat/hello-world")).unwrap();
        let (ingestor, metrics) =
            ingestor(&store, Arc::new(FakeHosting::new()), WebhookMode::WorkflowJob);

        let outcome = deliver(&ingestor, "workflow_job", &workflow_job(&["ubuntu-latest"]))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Rejected(Rejection::Labels));
        assert!(store.list_jobs().unwrap().is_empty());
        assert_eq!(metrics.get(&WEBHOOK_REJECTED, &[("reason", "labels")]), 1.0);
    }

    #[tokio::test]
    async fn missing_or_deleted_target_is_dropped() {
        let store = Store::open_in_memory().unwrap();
        let (ingestor, _) =
            ingestor(&store, Arc::new(FakeHosting::new()), WebhookMode::WorkflowJob);
        let body = workflow_job(&["myshoes"]);

        assert_eq!(
            deliver(&ingestor, "workflow_job", &body).await.unwrap(),
            Outcome::Rejected(Rejection::Target)
        );

        let t = store.create_target(&target("octocat")).unwrap();
        store.delete_target(&t.id).unwrap();
        assert_eq!(
            deliver(&ingestor, "workflow_job", &body).await.unwrap(),
            Outcome::Rejected(Rejection::Target)
        );
        assert!(store.list_jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn check_run_labels_come_from_the_workflow_job() {
        let store = Store::open_in_memory().unwrap();
        store.create_target(&target("octocat")).unwrap();
        let hosting = Arc::new(FakeHosting::new());
        hosting.add_job(WorkflowJob {
            id: 501,
            run_id: 9,
            status: "queued".into(),
            labels: vec!["myshoes".into(), "self-hosted".into()],
        });
        let (ingestor, _) = ingestor(&store, hosting, WebhookMode::CheckRun);

        let outcome = deliver(&ingestor, "check_run", &check_run(501)).await.unwrap();
        assert!(matches!(outcome, Outcome::Enqueued(_)));
        let jobs = store.list_jobs().unwrap();
        assert_eq!(extract_labels(&jobs[0].check_event), vec!["myshoes", "self-hosted"]);

        // A check run from another app has no workflow job behind it.
        let outcome = deliver(&ingestor, "check_run", &check_run(999)).await.unwrap();
        assert_eq!(outcome, Outcome::Rejected(Rejection::Labels));
    }

    #[tokio::test]
    async fn only_the_configured_shape_enqueues() {
        let store = Store::open_in_memory().unwrap();
        store.create_target(&target("octocat/hello-world")).unwrap();
        let (ingestor, metrics) = ingestor(&store, Arc::new(FakeHosting::new()), WebhookMode::CheckRun);

        let outcome = deliver(&ingestor, "workflow_job", &workflow_job(&["myshoes"]))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Rejected(Rejection::Mode));
        assert_eq!(metrics.get(&WEBHOOK_REJECTED, &[("reason", "mode")]), 1.0);
        assert!(store.list_jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn other_actions_and_pings_are_ignored() {
        let store = Store::open_in_memory().unwrap();
        store.create_target(&target("octocat/hello-world")).unwrap();
        let (ingestor, metrics) =
            ingestor(&store, Arc::new(FakeHosting::new()), WebhookMode::WorkflowJob);

        let completed = String::from_utf8(workflow_job(&["myshoes"]))
            .unwrap()
            .replace("\"queued\"", "\"completed\"");
        assert_eq!(
            deliver(&ingestor, "workflow_job", completed.as_bytes()).await.unwrap(),
            Outcome::Ignored
        );
        assert_eq!(
            deliver(&ingestor, "ping", br#"{"zen":"Keep it logically awesome."}"#)
                .await
                .unwrap(),
            Outcome::Ignored
        );
        assert_eq!(metrics.get(&WEBHOOK_RECEIVED, &[("event", "ping")]), 1.0);
        assert!(store.list_jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn bad_signature_is_a_client_error() {
        let store = Store::open_in_memory().unwrap();
        let (ingestor, metrics) =
            ingestor(&store, Arc::new(FakeHosting::new()), WebhookMode::WorkflowJob);
        let body = workflow_job(&["myshoes"]);

        let err = ingestor
            .handle("workflow_job", Some("sha256=00"), &body)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::BadSignature));
        assert!(err.is_client_error());
        assert_eq!(metrics.get(&WEBHOOK_RECEIVED, &[("event", "workflow_job")]), 0.0);
    }
}
