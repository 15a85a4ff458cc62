//! Webhook payload parsing.
//!
//! Only the fields the controller acts on are decoded; the raw payload is
//! kept alongside so it can be stored as the job's event.

use serde::Deserialize;
use serde_json::Value;

use myshoes_core::parse_repository_url;

use crate::error::{IngestError, IngestResult};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RepositoryRef {
    /// `owner/repo`.
    pub full_name: String,
    #[serde(default)]
    pub html_url: String,
}

impl RepositoryRef {
    pub fn owner(&self) -> &str {
        self.full_name.split('/').next().unwrap_or_default()
    }

    /// Enterprise host of the repository; `None` for github.com.
    pub fn host_domain(&self) -> Option<String> {
        parse_repository_url(&self.html_url)
            .ok()
            .and_then(|(host, _)| host)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    Ping,
    CheckRun {
        action: String,
        check_run_id: i64,
        /// Present only when the sender attached them.
        labels: Option<Vec<String>>,
        repository: RepositoryRef,
    },
    WorkflowJob {
        action: String,
        job_id: i64,
        labels: Vec<String>,
        repository: RepositoryRef,
    },
    Other(String),
}

#[derive(Deserialize)]
struct CheckRunPayload {
    action: String,
    check_run: CheckRunBody,
    repository: RepositoryRef,
}

#[derive(Deserialize)]
struct CheckRunBody {
    id: i64,
    #[serde(default)]
    labels: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct WorkflowJobPayload {
    action: String,
    workflow_job: WorkflowJobBody,
    repository: RepositoryRef,
}

#[derive(Deserialize)]
struct WorkflowJobBody {
    id: i64,
    #[serde(default)]
    labels: Vec<String>,
}

/// Decode a delivery given its `X-GitHub-Event` name.
pub fn parse_event(name: &str, body: &[u8]) -> IngestResult<(WebhookEvent, Value)> {
    let raw: Value =
        serde_json::from_slice(body).map_err(|e| IngestError::InvalidPayload(e.to_string()))?;
    let invalid = |e: serde_json::Error| IngestError::InvalidPayload(format!("{name}: {e}"));

    let event = match name {
        "ping" => WebhookEvent::Ping,
        "check_run" => {
            let p: CheckRunPayload = serde_json::from_value(raw.clone()).map_err(invalid)?;
            WebhookEvent::CheckRun {
                action: p.action,
                check_run_id: p.check_run.id,
                labels: p.check_run.labels,
                repository: p.repository,
            }
        }
        "workflow_job" => {
            let p: WorkflowJobPayload = serde_json::from_value(raw.clone()).map_err(invalid)?;
            WebhookEvent::WorkflowJob {
                action: p.action,
                job_id: p.workflow_job.id,
                labels: p.workflow_job.labels,
                repository: p.repository,
            }
        }
        other => WebhookEvent::Other(other.to_string()),
    };
    Ok((event, raw))
}
