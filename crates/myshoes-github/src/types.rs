//! Wire types for the subset of the REST API the controller uses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A short-lived token with its expiry (installation or registration).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installation {
    pub id: i64,
    pub account: Account,
    /// `all` or `selected`.
    #[serde(default)]
    pub repository_selection: String,
    #[serde(default)]
    pub suspended_at: Option<DateTime<Utc>>,
}

impl Installation {
    pub fn is_suspended(&self) -> bool {
        self.suspended_at.is_some()
    }

    pub fn has_selected_repositories(&self) -> bool {
        self.repository_selection == "selected"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub full_name: String,
}

/// A self-hosted runner as listed by the hosting service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerInfo {
    pub id: i64,
    pub name: String,
    /// `online` or `offline`.
    pub status: String,
    #[serde(default)]
    pub busy: bool,
}

impl RunnerInfo {
    pub fn is_online(&self) -> bool {
        self.status == "online"
    }
}

/// A workflow run. The raw object is kept so it can be stored as a job
/// payload.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowRun {
    pub id: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub raw: serde_json::Value,
}

impl WorkflowRun {
    pub fn from_value(raw: serde_json::Value) -> Option<Self> {
        #[derive(Deserialize)]
        struct Head {
            id: i64,
            #[serde(default)]
            status: Option<String>,
            created_at: DateTime<Utc>,
        }
        let head: Head = serde_json::from_value(raw.clone()).ok()?;
        Some(Self {
            id: head.id,
            status: head.status.unwrap_or_default(),
            created_at: head.created_at,
            raw,
        })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status.as_str(), "queued" | "pending")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowJob {
    pub id: i64,
    pub run_id: i64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl WorkflowJob {
    pub fn is_queued(&self) -> bool {
        self.status == "queued"
    }
}

// ── List envelopes ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct RunnerPage {
    #[serde(default)]
    pub runners: Vec<RunnerInfo>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RepositoryPage {
    #[serde(default)]
    pub repositories: Vec<Repository>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WorkflowRunPage {
    #[serde(default)]
    pub workflow_runs: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WorkflowJobPage {
    #[serde(default)]
    pub jobs: Vec<WorkflowJob>,
}
