//! Domain types persisted by the store.
//!
//! All types are JSON-serialized into redb value columns, so every field
//! here is part of the on-disk format.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

pub type TargetId = Uuid;
pub type JobId = Uuid;
pub type RunnerId = Uuid;

/// Prefix shared by every instance hostname and hosting-service runner name.
pub const RUNNER_NAME_PREFIX: &str = "myshoes-";

/// Deterministic runner name for a runner id. This is the join key with
/// the hosting service's runner list.
pub fn runner_name(id: &RunnerId) -> String {
    format!("{RUNNER_NAME_PREFIX}{id}")
}

// ── Resource size ─────────────────────────────────────────────────

/// Instance size requested from the provisioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ResourceType {
    #[default]
    #[serde(rename = "nano")]
    Nano,
    #[serde(rename = "micro")]
    Micro,
    #[serde(rename = "small")]
    Small,
    #[serde(rename = "medium")]
    Medium,
    #[serde(rename = "large")]
    Large,
    #[serde(rename = "xlarge")]
    XLarge,
    #[serde(rename = "2xlarge")]
    XLarge2,
    #[serde(rename = "3xlarge")]
    XLarge3,
    #[serde(rename = "4xlarge")]
    XLarge4,
}

impl ResourceType {
    pub const ALL: [ResourceType; 9] = [
        ResourceType::Nano,
        ResourceType::Micro,
        ResourceType::Small,
        ResourceType::Medium,
        ResourceType::Large,
        ResourceType::XLarge,
        ResourceType::XLarge2,
        ResourceType::XLarge3,
        ResourceType::XLarge4,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Nano => "nano",
            ResourceType::Micro => "micro",
            ResourceType::Small => "small",
            ResourceType::Medium => "medium",
            ResourceType::Large => "large",
            ResourceType::XLarge => "xlarge",
            ResourceType::XLarge2 => "2xlarge",
            ResourceType::XLarge3 => "3xlarge",
            ResourceType::XLarge4 => "4xlarge",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ResourceType::ALL
            .into_iter()
            .find(|rt| rt.as_str() == wanted)
            .ok_or_else(|| CoreError::UnknownResourceType(s.to_string()))
    }
}

// ── Target ────────────────────────────────────────────────────────

/// Lifecycle status of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Active,
    Running,
    Err,
    Deleted,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Active => "active",
            TargetStatus::Running => "running",
            TargetStatus::Err => "err",
            TargetStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A watched repository or organization and its provisioning policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Target {
    pub id: TargetId,
    /// `owner` or `owner/repo`.
    pub scope: String,
    /// Enterprise host (e.g. `https://github.example.com`); `None` for github.com.
    pub host_domain: Option<String>,
    pub installation_id: i64,
    /// Cached installation token. Sensitive; never rendered by the API.
    pub installation_token: String,
    /// Expiry of `installation_token`.
    pub token_expired_at: DateTime<Utc>,
    pub resource_type: ResourceType,
    /// Runner binary version (`vX.Y.Z` or `latest`); controller default when unset.
    pub runner_version: Option<String>,
    /// OS user inside the instance; controller default when unset.
    pub runner_user: Option<String>,
    /// Location of an alternate provisioner plugin.
    pub provider_url: Option<String>,
    pub status: TargetStatus,
    pub status_description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Target {
    /// Natural key `(host_domain, scope)` used for uniqueness checks.
    pub fn natural_key(&self) -> String {
        natural_key(self.host_domain.as_deref(), &self.scope)
    }

    pub fn is_deleted(&self) -> bool {
        self.status == TargetStatus::Deleted
    }
}

/// Build the natural key for a `(host_domain, scope)` pair.
pub fn natural_key(host_domain: Option<&str>, scope: &str) -> String {
    format!("{}|{}", host_domain.unwrap_or_default(), scope)
}

/// Mutable provisioning parameters of a target.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TargetParams {
    pub resource_type: Option<ResourceType>,
    pub runner_version: Option<String>,
    pub runner_user: Option<String>,
    pub provider_url: Option<String>,
}

// ── Job ───────────────────────────────────────────────────────────

/// A pending provisioning request. Its existence means no runner has been
/// dispatched for the event yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub target_id: TargetId,
    /// `owner/repo` of the repository that queued the workflow.
    pub repository: String,
    /// Raw hosting-service event payload, kept for label extraction.
    pub check_event: serde_json::Value,
    pub host_domain: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        target_id: TargetId,
        repository: impl Into<String>,
        check_event: serde_json::Value,
        host_domain: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            target_id,
            repository: repository.into(),
            check_event,
            host_domain,
            created_at: now,
            updated_at: now,
        }
    }
}

// ── Runner ────────────────────────────────────────────────────────

/// Why a runner was tombstoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeleteReason {
    Completed,
    ReachedHardLimit,
    Gone,
}

impl DeleteReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeleteReason::Completed => "completed",
            DeleteReason::ReachedHardLimit => "reached-hard-limit",
            DeleteReason::Gone => "gone",
        }
    }
}

impl fmt::Display for DeleteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provisioned instance, live or tombstoned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Runner {
    pub id: RunnerId,
    /// Opaque instance id returned by the provisioner.
    pub cloud_id: String,
    /// Provisioner type tag.
    pub shoes_type: String,
    pub ip_address: String,
    pub target_id: TargetId,
    pub resource_type: ResourceType,
    pub runner_version: String,
    pub runner_user: String,
    /// e.g. `https://github.com/octocat/hello-world`.
    pub repository_url: String,
    /// The event payload of the job this runner was started for.
    pub request_webhook: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub reason: Option<DeleteReason>,
}

impl Runner {
    /// Hostname of the instance and name of the hosting-service runner.
    pub fn name(&self) -> String {
        runner_name(&self.id)
    }

    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}
