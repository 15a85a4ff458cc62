//! Controller-wide settings shared by several subsystems.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::version::{self, LATEST};

/// Which webhook payload shape is authoritative for enqueueing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WebhookMode {
    #[default]
    CheckRun,
    WorkflowJob,
}

impl WebhookMode {
    /// Value of the `X-GitHub-Event` header this mode listens to.
    pub fn event_name(&self) -> &'static str {
        match self {
            WebhookMode::CheckRun => "check_run",
            WebhookMode::WorkflowJob => "workflow_job",
        }
    }
}

impl fmt::Display for WebhookMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

impl FromStr for WebhookMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "check_run" => Ok(WebhookMode::CheckRun),
            "workflow_job" => Ok(WebhookMode::WorkflowJob),
            other => Err(CoreError::UnknownWebhookMode(other.to_string())),
        }
    }
}

/// Runner settings applied when a target does not declare its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerDefaults {
    pub user: String,
    pub version: String,
}

impl RunnerDefaults {
    pub fn new(user: impl Into<String>, version: impl Into<String>) -> Result<Self, CoreError> {
        let version = version.into();
        version::validate_version(&version)?;
        Ok(Self {
            user: user.into(),
            version,
        })
    }

    pub fn user_for<'a>(&'a self, declared: Option<&'a str>) -> &'a str {
        declared.filter(|u| !u.is_empty()).unwrap_or(self.user.as_str())
    }

    pub fn version_for<'a>(&'a self, declared: Option<&'a str>) -> &'a str {
        declared.filter(|v| !v.is_empty()).unwrap_or(self.version.as_str())
    }
}

impl Default for RunnerDefaults {
    fn default() -> Self {
        Self {
            user: "runner".to_string(),
            version: LATEST.to_string(),
        }
    }
}
