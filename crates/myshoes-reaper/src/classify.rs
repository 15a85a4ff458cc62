//! Per-runner termination decision.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use myshoes_core::{DeleteReason, Runner, RunnerMode};
use myshoes_github::RunnerInfo;

/// Age thresholds. Both comparisons are strict.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Grace period before an offline or unlisted runner is reclaimed.
    pub must_running_time: TimeDelta,
    /// Hard cap on how long an idle online runner may live.
    pub must_goal_time: TimeDelta,
}

impl Limits {
    pub fn new(must_running_time: Duration, must_goal_time: Duration) -> Self {
        Self {
            must_running_time: TimeDelta::from_std(must_running_time).unwrap_or(TimeDelta::MAX),
            must_goal_time: TimeDelta::from_std(must_goal_time).unwrap_or(TimeDelta::MAX),
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            must_running_time: TimeDelta::minutes(5),
            must_goal_time: TimeDelta::hours(6),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    /// `hosting_id` is set when the hosting service still lists the runner.
    Delete {
        reason: DeleteReason,
        hosting_id: Option<i64>,
    },
}

/// Termination mode recorded for the runner. Unparseable versions count
/// as ephemeral.
pub fn runner_mode(runner: &Runner) -> RunnerMode {
    RunnerMode::from_version(&runner.runner_version).unwrap_or(RunnerMode::Ephemeral)
}

/// Decide the fate of a live runner given its hosting-service entry.
///
/// Ephemeral and once runners share the same triggers: an ephemeral
/// runner deregisters itself, a once runner goes offline, and either
/// counts as finished after the grace period.
pub fn classify(
    runner: &Runner,
    listed: Option<&RunnerInfo>,
    now: DateTime<Utc>,
    limits: &Limits,
) -> Verdict {
    let age = now - runner.created_at;
    match listed {
        None if age > limits.must_running_time => Verdict::Delete {
            reason: DeleteReason::Completed,
            hosting_id: None,
        },
        Some(info) if info.is_online() && age > limits.must_goal_time => Verdict::Delete {
            reason: DeleteReason::ReachedHardLimit,
            hosting_id: Some(info.id),
        },
        Some(info) if !info.is_online() && age > limits.must_running_time => Verdict::Delete {
            reason: DeleteReason::Completed,
            hosting_id: Some(info.id),
        },
        _ => Verdict::Keep,
    }
}
