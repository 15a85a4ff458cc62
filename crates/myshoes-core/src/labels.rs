//! `runs-on` label policy.
//!
//! A job is admitted when any label is `myshoes` (case-insensitive) or
//! `self-hosted`, or when the only label is `dependabot`. The first label
//! naming a resource size picks the instance size.

use serde_json::Value;

use crate::types::ResourceType;

pub const RUNNER_LABEL: &str = "myshoes";
pub const SELF_HOSTED_LABEL: &str = "self-hosted";
pub const DEPENDABOT_LABEL: &str = "dependabot";

/// Pull the `runs-on` labels out of a stored event payload.
///
/// Understands `workflow_job` events, back-filled run objects (top-level
/// `labels`) and `check_run` payloads that carry labels.
pub fn extract_labels(payload: &Value) -> Vec<String> {
    let candidates = [
        payload.pointer("/workflow_job/labels"),
        payload.get("labels"),
        payload.pointer("/check_run/labels"),
    ];

    candidates
        .into_iter()
        .flatten()
        .find_map(Value::as_array)
        .map(|labels| {
            labels
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Whether a label set should be served by this controller.
pub fn is_admitted(labels: &[String]) -> bool {
    let targeted = labels
        .iter()
        .any(|l| l.eq_ignore_ascii_case(RUNNER_LABEL) || l == SELF_HOSTED_LABEL);
    let dependabot = labels.len() == 1 && labels[0] == DEPENDABOT_LABEL;
    targeted || dependabot
}

/// First label that names a size, else `fallback`.
pub fn resource_type_from_labels(labels: &[String], fallback: ResourceType) -> ResourceType {
    labels
        .iter()
        .find_map(|l| l.parse::<ResourceType>().ok())
        .unwrap_or(fallback)
}
