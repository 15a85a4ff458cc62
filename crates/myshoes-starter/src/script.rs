//! Instance setup script.
//!
//! The full script is rendered from `templates/setup.sh`, then gzipped and
//! base64-encoded into a small wrapper that decodes and runs it. Cloud
//! user-data size limits are the reason for the wrapper.

use std::io::Write;

use askama::Template;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::write::GzEncoder;

use myshoes_core::{RUNNER_LABEL, RunnerMode};

use crate::error::{StarterError, StarterResult};

const RUNNER_SERVICE_JS: &str = include_str!("../templates/RunnerService.js");

/// Inputs to the setup script.
#[derive(Debug, Clone)]
pub struct ScriptParams<'a> {
    pub runner_name: &'a str,
    /// Web URL of the repository or organization the runner registers to.
    pub runner_url: &'a str,
    pub registration_token: &'a str,
    pub runner_user: &'a str,
    pub runner_version: &'a str,
    pub mode: RunnerMode,
    pub labels: &'a [String],
}

#[derive(Template)]
#[template(path = "setup.sh", escape = "none")]
struct SetupTemplate<'a> {
    runner_name: &'a str,
    runner_user: &'a str,
    runner_version: &'a str,
    runner_url: &'a str,
    registration_token: &'a str,
    labels: String,
    mode_flag: &'a str,
    runner_service_js: String,
}

/// Labels the runner registers with: `myshoes` first, then the job's
/// labels without duplicates.
pub fn runner_labels(job_labels: &[String]) -> Vec<String> {
    let mut labels = vec![RUNNER_LABEL.to_string()];
    for label in job_labels {
        if !labels.iter().any(|l| l.eq_ignore_ascii_case(label)) {
            labels.push(label.clone());
        }
    }
    labels
}

/// The uncompressed setup script.
pub fn render_setup_script(params: &ScriptParams<'_>) -> StarterResult<String> {
    SetupTemplate {
        runner_name: params.runner_name,
        runner_user: params.runner_user,
        runner_version: params.runner_version,
        runner_url: params.runner_url,
        registration_token: params.registration_token,
        labels: runner_labels(params.labels).join(","),
        mode_flag: params.mode.config_flag(),
        runner_service_js: STANDARD.encode(RUNNER_SERVICE_JS),
    }
    .render()
    .map_err(|e| StarterError::Script(e.to_string()))
}

/// Wrap a script as `gzip → base64 → decode-and-exec`.
pub fn compress_script(script: &str) -> StarterResult<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(script.as_bytes())
        .map_err(|e| StarterError::Script(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| StarterError::Script(e.to_string()))?;

    Ok(format!(
        "#!/bin/bash\nset -e\nMAIN_SCRIPT=\"{}\"\necho \"${{MAIN_SCRIPT}}\" | base64 -d | gzip -dc | bash\n",
        STANDARD.encode(compressed)
    ))
}

/// The script handed to the provisioner.
pub fn build_setup_script(params: &ScriptParams<'_>) -> StarterResult<String> {
    compress_script(&render_setup_script(params)?)
}
