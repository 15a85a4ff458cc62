//! Daemon configuration, read from flags or the environment.

use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Parser, ValueEnum};

use myshoes_core::{RunnerDefaults, WebhookMode, host_domain_from_url};
use myshoes_github::AppCredentials;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "myshoesd", about = "Auto-scaling controller for self-hosted CI runners")]
pub struct Config {
    /// Numeric id of the GitHub App.
    #[arg(long, env = "GITHUB_APP_ID")]
    pub github_app_id: i64,

    /// Webhook HMAC secret.
    #[arg(long, env = "GITHUB_APP_SECRET", hide_env_values = true)]
    pub github_app_secret: String,

    /// PKCS#1 private key of the app, base64-encoded.
    #[arg(long, env = "GITHUB_PRIVATE_KEY_BASE64", hide_env_values = true)]
    pub github_private_key_base64: String,

    /// Provisioner plugin: a local path or an http(s) URL.
    #[arg(long, env = "PLUGIN")]
    pub plugin: String,

    /// Directory holding the store file.
    #[arg(long, env = "DATA_DIR", default_value = "/var/lib/myshoes")]
    pub data_dir: PathBuf,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Enterprise host URL.
    #[arg(long, env = "GITHUB_URL", default_value = "https://github.com")]
    pub github_url: String,

    #[arg(long, env = "RUNNER_USER", default_value = "runner")]
    pub runner_user: String,

    /// `latest` or an exact tag such as `v2.305.0`.
    #[arg(long, env = "RUNNER_VERSION", default_value = "latest")]
    pub runner_version: String,

    /// Concurrent provisioning workers.
    #[arg(long, env = "MAX_CONNECTIONS_TO_BACKEND", default_value_t = 50)]
    pub max_connections_to_backend: usize,

    /// Concurrent DeleteInstance calls.
    #[arg(long, env = "MAX_CONCURRENCY_DELETING", default_value_t = 1)]
    pub max_concurrency_deleting: usize,

    /// `check_run` or `workflow_job`.
    #[arg(long, env = "MODE_WEBHOOK_TYPE", default_value = "check_run")]
    pub mode_webhook_type: WebhookMode,

    /// Wait for new runners to register before counting a job as started.
    #[arg(long, env = "STRICT", default_value_t = true, action = ArgAction::Set)]
    pub strict: bool,

    #[arg(long, env = "DEBUG", default_value_t = false, action = ArgAction::Set)]
    pub debug: bool,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

impl Config {
    pub fn credentials(&self) -> anyhow::Result<AppCredentials> {
        AppCredentials::from_base64_pem(self.github_app_id, &self.github_private_key_base64)
            .context("GITHUB_PRIVATE_KEY_BASE64 is not a valid RSA private key")
    }

    pub fn runner_defaults(&self) -> anyhow::Result<RunnerDefaults> {
        RunnerDefaults::new(&self.runner_user, &self.runner_version)
            .context("invalid RUNNER_USER or RUNNER_VERSION")
    }

    /// `None` for github.com.
    pub fn host_domain(&self) -> Option<String> {
        host_domain_from_url(&self.github_url)
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("myshoes.redb")
    }

    pub fn plugin_cache_dir(&self) -> PathBuf {
        self.data_dir.join("plugins")
    }

    pub fn default_log_filter(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "info,myshoes=info"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 9] = [
        "myshoesd",
        "--github-app-id",
        "1234",
        "--github-app-secret",
        "s3cret",
        "--github-private-key-base64",
        "bm90LWEta2V5",
        "--plugin",
        "/usr/local/bin/shoes-lxd",
    ];

    fn parse(extra: &[&str]) -> Result<Config, clap::Error> {
        Config::try_parse_from(REQUIRED.iter().chain(extra).copied())
    }

    #[test]
    fn defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.max_connections_to_backend, 50);
        assert_eq!(config.max_concurrency_deleting, 1);
        assert_eq!(config.mode_webhook_type, WebhookMode::CheckRun);
        assert!(config.strict);
        assert!(!config.debug);
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.host_domain(), None);
        assert_eq!(config.store_path(), PathBuf::from("/var/lib/myshoes/myshoes.redb"));
        assert_eq!(config.default_log_filter(), "info,myshoes=info");
    }

    #[test]
    fn overrides() {
        let config = parse(&[
            "--mode-webhook-type",
            "workflow_job",
            "--strict",
            "false",
            "--debug",
            "true",
            "--log-format",
            "json",
            "--github-url",
            "https://github.example.com",
        ])
        .unwrap();
        assert_eq!(config.mode_webhook_type, WebhookMode::WorkflowJob);
        assert!(!config.strict);
        assert_eq!(config.default_log_filter(), "debug");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.host_domain().as_deref(), Some("https://github.example.com"));
    }

    #[test]
    fn rejects_unknown_webhook_mode() {
        assert!(parse(&["--mode-webhook-type", "push"]).is_err());
    }

    #[test]
    fn missing_required_key_fails() {
        assert!(Config::try_parse_from(["myshoesd", "--plugin", "x"]).is_err());
    }

    #[test]
    fn validates_runner_version_and_key() {
        let config = parse(&["--runner-version", "2.305.0"]).unwrap();
        assert!(config.runner_defaults().is_err());
        let config = parse(&["--runner-version", "v2.305.0"]).unwrap();
        assert!(config.runner_defaults().is_ok());
        assert!(config.credentials().is_err());
    }
}
