//! myshoesd: the myshoes daemon.
//!
//! Single binary that assembles the controller:
//! - Store (redb)
//! - Hosting client (GitHub App)
//! - Provisioner plugin supervisor
//! - Starter, Reaper, BackFiller and TokenRefresher loops
//! - HTTP API (webhooks, target admin, metrics)
//!
//! # Usage
//!
//! ```text
//! GITHUB_APP_ID=... GITHUB_APP_SECRET=... GITHUB_PRIVATE_KEY_BASE64=... \
//! PLUGIN=/usr/local/bin/shoes-lxd myshoesd
//! ```
//!
//! Every setting is also accepted as a flag; see `myshoesd --help`.

mod config;
mod controller;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(&config);
    controller::run(config).await
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_log_filter()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
