//! Controller assembly: opens the store, starts the plugin, spawns the
//! background loops and serves the API until a shutdown signal.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use myshoes_api::{ApiState, build_router};
use myshoes_github::{GitHubClient, HostingService, TokenRefresher};
use myshoes_ingest::{BackFiller, Ingestor};
use myshoes_metrics::Metrics;
use myshoes_provisioner::{PluginFactory, PluginFetcher, PluginSupervisor, ProviderSet};
use myshoes_reaper::{Reaper, ReaperConfig};
use myshoes_starter::{Starter, StarterConfig};
use myshoes_store::Store;

use crate::config::Config;

/// Time workers get to unwind after shutdown.
pub const DRAIN: Duration = Duration::from_secs(30);

pub async fn run(config: Config) -> anyhow::Result<()> {
    info!(
        port = config.port,
        mode = %config.mode_webhook_type,
        strict = config.strict,
        "myshoes controller starting"
    );

    let credentials = config.credentials()?;
    let runner_defaults = config.runner_defaults()?;
    let host_domain = config.host_domain();

    // ── Store ──────────────────────────────────────────────────────

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create {}", config.data_dir.display()))?;
    let store_path = config.store_path();
    let store = Store::open(&store_path).context("failed to open store")?;
    info!(path = ?store_path, "store opened");

    let metrics = Metrics::new();
    let hosting: Arc<dyn HostingService> = Arc::new(
        GitHubClient::new(credentials, metrics.clone()).context("failed to build hosting client")?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Provisioner ────────────────────────────────────────────────

    let fetcher = PluginFetcher::new(config.plugin_cache_dir());
    let plugin_path = fetcher
        .resolve(&config.plugin)
        .await
        .context("failed to fetch provisioner plugin")?;
    let supervisor = PluginSupervisor::start(plugin_path, shutdown_rx.clone());
    supervisor
        .wait_ready()
        .await
        .context("provisioner plugin did not become ready")?;
    let providers = Arc::new(
        ProviderSet::new(Arc::new(supervisor))
            .with_factory(Arc::new(PluginFactory::new(fetcher, shutdown_rx.clone()))),
    );

    // ── Background loops ───────────────────────────────────────────

    let starter = Starter::new(
        store.clone(),
        hosting.clone(),
        providers.clone(),
        metrics.clone(),
        StarterConfig {
            max_running: config.max_connections_to_backend,
            strict: config.strict,
            runner_defaults,
            ..StarterConfig::default()
        },
    );
    let reaper = Reaper::new(
        store.clone(),
        hosting.clone(),
        providers,
        metrics.clone(),
        ReaperConfig {
            max_concurrency_deleting: config.max_concurrency_deleting,
            ..ReaperConfig::default()
        },
    );
    let backfiller = BackFiller::new(store.clone(), hosting.clone(), metrics.clone());
    let refresher = TokenRefresher::new(store.clone(), hosting.clone(), metrics.clone());

    let handles: Vec<JoinHandle<()>> = vec![
        tokio::spawn({
            let shutdown = shutdown_rx.clone();
            async move { starter.run(shutdown, DRAIN).await }
        }),
        tokio::spawn({
            let shutdown = shutdown_rx.clone();
            async move { reaper.run(shutdown, DRAIN).await }
        }),
        tokio::spawn({
            let shutdown = shutdown_rx.clone();
            async move { backfiller.run(shutdown).await }
        }),
        tokio::spawn({
            let shutdown = shutdown_rx.clone();
            async move { refresher.run(shutdown).await }
        }),
    ];

    // ── API server ─────────────────────────────────────────────────

    let ingestor = Ingestor::new(
        store.clone(),
        hosting.clone(),
        metrics.clone(),
        config.mode_webhook_type,
        config.github_app_secret.clone(),
    );
    let router = build_router(ApiState {
        store,
        hosting,
        ingestor: Arc::new(ingestor),
        metrics,
        host_domain,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "background task ended abnormally");
        }
    }
    info!("myshoes controller stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
