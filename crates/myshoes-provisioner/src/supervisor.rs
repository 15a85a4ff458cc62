//! Keeps one plugin process alive for the life of the controller.
//!
//! The supervisor launches the plugin, publishes its client through a
//! watch channel and relaunches it with exponential backoff whenever
//! the process exits or fails to start. Supervision ends on shutdown or
//! once every handle to the supervisor has been dropped.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::error::{ProvisionError, ProvisionResult};
use crate::plugin::{PluginClient, launch};
use crate::service::{Instance, InstanceSpec, Provisioner};

/// How long a plugin has to print its handshake line.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

const INITIAL_RESTART_BACKOFF: Duration = Duration::from_secs(1);
const MAX_RESTART_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Clone)]
enum PluginState {
    Starting,
    Ready(PluginClient),
    Failed(String),
    Stopped,
}

/// A [`Provisioner`] backed by a supervised plugin process.
#[derive(Clone)]
pub struct PluginSupervisor {
    state: watch::Receiver<PluginState>,
    call_timeout: Duration,
}

impl PluginSupervisor {
    /// Spawn the supervision task for the plugin at `path`.
    pub fn start(path: PathBuf, shutdown: watch::Receiver<bool>) -> Self {
        Self::start_with_timeout(path, HANDSHAKE_TIMEOUT, shutdown)
    }

    pub fn start_with_timeout(
        path: PathBuf,
        handshake_timeout: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (tx, rx) = watch::channel(PluginState::Starting);
        tokio::spawn(supervise(path, handshake_timeout, tx, shutdown));
        Self {
            state: rx,
            call_timeout: handshake_timeout,
        }
    }

    /// Resolve once the first launch attempt has finished.
    pub async fn wait_ready(&self) -> ProvisionResult<()> {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|s| !matches!(s, PluginState::Starting))
            .await
            .map_err(|_| ProvisionError::Unavailable("plugin supervisor exited".to_string()))?;
        match &*state {
            PluginState::Ready(_) => Ok(()),
            PluginState::Failed(reason) => Err(ProvisionError::Handshake(reason.clone())),
            PluginState::Stopped | PluginState::Starting => {
                Err(ProvisionError::Unavailable("plugin stopped".to_string()))
            }
        }
    }

    /// The current client, waiting out a restart if one is in progress.
    async fn client(&self) -> ProvisionResult<PluginClient> {
        let mut rx = self.state.clone();
        let wait = rx.wait_for(|s| matches!(s, PluginState::Ready(_) | PluginState::Stopped));
        match timeout(self.call_timeout, wait).await {
            Ok(Ok(state)) => match &*state {
                PluginState::Ready(client) => Ok(client.clone()),
                _ => Err(ProvisionError::Unavailable("plugin stopped".to_string())),
            },
            Ok(Err(_)) => Err(ProvisionError::Unavailable(
                "plugin supervisor exited".to_string(),
            )),
            Err(_) => {
                let reason = match &*self.state.borrow() {
                    PluginState::Failed(reason) => reason.clone(),
                    _ => "plugin not ready".to_string(),
                };
                Err(ProvisionError::Unavailable(reason))
            }
        }
    }
}

#[async_trait]
impl Provisioner for PluginSupervisor {
    async fn add_instance(&self, spec: &InstanceSpec) -> ProvisionResult<Instance> {
        self.client().await?.add_instance(spec).await
    }

    async fn delete_instance(&self, cloud_id: &str, labels: &[String]) -> ProvisionResult<()> {
        self.client().await?.delete_instance(cloud_id, labels).await
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_RESTART_BACKOFF)
}

async fn supervise(
    path: PathBuf,
    handshake_timeout: Duration,
    tx: watch::Sender<PluginState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let plugin = path.display().to_string();
    let mut backoff = INITIAL_RESTART_BACKOFF;

    loop {
        if *shutdown.borrow() {
            tx.send_replace(PluginState::Stopped);
            return;
        }
        if tx.is_closed() {
            info!(%plugin, "plugin supervisor released");
            return;
        }

        match launch(&path, handshake_timeout).await {
            Ok(mut process) => {
                backoff = INITIAL_RESTART_BACKOFF;
                tx.send_replace(PluginState::Ready(process.client()));

                tokio::select! {
                    status = process.wait() => {
                        warn!(%plugin, ?status, "plugin exited, restarting");
                        tx.send_replace(PluginState::Failed(format!("{plugin} exited")));
                    }
                    _ = shutdown.changed() => {
                        process.kill().await;
                        tx.send_replace(PluginState::Stopped);
                        info!(%plugin, "plugin stopped");
                        return;
                    }
                    _ = tx.closed() => {
                        process.kill().await;
                        info!(%plugin, "plugin supervisor released");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(%plugin, error = %e, retry_in = ?backoff, "plugin launch failed");
                tx.send_replace(PluginState::Failed(e.to_string()));
            }
        }

        tokio::select! {
            _ = sleep(backoff) => {}
            _ = shutdown.changed() => {
                tx.send_replace(PluginState::Stopped);
                return;
            }
            _ = tx.closed() => {
                info!(%plugin, "plugin supervisor released");
                return;
            }
        }
        backoff = next_backoff(backoff);
    }
}
