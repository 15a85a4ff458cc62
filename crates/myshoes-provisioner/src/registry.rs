//! Picking the provisioner for a target.
//!
//! Targets without a `provider_url` use the default plugin. Targets with
//! one get their own plugin, opened on first use and kept for the life of
//! the process. Opening one location never holds up lookups of another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{OnceCell, watch};
use tracing::info;

use crate::download::PluginFetcher;
use crate::error::{ProvisionError, ProvisionResult};
use crate::service::Provisioner;
use crate::supervisor::PluginSupervisor;

/// Opens a provisioner for a plugin location.
#[async_trait]
pub trait ProvisionerFactory: Send + Sync {
    async fn open(&self, location: &str) -> ProvisionResult<Arc<dyn Provisioner>>;
}

/// Fetches the plugin and starts a supervisor for it.
pub struct PluginFactory {
    fetcher: PluginFetcher,
    shutdown: watch::Receiver<bool>,
}

impl PluginFactory {
    pub fn new(fetcher: PluginFetcher, shutdown: watch::Receiver<bool>) -> Self {
        Self { fetcher, shutdown }
    }
}

#[async_trait]
impl ProvisionerFactory for PluginFactory {
    async fn open(&self, location: &str) -> ProvisionResult<Arc<dyn Provisioner>> {
        let path = self.fetcher.resolve(location).await?;
        let supervisor = PluginSupervisor::start(path, self.shutdown.clone());
        supervisor.wait_ready().await?;
        info!(%location, "per-target plugin started");
        Ok(Arc::new(supervisor))
    }
}

type Slot = Arc<OnceCell<Arc<dyn Provisioner>>>;

pub struct ProviderSet {
    default: Arc<dyn Provisioner>,
    factory: Option<Arc<dyn ProvisionerFactory>>,
    opened: Mutex<HashMap<String, Slot>>,
}

impl ProviderSet {
    pub fn new(default: Arc<dyn Provisioner>) -> Self {
        Self {
            default,
            factory: None,
            opened: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_factory(mut self, factory: Arc<dyn ProvisionerFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn default_provisioner(&self) -> Arc<dyn Provisioner> {
        self.default.clone()
    }

    /// The provisioner for a target's `provider_url`.
    pub async fn for_target(&self, provider_url: Option<&str>) -> ProvisionResult<Arc<dyn Provisioner>> {
        let Some(location) = provider_url.filter(|u| !u.is_empty()) else {
            return Ok(self.default.clone());
        };

        let factory = self.factory.as_ref().ok_or_else(|| {
            ProvisionError::Unavailable(format!("no plugin loader configured for {location}"))
        })?;
        // Failed opens leave the slot empty so the next lookup retries.
        let slot = self.lock().entry(location.to_string()).or_default().clone();
        let provisioner = slot.get_or_try_init(|| factory.open(location)).await?;
        Ok(provisioner.clone())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.opened.lock().unwrap_or_else(|e| e.into_inner())
    }
}
