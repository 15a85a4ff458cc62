//! Launching a provider plugin and talking to it.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use tracing::{debug, info};

use crate::error::{ProvisionError, ProvisionResult};
use crate::handshake::{APP_PROTOCOL_VERSION, Handshake, MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE, Network};
use crate::health::health_check_response::ServingStatus;
use crate::health::health_client::HealthClient;
use crate::health::HealthCheckRequest;
use crate::proto;
use crate::proto::shoes_client::ShoesClient;
use crate::service::{
    Instance, InstanceSpec, Provisioner, resource_type_from_wire, resource_type_to_wire,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Health-check service name plugins register as serving.
const HEALTH_SERVICE: &str = "plugin";

/// gRPC client for a connected plugin.
#[derive(Clone)]
pub struct PluginClient {
    inner: ShoesClient<Channel>,
}

impl PluginClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: ShoesClient::new(channel),
        }
    }
}

#[async_trait]
impl Provisioner for PluginClient {
    async fn add_instance(&self, spec: &InstanceSpec) -> ProvisionResult<Instance> {
        let response = self
            .inner
            .clone()
            .add_instance(proto::AddInstanceRequest {
                runner_name: spec.runner_name.clone(),
                setup_script: spec.setup_script.clone(),
                resource_type: resource_type_to_wire(spec.resource_type),
                labels: spec.labels.clone(),
            })
            .await?
            .into_inner();

        Ok(Instance {
            cloud_id: response.cloud_id,
            shoes_type: response.shoes_type,
            ip_address: response.ip_address,
            resource_type: resource_type_from_wire(response.resource_type)
                .unwrap_or(spec.resource_type),
        })
    }

    async fn delete_instance(&self, cloud_id: &str, labels: &[String]) -> ProvisionResult<()> {
        self.inner
            .clone()
            .delete_instance(proto::DeleteInstanceRequest {
                cloud_id: cloud_id.to_string(),
                labels: labels.to_vec(),
            })
            .await?;
        Ok(())
    }
}

/// A running plugin child process with its connected client.
///
/// Dropping it kills the process.
pub struct PluginProcess {
    child: Child,
    network: Network,
    client: PluginClient,
}

impl PluginProcess {
    pub fn client(&self) -> PluginClient {
        self.client.clone()
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Wait for the process to exit on its own.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "plugin already exited");
        }
    }
}

/// Start the plugin at `path`, read its handshake and connect to it.
///
/// Fails if no valid handshake line arrives within `handshake_timeout`,
/// if the plugin exits first, or if it does not report healthy.
pub async fn launch(path: &Path, handshake_timeout: Duration) -> ProvisionResult<PluginProcess> {
    let plugin = path.display().to_string();
    let mut child = Command::new(path)
        .env(MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE)
        .env("PLUGIN_PROTOCOL_VERSIONS", APP_PROTOCOL_VERSION.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ProvisionError::Spawn(format!("{plugin}: {e}")))?;

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(plugin.clone(), "stderr", BufReader::new(stderr).lines()));
    }
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ProvisionError::Spawn(format!("{plugin}: stdout not captured")))?;
    let mut lines = BufReader::new(stdout).lines();

    let line = match timeout(handshake_timeout, lines.next_line()).await {
        Ok(Ok(Some(line))) => line,
        Ok(Ok(None)) => {
            return Err(ProvisionError::Handshake(format!(
                "{plugin} exited before handshake"
            )));
        }
        Ok(Err(e)) => return Err(ProvisionError::Handshake(format!("{plugin}: {e}"))),
        Err(_) => {
            return Err(ProvisionError::Handshake(format!(
                "{plugin} sent no handshake within {handshake_timeout:?}"
            )));
        }
    };
    let handshake: Handshake = line.parse()?;
    tokio::spawn(forward_lines(plugin.clone(), "stdout", lines));

    let channel = connect(&handshake.network).await?;
    check_health(channel.clone()).await?;
    info!(%plugin, network = %handshake.network, "plugin connected");

    Ok(PluginProcess {
        child,
        network: handshake.network,
        client: PluginClient::new(channel),
    })
}

async fn forward_lines<R>(plugin: String, stream: &'static str, mut lines: Lines<R>)
where
    R: AsyncBufRead + Unpin,
{
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(%plugin, stream, "{line}");
    }
}

async fn connect(network: &Network) -> ProvisionResult<Channel> {
    let unavailable = |e: tonic::transport::Error| {
        ProvisionError::Unavailable(format!("connect {network}: {e}"))
    };
    match network {
        Network::Tcp(addr) => Endpoint::from_shared(format!("http://{addr}"))
            .map_err(unavailable)?
            .connect_timeout(CONNECT_TIMEOUT)
            .connect()
            .await
            .map_err(unavailable),
        Network::Unix(path) => {
            let path = path.clone();
            // The URI is ignored; every connection dials the socket.
            Endpoint::from_static("http://[::]:50051")
                .connect_timeout(CONNECT_TIMEOUT)
                .connect_with_connector(service_fn(move |_: Uri| {
                    let path = path.clone();
                    async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(path).await?)) }
                }))
                .await
                .map_err(unavailable)
        }
    }
}

async fn check_health(channel: Channel) -> ProvisionResult<()> {
    let request = HealthCheckRequest {
        service: HEALTH_SERVICE.to_string(),
    };
    let response = timeout(CONNECT_TIMEOUT, HealthClient::new(channel).check(request))
        .await
        .map_err(|_| ProvisionError::Handshake("health check timed out".to_string()))?
        .map_err(|s| ProvisionError::Handshake(format!("health check failed: {}", s.message())))?
        .into_inner();

    if response.status != ServingStatus::Serving as i32 {
        return Err(ProvisionError::Handshake(format!(
            "plugin is not serving (status {})",
            response.status
        )));
    }
    Ok(())
}
