//! myshoes-provisioner: the boundary to whatever actually boots runners.
//!
//! A provider is an external executable speaking the `Shoes` gRPC
//! service. It is launched as a child process, announces its listen
//! address on stdout, and is restarted with backoff if it dies.
//!
//! # Architecture
//!
//! ```text
//! ProviderSet
//!   ├── default        → PluginSupervisor (SHOES_PLUGIN)
//!   └── per provider_url → PluginFactory
//!                            ├── PluginFetcher  → local path or http(s) download
//!                            └── PluginSupervisor
//!                                  └── launch() → handshake → PluginClient (gRPC)
//! ```

pub mod download;
pub mod error;
pub mod handshake;
pub mod plugin;
pub mod registry;
pub mod service;
pub mod supervisor;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

#[cfg(test)]
pub(crate) mod test_plugin;

/// Generated `Shoes` service types.
pub mod proto {
    tonic::include_proto!("proto");
}

/// Generated gRPC health-check types.
pub mod health {
    tonic::include_proto!("grpc.health.v1");
}

pub use download::PluginFetcher;
pub use error::{ProvisionError, ProvisionResult};
pub use plugin::{PluginClient, PluginProcess, launch};
pub use registry::{PluginFactory, ProviderSet, ProvisionerFactory};
pub use service::{Instance, InstanceSpec, Provisioner};
pub use supervisor::{HANDSHAKE_TIMEOUT, PluginSupervisor};
