//! An in-process `Shoes` server and shell-script plugins that point at it.

use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{Request, Response, Status};

use crate::health::health_check_response::ServingStatus;
use crate::health::health_server::{Health, HealthServer};
use crate::health::{HealthCheckRequest, HealthCheckResponse};
use crate::proto;
use crate::proto::shoes_server::{Shoes, ShoesServer};

#[derive(Default)]
pub(crate) struct Recorded {
    adds: Mutex<Vec<proto::AddInstanceRequest>>,
    deletes: Mutex<Vec<String>>,
}

impl Recorded {
    pub(crate) fn adds(&self) -> Vec<proto::AddInstanceRequest> {
        self.adds.lock().unwrap().clone()
    }

    pub(crate) fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }
}

struct TestShoes {
    recorded: Arc<Recorded>,
}

#[tonic::async_trait]
impl Shoes for TestShoes {
    async fn add_instance(
        &self,
        request: Request<proto::AddInstanceRequest>,
    ) -> Result<Response<proto::AddInstanceResponse>, Status> {
        let req = request.into_inner();
        let response = proto::AddInstanceResponse {
            cloud_id: format!("i-{}", req.runner_name),
            shoes_type: "test".to_string(),
            ip_address: "10.0.0.1".to_string(),
            resource_type: req.resource_type,
        };
        self.recorded.adds.lock().unwrap().push(req);
        Ok(Response::new(response))
    }

    async fn delete_instance(
        &self,
        request: Request<proto::DeleteInstanceRequest>,
    ) -> Result<Response<proto::DeleteInstanceResponse>, Status> {
        let req = request.into_inner();
        if req.cloud_id.starts_with("missing") {
            return Err(Status::not_found(format!("{} not found", req.cloud_id)));
        }
        self.recorded.deletes.lock().unwrap().push(req.cloud_id);
        Ok(Response::new(proto::DeleteInstanceResponse {}))
    }
}

struct TestHealth;

#[tonic::async_trait]
impl Health for TestHealth {
    async fn check(
        &self,
        request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        let status = if request.into_inner().service == "plugin" {
            ServingStatus::Serving
        } else {
            ServingStatus::ServiceUnknown
        };
        Ok(Response::new(HealthCheckResponse {
            status: status as i32,
        }))
    }
}

/// Serve `Shoes` and `Health` on an ephemeral localhost port.
pub(crate) async fn serve_fake_plugin() -> (SocketAddr, Arc<Recorded>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let recorded = Arc::new(Recorded::default());
    let shoes = TestShoes {
        recorded: recorded.clone(),
    };
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(HealthServer::new(TestHealth))
            .add_service(ShoesServer::new(shoes))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });
    (addr, recorded)
}

/// A plugin that announces `addr` and then idles.
pub(crate) fn handshake_script(addr: &str) -> String {
    format!("#!/bin/sh\necho '1|1|tcp|{addr}|grpc'\nexec sleep 30\n")
}

pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
