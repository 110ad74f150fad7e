//! The local gRPC server (§4.13, §6): answers `ResolveIngress` for
//! developer tooling resolving preview-URL routing, and `Version` for
//! anything that wants to identify the running binary. Runs for the whole
//! process lifetime, independent of leader election — it only needs the
//! most recently assembled snapshot, which is `None` until this replica
//! becomes the elected reporter.

use std::net::SocketAddr;
use std::sync::Arc;

use agent_core::ingress::resolve_ingress;
use agent_core::snapshot::CurrentSnapshot;
use agent_ore::build_info::BuildInfo;
use agent_proto::agent_service_server::{AgentService, AgentServiceServer};
use agent_proto::{IngressInfoRequest, IngressInfoResponse, VersionInfo, VersionRequest};
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::info;

/// Shared state behind the ingress-resolver service: the most recently
/// assembled snapshot (written by the reporter loop, read here without
/// contending with the next assembly) and the cluster domain suffix used
/// to build fully qualified service hostnames.
pub struct IngressResolverService {
    snapshot: Arc<CurrentSnapshot>,
    cluster_domain: String,
    build_info: BuildInfo,
}

impl IngressResolverService {
    pub fn new(snapshot: Arc<CurrentSnapshot>, cluster_domain: impl Into<String>, build_info: BuildInfo) -> Self {
        IngressResolverService {
            snapshot,
            cluster_domain: cluster_domain.into(),
            build_info,
        }
    }
}

#[tonic::async_trait]
impl AgentService for IngressResolverService {
    async fn resolve_ingress(
        &self,
        request: Request<IngressInfoRequest>,
    ) -> Result<Response<IngressInfoResponse>, Status> {
        let request: agent_core::IngressInfoRequest = request.into_inner().into();
        let snapshot = self.snapshot.get();
        let response = resolve_ingress(snapshot.as_ref(), &self.cluster_domain, &request);
        Ok(Response::new(response.into()))
    }

    async fn version(&self, _request: Request<VersionRequest>) -> Result<Response<VersionInfo>, Status> {
        Ok(Response::new(VersionInfo {
            name: "ambassador-agent".to_string(),
            version: self.build_info.version.to_string(),
        }))
    }
}

/// Binds `addr` and serves the local ingress-resolver gRPC server until the
/// process exits or the returned future is dropped. Run as its own task,
/// not gated on leadership (§2 control flow).
pub async fn serve(
    addr: SocketAddr,
    snapshot: Arc<CurrentSnapshot>,
    cluster_domain: String,
    build_info: BuildInfo,
) -> Result<(), anyhow::Error> {
    info!(%addr, "starting local ingress-resolver server");
    let service = IngressResolverService::new(snapshot, cluster_domain, build_info);
    Server::builder()
        .add_service(AgentServiceServer::new(service))
        .serve(addr)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::kubernetes::KubernetesSnapshot;

    fn build_info() -> BuildInfo {
        BuildInfo {
            version: "0.1.0",
            sha: "deadbeef",
        }
    }

    #[tokio::test]
    async fn resolves_default_response_on_an_empty_snapshot() {
        let snapshot = Arc::new(CurrentSnapshot::new());
        snapshot.set(KubernetesSnapshot::default());
        let service = IngressResolverService::new(snapshot, "cluster.local", build_info());

        let request = Request::new(IngressInfoRequest {
            namespace: "default".to_string(),
            service_id: "uid-1".to_string(),
            service_name: "quote".to_string(),
            service_port_name: "http".to_string(),
            service_port_number: 80,
        });
        let response = service.resolve_ingress(request).await.unwrap().into_inner();
        assert_eq!(response.l3_host, "quote.default.svc.cluster.local");
        assert!(!response.tls);
    }

    #[tokio::test]
    async fn version_reports_the_configured_build_info() {
        let snapshot = Arc::new(CurrentSnapshot::new());
        let service = IngressResolverService::new(snapshot, "cluster.local", build_info());
        let response = service.version(Request::new(VersionRequest {})).await.unwrap().into_inner();
        assert_eq!(response.version, "0.1.0");
    }
}
