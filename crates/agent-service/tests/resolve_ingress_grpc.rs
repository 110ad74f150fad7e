//! Exercises the local ingress-resolver server end to end over a real
//! loopback TCP connection: a server task backed by a shared snapshot, and a
//! tonic client issuing `ResolveIngress`/`Version` RPCs against it. Unlike
//! the in-process `#[cfg(test)]` unit tests in `src/lib.rs` (which call the
//! service trait methods directly), this drives the actual wire protocol.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use agent_core::kubernetes::{KubernetesSnapshot, MappingRecord};
use agent_core::snapshot::CurrentSnapshot;
use agent_ore::build_info::BuildInfo;
use agent_proto::agent_service_client::AgentServiceClient;
use agent_proto::{IngressInfoRequest, VersionRequest};
use agent_service::serve;

fn build_info() -> BuildInfo {
    BuildInfo {
        version: "1.2.3",
        sha: "cafef00d",
    }
}

async fn free_loopback_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    listener.local_addr().expect("local addr")
}

async fn connect(addr: SocketAddr) -> AgentServiceClient<tonic::transport::Channel> {
    let endpoint = format!("http://{addr}");
    for _ in 0..50 {
        if let Ok(client) = AgentServiceClient::connect(endpoint.clone()).await {
            return client;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server never became reachable at {addr}");
}

#[tokio::test]
async fn resolves_ingress_over_the_wire_with_no_snapshot_yet() {
    let addr = free_loopback_addr().await;
    let snapshot = Arc::new(CurrentSnapshot::new());
    let handle = tokio::spawn(serve(addr, Arc::clone(&snapshot), "cluster.local".to_string(), build_info()));

    let mut client = connect(addr).await;
    let response = client
        .resolve_ingress(IngressInfoRequest {
            namespace: "default".to_string(),
            service_id: "uid-1".to_string(),
            service_name: "quote".to_string(),
            service_port_name: "http".to_string(),
            service_port_number: 80,
        })
        .await
        .expect("rpc succeeds")
        .into_inner();

    // No snapshot has been published yet, so the leaderless replica answers
    // with the default response derived purely from the request (P5).
    assert_eq!(response.l3_host, "quote.default.svc.cluster.local");
    assert!(!response.tls);

    handle.abort();
}

#[tokio::test]
async fn resolves_ingress_once_the_snapshot_names_a_gateway_service() {
    let addr = free_loopback_addr().await;
    let snapshot = Arc::new(CurrentSnapshot::new());
    let handle = tokio::spawn(serve(addr, Arc::clone(&snapshot), "cluster.local".to_string(), build_info()));

    let mut client = connect(addr).await;

    let gateway = serde_json::from_value(serde_json::json!({
        "metadata": {"name": "emissary-ingress", "namespace": "ambassador", "uid": "gw-uid"},
        "spec": {"ports": [{"port": 8080, "name": "http"}]},
    }))
    .expect("valid service fixture");
    let routed_service = serde_json::from_value(serde_json::json!({
        "metadata": {"name": "quote", "namespace": "default", "uid": "uid-1"},
        "spec": {"ports": [{"port": 80, "name": "http"}]},
    }))
    .expect("valid service fixture");

    snapshot.set(KubernetesSnapshot {
        services: vec![gateway, routed_service],
        mappings: vec![MappingRecord {
            name: "quote-mapping".to_string(),
            namespace: "default".to_string(),
            uid: Some("mapping-uid".to_string()),
            service: "quote".to_string(),
            hostname: Some("quote.ambassador-agent.example.com".to_string()),
        }],
        ..KubernetesSnapshot::default()
    });

    let response = client
        .resolve_ingress(IngressInfoRequest {
            namespace: "default".to_string(),
            service_id: "uid-1".to_string(),
            service_name: "quote".to_string(),
            service_port_name: "http".to_string(),
            service_port_number: 80,
        })
        .await
        .expect("rpc succeeds")
        .into_inner();

    assert_eq!(response.l3_host, "emissary-ingress.ambassador.svc.cluster.local");
    assert_eq!(response.l5_host, "quote.ambassador-agent.example.com");
    assert_eq!(response.port, 8080);
    assert!(!response.tls);

    handle.abort();
}

#[tokio::test]
async fn version_rpc_reports_the_running_build() {
    let addr = free_loopback_addr().await;
    let snapshot = Arc::new(CurrentSnapshot::new());
    let handle = tokio::spawn(serve(addr, snapshot, "cluster.local".to_string(), build_info()));

    let mut client = connect(addr).await;
    let response = client.version(VersionRequest {}).await.expect("rpc succeeds").into_inner();
    assert_eq!(response.version, "1.2.3");
    assert_eq!(response.name, "ambassador-agent");

    handle.abort();
}
