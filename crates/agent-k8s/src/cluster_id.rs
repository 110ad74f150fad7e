//! Cluster-ID derivation's Kubernetes-facing half (§4.15): fetching the
//! default namespace's UID. The deterministic hash itself lives in
//! `agent_core::cluster_id`, free of any client dependency.

use k8s_openapi::api::core::v1::Namespace;
use kube::{Api, Client};
use tracing::warn;

/// Fetches the `default` namespace's UID, falling back to the all-zero UID
/// (so a cluster-id is always derivable, even degraded) if the namespace
/// can't be read.
pub async fn root_namespace_uid(client: Client) -> String {
    let api: Api<Namespace> = Api::all(client);
    match api.get("default").await {
        Ok(ns) => ns
            .metadata
            .uid
            .unwrap_or_else(|| agent_core::cluster_id::ZERO_UID.to_string()),
        Err(err) => {
            warn!(error = %err, "failed to fetch default namespace, using zero uid");
            agent_core::cluster_id::ZERO_UID.to_string()
        }
    }
}

/// Resolves the cluster-id per §4.15: prefer the bootstrap env override,
/// else derive it from the default namespace's UID and the gateway-identity
/// seed.
pub async fn resolve(client: Client, env_override: Option<&str>, gateway_id: &str) -> String {
    if let Some(id) = env_override {
        return id.to_string();
    }
    let root_uid = root_namespace_uid(client).await;
    agent_core::cluster_id::derive(&root_uid, gateway_id)
}
