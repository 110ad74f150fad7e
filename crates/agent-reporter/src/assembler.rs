//! The snapshot and diagnostics assemblers (§4.8, §4.9): pull a document
//! from the gateway over HTTP when it's present, or synthesize a minimal
//! one when it's not, then merge in watcher state, sanitize, and marshal
//! into the report ready to send.

use agent_core::error::AssemblyError;
use agent_core::kubernetes::KubernetesSnapshot;
use agent_core::sanitize::sanitize_kubernetes_snapshot;
use agent_core::{AmbassadorMeta, ApiDoc, Identity, OpaqueObject, Report};
use serde::Deserialize;

const CONTENT_TYPE: &str = "application/json";

/// The shape of the gateway's own snapshot document, as much of it as this
/// agent cares about: its identity block plus whatever cluster resources it
/// chose to embed (normally left empty; the agent is the one that fills
/// `kubernetes` in from its own watchers).
#[derive(Debug, Deserialize, Default)]
struct GatewaySnapshotDoc {
    #[serde(rename = "AmbassadorMeta")]
    ambassador_meta: Option<GatewayMeta>,
    #[serde(rename = "Kubernetes", default)]
    kubernetes: Option<KubernetesSnapshot>,
}

#[derive(Debug, Deserialize)]
struct GatewayMeta {
    cluster_id: Option<String>,
    ambassador_id: Option<String>,
    #[serde(default)]
    ambassador_version: Option<String>,
    #[serde(default)]
    kube_version: Option<String>,
}

/// The gateway's diagnostics document's identity-carrying block.
#[derive(Debug, Deserialize)]
struct DiagnosticsDoc {
    system: Option<SystemBlock>,
}

#[derive(Debug, Deserialize)]
struct SystemBlock {
    hostname: Option<String>,
    cluster_id: Option<String>,
    #[serde(default)]
    version: Option<String>,
}

/// Fetches the gateway's snapshot document. Non-2xx is a [`AssemblyError::FetchStatus`];
/// a body that doesn't parse is a [`AssemblyError::Parse`].
async fn fetch_gateway_snapshot(http: &reqwest::Client, url: &str) -> Result<GatewaySnapshotDoc, AssemblyError> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|err| AssemblyError::Fetch(Box::new(err)))?;
    if response.status().as_u16() >= 300 {
        return Err(AssemblyError::FetchStatus {
            status: response.status().as_u16(),
        });
    }
    let body = response
        .bytes()
        .await
        .map_err(|err| AssemblyError::Fetch(Box::new(err)))?;
    serde_json::from_slice(&body).map_err(AssemblyError::Parse)
}

async fn fetch_gateway_diagnostics(http: &reqwest::Client, url: &str) -> Result<(DiagnosticsDoc, Vec<u8>), AssemblyError> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|err| AssemblyError::Fetch(Box::new(err)))?;
    if response.status().as_u16() >= 300 {
        return Err(AssemblyError::FetchStatus {
            status: response.status().as_u16(),
        });
    }
    let body = response
        .bytes()
        .await
        .map_err(|err| AssemblyError::Fetch(Box::new(err)))?;
    let doc: DiagnosticsDoc = serde_json::from_slice(&body).map_err(AssemblyError::Parse)?;
    Ok((doc, body.to_vec()))
}

/// Every input the snapshot assembler needs beyond the gateway fetch
/// itself: the watcher-derived overlays and enrichment sources, all
/// already-computed snapshots of their respective state, so assembly
/// itself stays a pure merge (§4.8 step 4).
pub struct AssemblyInputs<'a> {
    pub gateway_present: bool,
    pub gateway_snapshot_url: &'a str,
    pub ambassador_id: &'a str,
    pub synthesized_cluster_id: &'a str,
    pub core: Option<KubernetesSnapshot>,
    pub fallback: Option<KubernetesSnapshot>,
    pub argo_rollouts: Vec<OpaqueObject>,
    pub argo_applications: Vec<OpaqueObject>,
    pub api_docs: Vec<ApiDoc>,
}

/// Runs the full snapshot assembly pipeline (§4.8): fetch-or-synthesize,
/// merge, sanitize, marshal, stamp. An `Err` means the tick should be
/// skipped; the caller logs it and moves on to the next tick.
pub async fn assemble_snapshot(
    http: &reqwest::Client,
    inputs: AssemblyInputs<'_>,
) -> Result<Report, AssemblyError> {
    let (meta, base_kubernetes) = if inputs.gateway_present {
        let doc = fetch_gateway_snapshot(http, inputs.gateway_snapshot_url).await?;
        let Some(gateway_meta) = doc.ambassador_meta else {
            return Err(AssemblyError::MissingIdentity);
        };
        let Some(cluster_id) = gateway_meta.cluster_id.filter(|id| !id.is_empty()) else {
            return Err(AssemblyError::MissingIdentity);
        };
        let meta = AmbassadorMeta {
            cluster_id,
            ambassador_id: gateway_meta.ambassador_id.unwrap_or_else(|| inputs.ambassador_id.to_string()),
            ambassador_version: gateway_meta.ambassador_version.unwrap_or_else(|| "unknown".to_string()),
            kube_version: gateway_meta.kube_version.unwrap_or_else(|| "unknown".to_string()),
        };
        (meta, doc.kubernetes.unwrap_or_default())
    } else {
        if inputs.synthesized_cluster_id.is_empty() {
            return Err(AssemblyError::MissingIdentity);
        }
        let meta = AmbassadorMeta {
            cluster_id: inputs.synthesized_cluster_id.to_string(),
            ambassador_id: inputs.ambassador_id.to_string(),
            ambassador_version: "unknown".to_string(),
            kube_version: "unknown".to_string(),
        };
        (meta, KubernetesSnapshot::default())
    };

    let mut kubernetes = base_kubernetes;
    if let Some(core) = inputs.core {
        kubernetes = kubernetes.merge(core);
    }
    if let Some(fallback) = inputs.fallback {
        kubernetes = kubernetes.merge(fallback);
    }
    kubernetes.argo_rollouts = inputs.argo_rollouts;
    kubernetes.argo_applications = inputs.argo_applications;

    sanitize_kubernetes_snapshot(&mut kubernetes);

    let snapshot = agent_core::snapshot::Snapshot {
        ambassador_meta: meta.clone(),
        kubernetes,
        deltas: Vec::new(),
        api_docs: inputs.api_docs,
    };
    let raw = serde_json::to_vec(&snapshot).map_err(AssemblyError::Parse)?;

    let identity = Identity {
        hostname: meta.ambassador_id.clone(),
        cluster_id: meta.cluster_id,
        label: if inputs.gateway_present { "gateway".to_string() } else { "standalone".to_string() },
        version: agent_ore::build_info::VERSION.to_string(),
    };
    Ok(Report::new(identity, raw, CONTENT_TYPE))
}

/// Runs the diagnostics assembly pipeline (§4.9): only ever called while
/// the gateway is present, so there's no synthesize-standalone branch.
pub async fn assemble_diagnostics(http: &reqwest::Client, diagnostics_url: &str) -> Result<Report, AssemblyError> {
    let (doc, raw) = fetch_gateway_diagnostics(http, diagnostics_url).await?;
    let system = doc.system.ok_or(AssemblyError::MissingIdentity)?;
    let cluster_id = system.cluster_id.filter(|id| !id.is_empty()).ok_or(AssemblyError::MissingIdentity)?;
    let identity = Identity {
        hostname: system.hostname.unwrap_or_default(),
        cluster_id,
        label: "gateway".to_string(),
        version: system.version.unwrap_or_else(|| "unknown".to_string()),
    };
    Ok(Report::new(identity, raw, CONTENT_TYPE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_snapshot_doc_parses_minimal_document() {
        let body = br#"{"AmbassadorMeta": {"cluster_id": "abc", "ambassador_id": "default"}}"#;
        let doc: GatewaySnapshotDoc = serde_json::from_slice(body).unwrap();
        assert_eq!(doc.ambassador_meta.unwrap().cluster_id.as_deref(), Some("abc"));
    }

    #[test]
    fn diagnostics_doc_parses_system_block() {
        let body = br#"{"system": {"hostname": "h", "cluster_id": "abc", "version": "1.0"}}"#;
        let doc: DiagnosticsDoc = serde_json::from_slice(body).unwrap();
        let system = doc.system.unwrap();
        assert_eq!(system.cluster_id.as_deref(), Some("abc"));
        assert_eq!(system.version.as_deref(), Some("1.0"));
    }
}
