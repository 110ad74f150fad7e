//! The local ingress-resolver algorithm (§4.13): given a service reference,
//! say what L3/L5 host, port, and TLS setting a preview-URL tunnel should
//! use, consulting the most recently assembled snapshot.

use k8s_openapi::api::core::v1::{Service, ServicePort};
use serde::{Deserialize, Serialize};

use crate::kubernetes::KubernetesSnapshot;

/// The ordered list of service names this agent will treat as the
/// cluster's ingress gateway, checked in order.
const INGRESS_GATEWAY_NAMES: [&str; 3] = ["emissary-ingress", "edge-stack", "ambassador"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressInfoRequest {
    pub namespace: String,
    pub service_id: String,
    pub service_name: String,
    pub service_port_name: String,
    pub service_port_number: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressInfoResponse {
    pub l3_host: String,
    pub port: i32,
    pub tls: bool,
    pub l5_host: String,
}

/// Resolves ingress info against `snapshot` (if any) and `cluster_domain`,
/// falling back to the default response derived purely from the request
/// when the snapshot doesn't have enough to answer (P5).
pub fn resolve_ingress(
    snapshot: Option<&KubernetesSnapshot>,
    cluster_domain: &str,
    request: &IngressInfoRequest,
) -> IngressInfoResponse {
    match snapshot.and_then(|s| try_resolve(s, cluster_domain, request)) {
        Some(response) => response,
        None => default_ingress_info(cluster_domain, request),
    }
}

fn try_resolve(
    snapshot: &KubernetesSnapshot,
    cluster_domain: &str,
    request: &IngressInfoRequest,
) -> Option<IngressInfoResponse> {
    let service = find_service_by_uid(snapshot, &request.service_id)?;
    let host_name = find_hostname(snapshot, &service.metadata.name.clone()?, &service.metadata.namespace.clone()?)?;
    let ingress_service = find_ingress_gateway(snapshot)?;
    let (port, tls) = resolve_ingress_port(&ingress_service.spec.as_ref()?.ports.as_ref()?.clone());
    let name = ingress_service.metadata.name.as_deref().unwrap_or_default();
    let namespace = ingress_service.metadata.namespace.as_deref().unwrap_or_default();
    Some(IngressInfoResponse {
        l3_host: format!("{name}.{namespace}.svc.{cluster_domain}"),
        l5_host: host_name,
        port,
        tls,
    })
}

fn find_service_by_uid<'a>(snapshot: &'a KubernetesSnapshot, service_id: &str) -> Option<&'a Service> {
    snapshot
        .services
        .iter()
        .find(|svc| svc.metadata.uid.as_deref() == Some(service_id))
}

/// Finds a usable hostname among the Mappings that target `name` in
/// `namespace`. A Mapping's `spec.service` can name the target either as a
/// bare service name or as a `host:port` / URL-shaped reference; either way
/// counts as a match once the host portion equals `name`. Wildcard hosts
/// (`*...`) are never usable as a concrete hostname, matching the gateway's
/// own rule for picking a default host among several mapped to one service.
fn find_hostname(snapshot: &KubernetesSnapshot, name: &str, namespace: &str) -> Option<String> {
    snapshot
        .mappings
        .iter()
        .filter(|m| m.namespace == namespace && (m.service == name || mapping_service_host(&m.service) == name))
        .find_map(|m| {
            let hostname = m.hostname.as_deref()?;
            (!hostname.is_empty() && !hostname.starts_with('*')).then(|| hostname.to_string())
        })
}

/// Strips any `scheme://` prefix and trailing `:port` or path from a
/// Mapping's `spec.service` reference, leaving just the host portion.
fn mapping_service_host(service: &str) -> &str {
    let without_scheme = service.split("://").last().unwrap_or(service);
    let host = without_scheme.split(['/', ':']).next().unwrap_or(without_scheme);
    host
}

fn find_ingress_gateway(snapshot: &KubernetesSnapshot) -> Option<&Service> {
    INGRESS_GATEWAY_NAMES.iter().find_map(|name| {
        snapshot.services.iter().find(|svc| {
            svc.metadata.name.as_deref() == Some(name)
                && svc
                    .spec
                    .as_ref()
                    .and_then(|s| s.ports.as_ref())
                    .map(|p| !p.is_empty())
                    .unwrap_or(false)
        })
    })
}

fn resolve_ingress_port(ports: &[ServicePort]) -> (i32, bool) {
    let https = ports
        .iter()
        .find(|p| p.port == 443 || p.name.as_deref() == Some("https"));
    if let Some(p) = https {
        return (p.port, true);
    }
    let http = ports
        .iter()
        .find(|p| p.port == 80 || p.name.as_deref() == Some("http"));
    if let Some(p) = http {
        return (p.port, false);
    }
    (ports[0].port, false)
}

fn default_ingress_info(cluster_domain: &str, request: &IngressInfoRequest) -> IngressInfoResponse {
    let fqdn = format!(
        "{}.{}.svc.{cluster_domain}",
        request.service_name, request.namespace
    );
    IngressInfoResponse {
        tls: request.service_port_name == "https" || request.service_port_number == 443,
        l3_host: fqdn.clone(),
        l5_host: fqdn,
        port: request.service_port_number,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> IngressInfoRequest {
        IngressInfoRequest {
            namespace: "default".to_string(),
            service_id: "svc-uid".to_string(),
            service_name: "quote".to_string(),
            service_port_name: "http".to_string(),
            service_port_number: 80,
        }
    }

    #[test]
    fn empty_snapshot_yields_default_response() {
        let response = resolve_ingress(None, "cluster.local", &request());
        assert_eq!(response, default_ingress_info("cluster.local", &request()));
    }

    #[test]
    fn default_response_uses_tls_for_https_port_name() {
        let mut req = request();
        req.service_port_name = "https".to_string();
        let response = resolve_ingress(Some(&KubernetesSnapshot::default()), "cluster.local", &req);
        assert!(response.tls);
    }

    #[test]
    fn default_response_uses_tls_for_port_443() {
        let mut req = request();
        req.service_port_number = 443;
        let response = resolve_ingress(None, "cluster.local", &req);
        assert!(response.tls);
    }

    fn mapping(namespace: &str, service: &str, hostname: &str) -> crate::kubernetes::MappingRecord {
        crate::kubernetes::MappingRecord {
            name: "quote-mapping".to_string(),
            namespace: namespace.to_string(),
            uid: Some("mapping-uid".to_string()),
            service: service.to_string(),
            hostname: Some(hostname.to_string()),
        }
    }

    fn service(name: &str, namespace: &str, uid: &str) -> Service {
        serde_json::from_value(serde_json::json!({
            "metadata": {"name": name, "namespace": namespace, "uid": uid},
            "spec": {"ports": [{"port": 443, "name": "https"}]},
        }))
        .expect("valid service fixture")
    }

    #[test]
    fn mapping_by_bare_service_name_resolves_to_gateway_with_hostname() {
        let snapshot = KubernetesSnapshot {
            services: vec![service("quote", "default", "svc-uid"), service("emissary-ingress", "ambassador", "gw-uid")],
            mappings: vec![mapping("default", "quote", "quote.example.com")],
            ..KubernetesSnapshot::default()
        };
        let response = resolve_ingress(Some(&snapshot), "cluster.local", &request());
        assert_eq!(response.l3_host, "emissary-ingress.ambassador.svc.cluster.local");
        assert_eq!(response.l5_host, "quote.example.com");
        assert_eq!(response.port, 443);
        assert!(response.tls);
    }

    #[test]
    fn mapping_by_url_shaped_service_reference_still_matches() {
        let snapshot = KubernetesSnapshot {
            services: vec![service("quote", "default", "svc-uid"), service("emissary-ingress", "ambassador", "gw-uid")],
            mappings: vec![mapping("default", "quote.default:80", "quote.example.com")],
            ..KubernetesSnapshot::default()
        };
        let response = resolve_ingress(Some(&snapshot), "cluster.local", &request());
        assert_eq!(response.l5_host, "quote.example.com");
    }

    #[test]
    fn wildcard_mapping_hostname_is_skipped_in_favor_of_a_concrete_one() {
        let snapshot = KubernetesSnapshot {
            services: vec![service("quote", "default", "svc-uid"), service("emissary-ingress", "ambassador", "gw-uid")],
            mappings: vec![mapping("default", "quote", "*.example.com"), mapping("default", "quote", "quote.example.com")],
            ..KubernetesSnapshot::default()
        };
        let response = resolve_ingress(Some(&snapshot), "cluster.local", &request());
        assert_eq!(response.l5_host, "quote.example.com");
    }

    #[test]
    fn mapping_for_a_different_namespace_does_not_match() {
        let snapshot = KubernetesSnapshot {
            services: vec![service("quote", "default", "svc-uid"), service("emissary-ingress", "ambassador", "gw-uid")],
            mappings: vec![mapping("other-namespace", "quote", "quote.example.com")],
            ..KubernetesSnapshot::default()
        };
        let response = resolve_ingress(Some(&snapshot), "cluster.local", &request());
        assert_eq!(response, default_ingress_info("cluster.local", &request()));
    }
}
