//! Exercises several modules together the way the reporter loop actually
//! chains them: core-watcher state merged with fallback-watcher state,
//! sanitized, then consulted by the ingress resolver — rather than each
//! module's unit tests, which stub the others out.

use agent_core::ingress::{resolve_ingress, IngressInfoRequest};
use agent_core::kubernetes::{KubernetesSnapshot, MappingRecord};
use agent_core::sanitize::sanitize_kubernetes_snapshot;
use agent_core::token::{resolve_effective_token, NamedData, TOKEN_KEY};

fn service(name: &str, namespace: &str, uid: &str, port: i32, port_name: &str) -> k8s_openapi::api::core::v1::Service {
    serde_json::from_value(serde_json::json!({
        "metadata": {
            "name": name,
            "namespace": namespace,
            "uid": uid,
            "managedFields": [{"manager": "kubectl", "operation": "Update"}],
        },
        "spec": {"ports": [{"port": port, "name": port_name}]},
    }))
    .expect("valid service fixture")
}

fn request(service_id: &str) -> IngressInfoRequest {
    IngressInfoRequest {
        namespace: "default".to_string(),
        service_id: service_id.to_string(),
        service_name: "quote".to_string(),
        service_port_name: "http".to_string(),
        service_port_number: 80,
    }
}

/// Scenario: a cluster starts with the fallback watcher group's only sighting
/// being the routed service (no gateway deployed yet, so no Mapping carries a
/// hostname for it), then the gateway gets deployed alongside a Mapping
/// naming it. The fallback watcher's list is always the full cluster state
/// rather than a delta, so the next relist carries both services and the new
/// Mapping at once; ingress resolution should flip from the default-response
/// fallback to a real gateway-routed answer once that relist is merged in.
#[test]
fn gateway_appearing_flips_ingress_resolution_from_default_to_routed() {
    let routed = service("quote", "default", "uid-1", 80, "http");
    let before_snapshot = KubernetesSnapshot {
        services: vec![routed.clone()],
        ..KubernetesSnapshot::default()
    };

    let before = resolve_ingress(Some(&before_snapshot), "cluster.local", &request("uid-1"));
    assert_eq!(before.l3_host, "quote.default.svc.cluster.local");
    assert_eq!(before.port, 80);

    let gateway = service("emissary-ingress", "ambassador", "gw-uid", 443, "https");
    let after_relist = KubernetesSnapshot {
        services: vec![routed.clone(), gateway],
        mappings: vec![MappingRecord {
            name: "quote-mapping".to_string(),
            namespace: "default".to_string(),
            uid: Some("mapping-uid".to_string()),
            service: "quote".to_string(),
            hostname: Some("quote.example.com".to_string()),
        }],
        ..KubernetesSnapshot::default()
    };
    let merged = before_snapshot.merge(after_relist);

    let after = resolve_ingress(Some(&merged), "cluster.local", &request("uid-1"));
    assert_eq!(after.l3_host, "emissary-ingress.ambassador.svc.cluster.local");
    assert_eq!(after.l5_host, "quote.example.com");
    assert_eq!(after.port, 443);
    assert!(after.tls);

    // The routed service itself must survive the merge (the merged-in relist
    // is a full snapshot that still names it, not just the newly added one).
    assert!(merged.services.iter().any(|s| s.metadata.uid.as_deref() == Some("uid-1")));
}

/// Scenario: the snapshot about to leave the process for the Director still
/// carries a secret with cleartext values and kubectl's managed-field
/// bookkeeping; sanitizing it in place must strip both before assembly,
/// while leaving the services the ingress resolver depends on untouched.
#[test]
fn sanitizing_a_snapshot_before_assembly_does_not_disturb_ingress_resolution() {
    let mut secret_data = std::collections::BTreeMap::new();
    secret_data.insert(TOKEN_KEY.to_string(), k8s_openapi::ByteString(b"super-secret".to_vec()));
    let secret: k8s_openapi::api::core::v1::Secret = serde_json::from_value(serde_json::json!({
        "metadata": {
            "name": "ambassador-agent-cloud-token",
            "namespace": "default",
            "managedFields": [{"manager": "kube-controller-manager"}],
        },
    }))
    .expect("valid secret fixture");
    let mut secret = secret;
    secret.data = Some(secret_data);

    let mut snapshot = KubernetesSnapshot {
        services: vec![service("quote", "default", "uid-1", 80, "http")],
        secrets: vec![secret],
        ..KubernetesSnapshot::default()
    };

    sanitize_kubernetes_snapshot(&mut snapshot);

    assert!(snapshot.services[0].metadata.managed_fields.is_none());
    let redacted = &snapshot.secrets[0].data.as_ref().unwrap()[TOKEN_KEY];
    assert_eq!(redacted.0, b"<redacted>".to_vec());

    let response = resolve_ingress(Some(&snapshot), "cluster.local", &request("uid-1"));
    assert_eq!(response.l3_host, "quote.default.svc.cluster.local");
}

/// Scenario: a token-bearing secret appears in the same snapshot cycle as a
/// configmap with a different value; the precedence rule consulted by the
/// reporter's comm layer must pick the secret regardless of which watcher
/// group observed its resource last.
#[test]
fn token_precedence_holds_once_both_a_secret_and_configmap_are_present() {
    let secret_data = std::collections::BTreeMap::from([(TOKEN_KEY.to_string(), "from-secret".to_string())]);
    let config_map_data = std::collections::BTreeMap::from([(TOKEN_KEY.to_string(), "from-configmap".to_string())]);

    let token = resolve_effective_token(
        vec![NamedData {
            name: "ambassador-agent-cloud-token",
            data: &secret_data,
        }],
        vec![NamedData {
            name: "ambassador-agent-cloud-token",
            data: &config_map_data,
        }],
        None,
        "bootstrap-env-token",
    );

    assert_eq!(token, "from-secret");
}
