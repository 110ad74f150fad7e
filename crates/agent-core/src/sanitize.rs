//! Object sanitization (§ object sanitizer): strip server-managed fields,
//! redact secret values, and keep unknown-kind payloads to a safe skeleton
//! before anything leaves the cluster.

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::argo::OpaqueObject;
use crate::kubernetes::KubernetesSnapshot;

const REDACTED: &str = "<redacted>";

/// Clears fields the API server fills in that have no business leaving the
/// cluster: managed-field ownership metadata is the only one this agent's
/// resource set carries (no `data`/`stringData` outside [`Secret`]).
pub fn sanitize_meta(meta: &mut ObjectMeta) {
    meta.managed_fields = None;
}

/// Redacts every value in a secret's `data` map to a fixed placeholder,
/// preserving the key set so consumers can still tell which credentials
/// exist without learning their values.
pub fn sanitize_secret(secret: &mut Secret) {
    sanitize_meta(&mut secret.metadata);
    if let Some(data) = secret.data.as_mut() {
        for value in data.values_mut() {
            value.0 = REDACTED.as_bytes().to_vec();
        }
    }
    if let Some(string_data) = secret.string_data.as_mut() {
        for value in string_data.values_mut() {
            *value = REDACTED.to_string();
        }
    }
}

/// Reduces an opaque argo object to `{kind, apiVersion, metadata.name,
/// metadata.namespace, errors}` — argo payloads are forwarded verbatim in
/// the reference implementation, but this agent only ever saw them through
/// the dynamic client's unstructured form, so it strips anything beyond the
/// fields it can vouch for came from the API server's own metadata.
pub fn sanitize_opaque(obj: &mut OpaqueObject) {
    let name = obj.name().unwrap_or_default().to_string();
    let namespace = obj.namespace().unwrap_or_default().to_string();
    obj.metadata = serde_json::json!({ "name": name, "namespace": namespace });
    obj.raw = serde_json::json!({ "errors": serde_json::Value::Null });
}

/// Sanitizes every object in a [`KubernetesSnapshot`] in place: satisfies
/// invariant I3 (no managed fields, no cleartext secret values reaching the
/// wire, no fields from kinds outside the agent's whitelist — enforced
/// structurally here since every field of [`KubernetesSnapshot`] is a
/// whitelisted kind).
pub fn sanitize_kubernetes_snapshot(snapshot: &mut KubernetesSnapshot) {
    for pod in &mut snapshot.pods {
        sanitize_meta(&mut pod.metadata);
    }
    for deployment in &mut snapshot.deployments {
        sanitize_meta(&mut deployment.metadata);
    }
    for config_map in &mut snapshot.config_maps {
        sanitize_meta(&mut config_map.metadata);
    }
    for endpoints in &mut snapshot.endpoints {
        sanitize_meta(&mut endpoints.metadata);
    }
    for service in &mut snapshot.services {
        sanitize_meta(&mut service.metadata);
    }
    for ingress in &mut snapshot.ingresses {
        sanitize_meta(&mut ingress.metadata);
    }
    for secret in &mut snapshot.secrets {
        sanitize_secret(secret);
    }
    for rollout in &mut snapshot.argo_rollouts {
        sanitize_opaque(rollout);
    }
    for application in &mut snapshot.argo_applications {
        sanitize_opaque(application);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    #[test]
    fn secret_values_are_redacted_but_keys_survive() {
        let mut data = BTreeMap::new();
        data.insert("token".to_string(), ByteString(b"super-secret".to_vec()));
        let mut secret = Secret {
            data: Some(data),
            ..Default::default()
        };

        sanitize_secret(&mut secret);

        let data = secret.data.unwrap();
        assert_eq!(data.len(), 1);
        assert!(data.contains_key("token"));
        assert_eq!(data["token"].0, REDACTED.as_bytes());
    }

    #[test]
    fn managed_fields_are_cleared() {
        let mut meta = ObjectMeta {
            managed_fields: Some(vec![Default::default()]),
            ..Default::default()
        };
        sanitize_meta(&mut meta);
        assert!(meta.managed_fields.is_none());
    }

    #[test]
    fn opaque_objects_keep_only_name_and_namespace() {
        let mut obj = OpaqueObject {
            kind: "Rollout".to_string(),
            api_version: "argoproj.io/v1alpha1".to_string(),
            metadata: serde_json::json!({"name": "canary", "namespace": "default", "uid": "xyz"}),
            raw: serde_json::json!({"spec": {"secret": "leak"}}),
        };
        sanitize_opaque(&mut obj);
        assert_eq!(obj.name(), Some("canary"));
        assert_eq!(obj.namespace(), Some("default"));
        assert!(obj.metadata.get("uid").is_none());
        assert!(obj.raw.get("spec").is_none());
    }
}
