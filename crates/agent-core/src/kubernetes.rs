//! The Kubernetes portion of an outbound snapshot.

use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Secret, Service};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::argo::OpaqueObject;

/// A service port reference as carried on the wire: either the port's name
/// or its number, matching the pre-stable Ingress API's `IntOrString`
/// shape. Exactly one variant is ever populated for a given backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServicePortRef {
    Name(String),
    Number(i32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressBackend {
    pub service_name: String,
    pub service_port: ServicePortRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressPath {
    pub path: Option<String>,
    pub backend: IngressBackend,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub host: Option<String>,
    pub paths: Vec<IngressPath>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IngressTlsBlock {
    pub hosts: Vec<String>,
    pub secret_name: Option<String>,
}

/// An ingress object normalized into the Director's wire shape, which
/// predates the stable `networking.k8s.io/v1` API: whichever ingress API
/// the cluster actually exposes, rules and backends are reconstructed into
/// this name-or-number port representation before transmission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRecord {
    pub name: String,
    pub namespace: String,
    pub uid: Option<String>,
    #[serde(default)]
    pub load_balancer_ingress: Vec<String>,
    #[serde(default)]
    pub rules: Vec<IngressRule>,
    #[serde(default)]
    pub tls: Vec<IngressTlsBlock>,
    pub default_backend: Option<IngressBackend>,
}

/// A Mapping CRD, narrowed to the fields the ingress resolver consults.
/// This agent never watches Mappings itself (see [`crate::ApiDocStore`]);
/// the only source for these is the gateway's own snapshot document, which
/// embeds its Mapping inventory when the gateway is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRecord {
    pub name: String,
    pub namespace: String,
    pub uid: Option<String>,
    pub service: String,
    #[serde(default)]
    pub hostname: Option<String>,
}

/// An OpenAPI document scraped from a Mapping. Always empty in this
/// implementation — see [`crate::ApiDocStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiDoc {
    pub kind: String,
    pub api_version: String,
    pub name: String,
    pub namespace: String,
    pub target_ref: Option<Value>,
    pub data: Vec<u8>,
}

/// A change record carried on the outbound document for wire compatibility.
/// The reference agent never populates this; this crate preserves the empty
/// field rather than omitting it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delta {
    pub kind: String,
    pub api_version: String,
    pub name: String,
    pub namespace: String,
    pub delta_type: DeltaType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeltaType {
    Add,
    Update,
    Delete,
}

/// The cluster-derived portion of a [`crate::Snapshot`]: merged watcher
/// state for whichever resource groups are currently active, plus any argo
/// and API-doc enrichment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KubernetesSnapshot {
    #[serde(default)]
    pub pods: Vec<k8s_openapi::api::core::v1::Pod>,
    #[serde(default)]
    pub deployments: Vec<k8s_openapi::api::apps::v1::Deployment>,
    #[serde(default, rename = "ConfigMaps")]
    pub config_maps: Vec<ConfigMap>,
    #[serde(default)]
    pub endpoints: Vec<Endpoints>,
    #[serde(default, rename = "service")]
    pub services: Vec<Service>,
    #[serde(default, rename = "ingresses")]
    pub ingresses: Vec<IngressRecord>,
    #[serde(default, rename = "secret")]
    pub secrets: Vec<Secret>,
    #[serde(default, rename = "Mapping")]
    pub mappings: Vec<MappingRecord>,
    #[serde(default, rename = "ArgoRollouts", skip_serializing_if = "Vec::is_empty")]
    pub argo_rollouts: Vec<OpaqueObject>,
    #[serde(
        default,
        rename = "ArgoApplications",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub argo_applications: Vec<OpaqueObject>,
}

impl KubernetesSnapshot {
    /// Overlays `other`'s fields onto `self`, replacing whichever watcher
    /// group currently owns each field. Used to merge core-watcher state
    /// with fallback-watcher state — the two never populate the same
    /// fields, so this is a disjoint union rather than a true merge.
    pub fn merge(mut self, other: KubernetesSnapshot) -> KubernetesSnapshot {
        if !other.pods.is_empty() {
            self.pods = other.pods;
        }
        if !other.deployments.is_empty() {
            self.deployments = other.deployments;
        }
        if !other.config_maps.is_empty() {
            self.config_maps = other.config_maps;
        }
        if !other.endpoints.is_empty() {
            self.endpoints = other.endpoints;
        }
        if !other.services.is_empty() {
            self.services = other.services;
        }
        if !other.ingresses.is_empty() {
            self.ingresses = other.ingresses;
        }
        if !other.secrets.is_empty() {
            self.secrets = other.secrets;
        }
        if !other.mappings.is_empty() {
            self.mappings = other.mappings;
        }
        if !other.argo_rollouts.is_empty() {
            self.argo_rollouts = other.argo_rollouts;
        }
        if !other.argo_applications.is_empty() {
            self.argo_applications = other.argo_applications;
        }
        self
    }
}
