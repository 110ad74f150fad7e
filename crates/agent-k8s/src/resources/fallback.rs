//! The fallback watcher group (§4.5): services plus whichever ingress API
//! the cluster exposes, used only while the gateway is absent.

use agent_core::{
    IngressBackend, IngressPath, IngressRecord, IngressRule, IngressTlsBlock, KubernetesSnapshot,
    ServicePortRef,
};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1 as net_v1;
use k8s_openapi::api::networking::v1beta1 as net_v1beta1;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::group::{member_watcher, WatcherGroup};
use crate::resources::{is_excluded_namespace, list_params, NamespaceScope};

/// Which ingress API this cluster exposes, feature-detected once at
/// construction (§4.5, added note: cached for the group's lifetime).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IngressApi {
    Stable,
    Legacy,
}

enum IngressWatchers {
    Stable(WatcherGroup<net_v1::Ingress>),
    Legacy(WatcherGroup<net_v1beta1::Ingress>),
}

pub struct FallbackWatchers {
    services: WatcherGroup<Service>,
    ingresses: IngressWatchers,
}

impl FallbackWatchers {
    /// Builds the group, probing `probe_namespace` (the first configured
    /// watch namespace, or `"default"` for cluster-wide scope) to decide
    /// which ingress API to use.
    pub async fn new(client: Client, scope: &NamespaceScope) -> anyhow::Result<Self> {
        let probe_namespace = match scope {
            NamespaceScope::Named(namespaces) => namespaces.first().cloned().unwrap_or_else(|| "default".into()),
            NamespaceScope::Cluster => "default".to_string(),
        };
        let api_kind = detect_ingress_api(client.clone(), &probe_namespace).await;

        let mut services = WatcherGroup::new();
        let ingresses = match api_kind {
            IngressApi::Stable => {
                let mut group = WatcherGroup::new();
                add_members(&mut group, scope, |ns| match ns {
                    Some(ns) => Api::namespaced(client.clone(), ns),
                    None => Api::all(client.clone()),
                })?;
                IngressWatchers::Stable(group)
            }
            IngressApi::Legacy => {
                let mut group = WatcherGroup::new();
                add_members(&mut group, scope, |ns| match ns {
                    Some(ns) => Api::namespaced(client.clone(), ns),
                    None => Api::all(client.clone()),
                })?;
                IngressWatchers::Legacy(group)
            }
        };

        match scope {
            NamespaceScope::Cluster => {
                services.add_watcher(member_watcher(&services, Api::all(client.clone()), list_params()))?;
            }
            NamespaceScope::Named(namespaces) => {
                for ns in namespaces {
                    services.add_watcher(member_watcher(
                        &services,
                        Api::namespaced(client.clone(), ns),
                        list_params(),
                    ))?;
                }
            }
        }

        Ok(FallbackWatchers { services, ingresses })
    }

    pub fn start(&self, cancel: CancellationToken) {
        self.services.start(cancel.clone());
        match &self.ingresses {
            IngressWatchers::Stable(g) => g.start(cancel),
            IngressWatchers::Legacy(g) => g.start(cancel),
        }
    }

    pub fn cancel(&self) {
        self.services.cancel();
        match &self.ingresses {
            IngressWatchers::Stable(g) => g.cancel(),
            IngressWatchers::Legacy(g) => g.cancel(),
        }
    }

    pub fn snapshot(&self) -> KubernetesSnapshot {
        let services: Vec<Service> = self
            .services
            .list()
            .into_iter()
            .filter(|s| !excluded(s))
            .collect();
        let ingresses = match &self.ingresses {
            IngressWatchers::Stable(g) => g
                .list()
                .into_iter()
                .filter(|i| !excluded(i))
                .map(normalize_stable)
                .collect(),
            IngressWatchers::Legacy(g) => g
                .list()
                .into_iter()
                .filter(|i| !excluded(i))
                .map(normalize_legacy)
                .collect(),
        };
        KubernetesSnapshot {
            services,
            ingresses,
            ..Default::default()
        }
    }
}

fn excluded(obj: &impl ResourceExt) -> bool {
    obj.namespace().map(|ns| is_excluded_namespace(&ns)).unwrap_or(false)
}

fn add_members<T: crate::watcher::Watchable>(
    group: &mut WatcherGroup<T>,
    scope: &NamespaceScope,
    api_for: impl Fn(Option<&str>) -> Api<T>,
) -> anyhow::Result<()> {
    match scope {
        NamespaceScope::Cluster => {
            group.add_watcher(member_watcher(group, api_for(None), list_params()))?;
        }
        NamespaceScope::Named(namespaces) => {
            for ns in namespaces {
                group.add_watcher(member_watcher(group, api_for(Some(ns)), list_params()))?;
            }
        }
    }
    Ok(())
}

/// Lists one ingress in `namespace` under the stable API; a success (even
/// an empty list) means the cluster exposes it, any error falls back to
/// the legacy API.
async fn detect_ingress_api(client: Client, namespace: &str) -> IngressApi {
    let api: Api<net_v1::Ingress> = Api::namespaced(client, namespace);
    match api.list(&ListParams::default().limit(1)).await {
        Ok(_) => IngressApi::Stable,
        Err(err) => {
            warn!(error = %err, "stable ingress API unavailable, falling back to legacy");
            IngressApi::Legacy
        }
    }
}

fn normalize_stable(ingress: net_v1::Ingress) -> IngressRecord {
    let name = ingress.metadata.name.clone().unwrap_or_default();
    let namespace = ingress.metadata.namespace.clone().unwrap_or_default();
    let uid = ingress.metadata.uid.clone();
    let spec = ingress.spec.unwrap_or_default();
    let status = ingress.status.unwrap_or_default();

    let load_balancer_ingress = status
        .load_balancer
        .and_then(|lb| lb.ingress)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|i| i.ip.or(i.hostname))
        .collect();

    let rules = spec
        .rules
        .unwrap_or_default()
        .into_iter()
        .map(|rule| {
            let paths = rule
                .http
                .map(|http| {
                    http.paths
                        .into_iter()
                        .filter_map(|p| {
                            let backend = p.backend.service?;
                            Some(IngressPath {
                                path: p.path,
                                backend: IngressBackend {
                                    service_name: backend.name,
                                    service_port: stable_port_ref(&backend.port),
                                },
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            IngressRule { host: rule.host, paths }
        })
        .collect();

    let tls = spec
        .tls
        .unwrap_or_default()
        .into_iter()
        .map(|t| IngressTlsBlock {
            hosts: t.hosts.unwrap_or_default(),
            secret_name: t.secret_name,
        })
        .collect();

    let default_backend = spec.default_backend.and_then(|b| {
        let svc = b.service?;
        Some(IngressBackend {
            service_name: svc.name,
            service_port: stable_port_ref(&svc.port),
        })
    });

    IngressRecord {
        name,
        namespace,
        uid,
        load_balancer_ingress,
        rules,
        tls,
        default_backend,
    }
}

/// Stable-API ports carry a name-or-number `ServiceBackendPort`; per §4.5,
/// reconstruct the legacy `IntOrString` representation: name present ->
/// use name, else -> use integer.
fn stable_port_ref(port: &Option<net_v1::ServiceBackendPort>) -> ServicePortRef {
    match port {
        Some(net_v1::ServiceBackendPort { name: Some(name), .. }) => ServicePortRef::Name(name.clone()),
        Some(net_v1::ServiceBackendPort { number: Some(num), .. }) => ServicePortRef::Number(*num),
        _ => ServicePortRef::Number(0),
    }
}

fn normalize_legacy(ingress: net_v1beta1::Ingress) -> IngressRecord {
    let name = ingress.metadata.name.clone().unwrap_or_default();
    let namespace = ingress.metadata.namespace.clone().unwrap_or_default();
    let uid = ingress.metadata.uid.clone();
    let spec = ingress.spec.unwrap_or_default();
    let status = ingress.status.unwrap_or_default();

    let load_balancer_ingress = status
        .load_balancer
        .and_then(|lb| lb.ingress)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|i| i.ip.or(i.hostname))
        .collect();

    let rules = spec
        .rules
        .unwrap_or_default()
        .into_iter()
        .map(|rule| {
            let paths = rule
                .http
                .map(|http| {
                    http.paths
                        .into_iter()
                        .filter_map(|p| {
                            let backend = p.backend;
                            let service_name = backend.service_name?;
                            Some(IngressPath {
                                path: p.path,
                                backend: IngressBackend {
                                    service_name,
                                    service_port: legacy_port_ref(&backend.service_port),
                                },
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            IngressRule { host: rule.host, paths }
        })
        .collect();

    let tls = spec
        .tls
        .unwrap_or_default()
        .into_iter()
        .map(|t| IngressTlsBlock {
            hosts: t.hosts.unwrap_or_default(),
            secret_name: t.secret_name,
        })
        .collect();

    let default_backend = spec.backend.and_then(|b| {
        let service_name = b.service_name?;
        Some(IngressBackend {
            service_name,
            service_port: legacy_port_ref(&b.service_port),
        })
    });

    IngressRecord {
        name,
        namespace,
        uid,
        load_balancer_ingress,
        rules,
        tls,
        default_backend,
    }
}

fn legacy_port_ref(port: &Option<k8s_openapi::apimachinery::pkg::util::intstr::IntOrString>) -> ServicePortRef {
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
    match port {
        Some(IntOrString::String(s)) => ServicePortRef::Name(s.clone()),
        Some(IntOrString::Int(i)) => ServicePortRef::Number(*i),
        None => ServicePortRef::Number(0),
    }
}
