//! The core watcher group: pods, deployments, config-maps, and endpoints
//! across the configured namespace list (or the whole cluster, if empty).

use agent_core::KubernetesSnapshot;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Pod};
use kube::{Api, Client, ResourceExt};
use tokio_util::sync::CancellationToken;

use crate::group::{member_watcher, WatcherGroup};
use crate::resources::{is_excluded_namespace, list_params, NamespaceScope};

pub struct CoreWatchers {
    pub pods: WatcherGroup<Pod>,
    pub deployments: WatcherGroup<Deployment>,
    pub config_maps: WatcherGroup<ConfigMap>,
    pub endpoints: WatcherGroup<Endpoints>,
}

impl CoreWatchers {
    pub fn new(client: Client, scope: &NamespaceScope) -> anyhow::Result<Self> {
        let mut pods = WatcherGroup::new();
        let mut deployments = WatcherGroup::new();
        let mut config_maps = WatcherGroup::new();
        let mut endpoints = WatcherGroup::new();

        match scope {
            NamespaceScope::Cluster => {
                pods.add_watcher(member_watcher(&pods, Api::all(client.clone()), list_params()))?;
                deployments.add_watcher(member_watcher(&deployments, Api::all(client.clone()), list_params()))?;
                config_maps.add_watcher(member_watcher(&config_maps, Api::all(client.clone()), list_params()))?;
                endpoints.add_watcher(member_watcher(&endpoints, Api::all(client.clone()), list_params()))?;
            }
            NamespaceScope::Named(namespaces) => {
                for ns in namespaces {
                    pods.add_watcher(member_watcher(&pods, Api::namespaced(client.clone(), ns), list_params()))?;
                    deployments.add_watcher(member_watcher(
                        &deployments,
                        Api::namespaced(client.clone(), ns),
                        list_params(),
                    ))?;
                    config_maps.add_watcher(member_watcher(
                        &config_maps,
                        Api::namespaced(client.clone(), ns),
                        list_params(),
                    ))?;
                    endpoints.add_watcher(member_watcher(
                        &endpoints,
                        Api::namespaced(client.clone(), ns),
                        list_params(),
                    ))?;
                }
            }
        }

        Ok(CoreWatchers {
            pods,
            deployments,
            config_maps,
            endpoints,
        })
    }

    pub fn start(&self, cancel: CancellationToken) {
        self.pods.start(cancel.clone());
        self.deployments.start(cancel.clone());
        self.config_maps.start(cancel.clone());
        self.endpoints.start(cancel);
    }

    pub fn cancel(&self) {
        self.pods.cancel();
        self.deployments.cancel();
        self.config_maps.cancel();
        self.endpoints.cancel();
    }

    /// The current state of all four resource kinds, post-filtered per the
    /// core watcher group's exclusion rules.
    pub fn snapshot(&self) -> KubernetesSnapshot {
        KubernetesSnapshot {
            pods: self
                .pods
                .list()
                .into_iter()
                .filter(|p| !is_excluded(p))
                .filter(|p| !is_succeeded(p))
                .collect(),
            deployments: self.deployments.list().into_iter().filter(|d| !is_excluded(d)).collect(),
            config_maps: self
                .config_maps
                .list()
                .into_iter()
                .filter(|c| !is_excluded(c))
                .collect(),
            endpoints: self.endpoints.list().into_iter().filter(|e| !is_excluded(e)).collect(),
            ..Default::default()
        }
    }
}

fn is_excluded(obj: &impl ResourceExt) -> bool {
    obj.namespace()
        .map(|ns| is_excluded_namespace(&ns))
        .unwrap_or(false)
}

fn is_succeeded(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map(|phase| phase == "Succeeded")
        .unwrap_or(false)
}
