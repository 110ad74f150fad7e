//! The config watcher bundle (§4.3): secrets and config-maps restricted to
//! the agent's own namespace, the data source the token resolver runs its
//! precedence rule over.

use std::collections::BTreeMap;
use std::sync::Arc;

use agent_core::token::{resolve_effective_token, NamedData};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client, ResourceExt};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::resources::list_params;
use crate::watcher::Watcher;

/// Watches secrets and config-maps in the agent's own namespace and exposes
/// the token-resolution precedence rule over their current contents.
pub struct ConfigWatchers {
    secrets: Arc<Watcher<Secret>>,
    config_maps: Arc<Watcher<ConfigMap>>,
    config_resource_name: Option<String>,
    bootstrap_env: String,
}

impl ConfigWatchers {
    pub fn new(
        client: Client,
        agent_namespace: &str,
        config_resource_name: Option<String>,
        bootstrap_env: impl Into<String>,
    ) -> Self {
        let notify = Arc::new(Notify::new());
        let secrets_api: Api<Secret> = Api::namespaced(client.clone(), agent_namespace);
        let config_maps_api: Api<ConfigMap> = Api::namespaced(client, agent_namespace);
        ConfigWatchers {
            secrets: Arc::new(Watcher::with_notify(secrets_api, list_params(), notify.clone())),
            config_maps: Arc::new(Watcher::with_notify(config_maps_api, list_params(), notify)),
            config_resource_name,
            bootstrap_env: bootstrap_env.into(),
        }
    }

    pub fn start(&self, cancel: CancellationToken) {
        self.secrets.start(cancel.clone());
        self.config_maps.start(cancel);
    }

    pub fn cancel(&self) {
        self.secrets.cancel();
        self.config_maps.cancel();
    }

    /// Fires whenever either watcher observes a change.
    pub fn notify(&self) -> Arc<Notify> {
        self.secrets.notify()
    }

    /// Re-runs the token precedence rule (§4.3) over the watchers' current
    /// cache contents.
    pub fn resolve_token(&self) -> String {
        let secrets = self.secrets.list();
        let config_maps = self.config_maps.list();

        let secret_names: Vec<String> = secrets.iter().map(|s| s.name_any()).collect();
        let secret_data: Vec<BTreeMap<String, String>> = secrets.iter().map(decode_secret_data).collect();
        let secret_views: Vec<NamedData<'_>> = secret_names
            .iter()
            .zip(secret_data.iter())
            .map(|(name, data)| NamedData {
                name: name.as_str(),
                data,
            })
            .collect();

        let cm_names: Vec<String> = config_maps.iter().map(|c| c.name_any()).collect();
        let cm_data: Vec<BTreeMap<String, String>> = config_maps
            .iter()
            .map(|c| c.data.clone().unwrap_or_default())
            .collect();
        let cm_views: Vec<NamedData<'_>> = cm_names
            .iter()
            .zip(cm_data.iter())
            .map(|(name, data)| NamedData {
                name: name.as_str(),
                data,
            })
            .collect();

        resolve_effective_token(
            secret_views,
            cm_views,
            self.config_resource_name.as_deref(),
            &self.bootstrap_env,
        )
    }
}

fn decode_secret_data(secret: &Secret) -> BTreeMap<String, String> {
    secret
        .data
        .as_ref()
        .map(|data| {
            data.iter()
                .map(|(k, v)| (k.clone(), String::from_utf8_lossy(&v.0).into_owned()))
                .collect()
        })
        .unwrap_or_default()
}
