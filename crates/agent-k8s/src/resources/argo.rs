//! The argo discovery loop (§4.7): periodically checks the cluster's
//! resource-discovery API for `rollouts.v1alpha1.argoproj.io` and
//! `applications.v1alpha1.argoproj.io`, starting or cancelling a dynamic
//! watch for each as it appears or disappears.

use std::sync::Arc;
use std::time::Duration;

use agent_core::argo::{OpaqueObject, OpaqueStore};
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::discovery::Discovery;
use kube::{Api, Client};
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::watcher::Watcher;

const GROUP: &str = "argoproj.io";
const VERSION: &str = "v1alpha1";
const ROLLOUT_KIND: &str = "Rollout";
const ROLLOUT_PLURAL: &str = "rollouts";
const APPLICATION_KIND: &str = "Application";
const APPLICATION_PLURAL: &str = "applications";

/// Re-checks for the two argo resource kinds on this interval once both are
/// present (before that, checks more eagerly — see [`ArgoLoop::run`]).
const STEADY_STATE_INTERVAL: Duration = Duration::from_secs(30 * 60);
const DISCOVERY_INTERVAL: Duration = Duration::from_secs(60);

struct TrackedKind {
    plural: &'static str,
    kind: &'static str,
    store: Arc<Mutex<OpaqueStore>>,
    watcher: Mutex<Option<(Arc<Watcher<DynamicObject>>, CancellationToken)>>,
}

/// Owns the rollout and application stores plus the discovery loop that
/// keeps their underlying dynamic watches matched to cluster reality.
pub struct ArgoLoop {
    client: Client,
    rollouts: TrackedKind,
    applications: TrackedKind,
}

impl ArgoLoop {
    pub fn new(client: Client) -> Self {
        ArgoLoop {
            client,
            rollouts: TrackedKind {
                plural: ROLLOUT_PLURAL,
                kind: ROLLOUT_KIND,
                store: Arc::new(Mutex::new(OpaqueStore::new())),
                watcher: Mutex::new(None),
            },
            applications: TrackedKind {
                plural: APPLICATION_PLURAL,
                kind: APPLICATION_KIND,
                store: Arc::new(Mutex::new(OpaqueStore::new())),
                watcher: Mutex::new(None),
            },
        }
    }

    pub fn rollouts_state(&self) -> Vec<OpaqueObject> {
        self.rollouts.store.lock().state_of_world()
    }

    pub fn applications_state(&self) -> Vec<OpaqueObject> {
        self.applications.store.lock().state_of_world()
    }

    /// Runs until `cancel` fires: on each tick, checks whether each kind's
    /// group-version-resource exists and starts/stops its dynamic watch to
    /// match. Ticks every 60s until both kinds have been seen at least
    /// once, then settles to a 30-minute cadence (§4.7).
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = DISCOVERY_INTERVAL;
        loop {
            self.reconcile_kind(&self.rollouts).await;
            self.reconcile_kind(&self.applications).await;

            if self.rollouts.watcher.lock().is_some() && self.applications.watcher.lock().is_some() {
                interval = STEADY_STATE_INTERVAL;
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => {
                    self.rollouts.cancel();
                    self.applications.cancel();
                    return;
                }
            }
        }
    }

    async fn reconcile_kind(&self, tracked: &TrackedKind) {
        let present = self.resource_exists(tracked.plural).await;
        let already_watching = tracked.watcher.lock().is_some();
        match (present, already_watching) {
            (true, false) => self.start_kind(tracked),
            (false, true) => tracked.cancel(),
            _ => {}
        }
    }

    async fn resource_exists(&self, plural: &str) -> bool {
        match Discovery::new(self.client.clone()).run().await {
            Ok(discovery) => discovery.groups().any(|group| {
                group.name() == GROUP
                    && group
                        .recommended_resources()
                        .iter()
                        .any(|(resource, _)| resource.plural == plural)
            }),
            Err(err) => {
                debug!(error = %err, "resource discovery failed, treating argo resources as absent");
                false
            }
        }
    }

    fn start_kind(&self, tracked: &TrackedKind) {
        let gvk = GroupVersionKind::gvk(GROUP, VERSION, tracked.kind);
        let api_resource = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &api_resource);
        let watcher = Arc::new(Watcher::new(api, ListParams::default()));
        let cancel = CancellationToken::new();
        watcher.start(cancel.clone());
        info!(kind = tracked.kind, "started argo dynamic watch");
        *tracked.watcher.lock() = Some((watcher, cancel));
        self.drain_into_store(tracked);
    }

    /// Periodically (driven by the caller observing the shared notify)
    /// copies the dynamic watcher's cache into the typed opaque store; the
    /// watcher primitive already coalesces change notifications, so this
    /// is cheap to call from the reporter loop's own tick.
    fn drain_into_store(&self, tracked: &TrackedKind) {
        let Some((watcher, _)) = tracked.watcher.lock().clone() else {
            return;
        };
        let mut store = OpaqueStore::new();
        for obj in watcher.list() {
            store.apply_added_or_modified(to_opaque(&obj));
        }
        *tracked.store.lock() = store;
    }

    /// Refreshes both stores from their current watcher caches. Called by
    /// the reporter loop whenever an argo-event wakeup fires.
    pub fn refresh(&self) {
        self.drain_into_store(&self.rollouts);
        self.drain_into_store(&self.applications);
    }
}

impl TrackedKind {
    fn cancel(&self) {
        if let Some((watcher, cancel)) = self.watcher.lock().take() {
            cancel.cancel();
            watcher.cancel();
        }
        *self.store.lock() = OpaqueStore::new();
    }
}

fn to_opaque(obj: &DynamicObject) -> OpaqueObject {
    let kind = obj
        .types
        .as_ref()
        .map(|t| t.kind.clone())
        .unwrap_or_default();
    let api_version = obj
        .types
        .as_ref()
        .map(|t| t.api_version.clone())
        .unwrap_or_default();
    let metadata: Value = serde_json::to_value(&obj.metadata).unwrap_or(Value::Null);
    let raw = obj.data.clone();
    OpaqueObject {
        kind,
        api_version,
        metadata,
        raw,
    }
}
