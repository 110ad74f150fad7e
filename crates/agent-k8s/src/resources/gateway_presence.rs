//! Gateway-presence detection: a single bit of state, sourced from an
//! equality-deduplicated watch on endpoints in the agent's own namespace.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use k8s_openapi::api::core::v1::Endpoints;
use kube::api::{Api, ListParams};
use kube::Client;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::watcher::Watcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceEdge {
    BecamePresent,
    BecameAbsent,
    Unchanged,
}

/// Detects whether the gateway's admin endpoint exists in the agent's
/// namespace. Backed by a watcher whose equality predicate treats any two
/// existing objects as equal, so only existence edges (not content
/// changes) ever wake a subscriber.
pub struct GatewayPresence {
    watcher: Arc<Watcher<Endpoints>>,
    endpoint_name: String,
    present: AtomicBool,
}

impl GatewayPresence {
    pub fn new(client: Client, agent_namespace: &str, gateway_snapshot_url: &str) -> Self {
        let endpoint_name = first_dns_label(gateway_snapshot_url);
        let api: Api<Endpoints> = Api::namespaced(client, agent_namespace);
        let watcher = Arc::new(
            Watcher::new(api, ListParams::default())
                .with_equals(Arc::new(|_prev: &Endpoints, _next: &Endpoints| true)),
        );
        GatewayPresence {
            watcher,
            endpoint_name,
            present: AtomicBool::new(false),
        }
    }

    pub fn start(&self, cancel: CancellationToken) {
        self.watcher.start(cancel);
    }

    pub fn cancel(&self) {
        self.watcher.cancel();
    }

    pub fn notify(&self) -> Arc<Notify> {
        self.watcher.notify()
    }

    /// Re-derives the presence bit from the watcher's current cache,
    /// returning the edge crossed (if any) since the last call.
    pub fn refresh(&self) -> PresenceEdge {
        let now_present = self
            .watcher
            .list()
            .iter()
            .any(|e| e.metadata.name.as_deref() == Some(self.endpoint_name.as_str()));
        let was_present = self.present.swap(now_present, Ordering::SeqCst);
        match (was_present, now_present) {
            (false, true) => PresenceEdge::BecamePresent,
            (true, false) => PresenceEdge::BecameAbsent,
            _ => PresenceEdge::Unchanged,
        }
    }

    pub fn is_present(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }
}

/// Extracts the first DNS label of a URL's host, e.g.
/// `http://ambassador-admin:8005/snapshot-external` -> `ambassador-admin`.
fn first_dns_label(url: &str) -> String {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    let host_and_port = without_scheme.split('/').next().unwrap_or(without_scheme);
    let host = host_and_port.split(':').next().unwrap_or(host_and_port);
    host.split('.').next().unwrap_or(host).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_label_from_full_url() {
        assert_eq!(
            first_dns_label("http://ambassador-admin:8005/snapshot-external"),
            "ambassador-admin"
        );
    }

    #[test]
    fn extracts_label_from_bare_host() {
        assert_eq!(first_dns_label("ambassador-admin"), "ambassador-admin");
    }

    #[test]
    fn extracts_label_from_fqdn() {
        assert_eq!(
            first_dns_label("http://ambassador-admin.ambassador.svc.cluster.local:8005/x"),
            "ambassador-admin"
        );
    }
}
