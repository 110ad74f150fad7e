//! Typed resource-watcher bundles: the concrete watcher groups the reporter
//! loop wires up, each a composition of the generic [`crate::watcher::Watcher`]
//! rather than a subclass.

pub mod argo;
pub mod config;
pub mod core;
pub mod fallback;
pub mod gateway_presence;

use kube::api::ListParams;

/// Namespaces to scope a resource group to: `Some(names)` watches exactly
/// those namespaces (one watcher each), `None` watches the whole cluster
/// with a single watcher.
pub enum NamespaceScope {
    Cluster,
    Named(Vec<String>),
}

impl NamespaceScope {
    pub fn from_configured(namespaces: &[String]) -> Self {
        if namespaces.is_empty() {
            NamespaceScope::Cluster
        } else {
            NamespaceScope::Named(namespaces.to_vec())
        }
    }
}

pub(crate) fn list_params() -> ListParams {
    ListParams::default()
}

/// Whether a namespace is permanently excluded from core-watcher reporting.
pub(crate) fn is_excluded_namespace(namespace: &str) -> bool {
    namespace == "kube-system"
}
