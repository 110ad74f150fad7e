//! Argo Rollouts / Argo CD resources, carried without schema introspection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A cluster object whose schema this agent never inspects. It forwards
/// whatever the dynamic client returned, keyed only by name for coalescing
/// watch events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpaqueObject {
    pub kind: String,
    pub api_version: String,
    pub metadata: Value,
    pub raw: Value,
}

impl OpaqueObject {
    pub fn name(&self) -> Option<&str> {
        self.metadata.get("name")?.as_str()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata.get("namespace")?.as_str()
    }
}

/// A name-keyed store that coalesces `ADDED`/`MODIFIED`/`DELETED` events
/// for one dynamically discovered argo resource kind into the current
/// state of the world.
#[derive(Debug, Clone, Default)]
pub struct OpaqueStore {
    by_key: std::collections::HashMap<(String, String), OpaqueObject>,
}

impl OpaqueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_added_or_modified(&mut self, obj: OpaqueObject) {
        let key = (
            obj.namespace().unwrap_or_default().to_string(),
            obj.name().unwrap_or_default().to_string(),
        );
        self.by_key.insert(key, obj);
    }

    pub fn apply_deleted(&mut self, namespace: &str, name: &str) {
        self.by_key
            .remove(&(namespace.to_string(), name.to_string()));
    }

    /// The current state of the world, in unspecified order.
    pub fn state_of_world(&self) -> Vec<OpaqueObject> {
        self.by_key.values().cloned().collect()
    }
}
