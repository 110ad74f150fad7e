//! The assembled-but-not-yet-sent snapshot, and the mutex-guarded slot the
//! ingress resolver reads from without blocking the reporter loop.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::kubernetes::KubernetesSnapshot;
use crate::{ApiDoc, Delta};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmbassadorMeta {
    pub cluster_id: String,
    pub ambassador_id: String,
    pub ambassador_version: String,
    pub kube_version: String,
}

/// The cluster-facing document this agent sends on the snapshot stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub ambassador_meta: AmbassadorMeta,
    pub kubernetes: KubernetesSnapshot,
    #[serde(default)]
    pub deltas: Vec<Delta>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_docs: Vec<ApiDoc>,
}

/// Holds the most recently assembled snapshot for the ingress resolver to
/// read (§4.13 step 1) without contending with the reporter loop's next
/// assembly.
#[derive(Default)]
pub struct CurrentSnapshot {
    inner: Mutex<Option<KubernetesSnapshot>>,
}

impl CurrentSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, snapshot: KubernetesSnapshot) {
        *self.inner.lock().expect("snapshot lock poisoned") = Some(snapshot);
    }

    pub fn get(&self) -> Option<KubernetesSnapshot> {
        self.inner.lock().expect("snapshot lock poisoned").clone()
    }
}
