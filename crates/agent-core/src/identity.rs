//! Report identity and envelope types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies which agent instance produced a report, carried alongside
/// every outbound document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub hostname: String,
    pub cluster_id: String,
    pub label: String,
    pub version: String,
}

impl Identity {
    /// Builds the identity used when the gateway is absent and the agent
    /// synthesizes its own metadata rather than adopting the gateway's.
    pub fn standalone(cluster_id: impl Into<String>, ambassador_id: impl Into<String>) -> Self {
        Identity {
            hostname: ambassador_id.into(),
            cluster_id: cluster_id.into(),
            label: "standalone".to_string(),
            version: agent_ore::build_info::VERSION.to_string(),
        }
    }
}

/// The stamped, ready-to-send form of an assembled report: an
/// [`Identity`] plus a self-describing document and its content type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub identity: Identity,
    pub raw: Vec<u8>,
    pub content_type: String,
    pub api_version: String,
    pub timestamp: DateTime<Utc>,
}

impl Report {
    pub fn new(identity: Identity, raw: Vec<u8>, content_type: impl Into<String>) -> Self {
        Report {
            identity,
            raw,
            content_type: content_type.into(),
            api_version: "v1".to_string(),
            timestamp: Utc::now(),
        }
    }
}
