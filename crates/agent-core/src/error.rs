//! Typed error kinds for the agent's domain logic (§7 error kinds that
//! originate below the binary boundary; `agentd` composes these under
//! `anyhow`).

use thiserror::Error;

/// A tick-scoped failure: the reporter loop logs it and moves on to the
/// next tick rather than aborting, per the propagation policy in §7.
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("fetching gateway document: {0}")]
    Fetch(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("gateway document had status {status}")]
    FetchStatus { status: u16 },
    #[error("parsing gateway document: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("snapshot missing cluster identity, skipping tick")]
    MissingIdentity,
}

/// A directive command that could not be carried out. Reported back to the
/// Director via `ReportCommandResult`, never fatal to the loop.
#[derive(Debug, Error)]
pub enum DirectiveError {
    #[error("secret {namespace}/{name} is owned by another writer and cannot be synced")]
    SecretConflict { namespace: String, name: String },
    #[error("kubernetes API error syncing secret {namespace}/{name}: {source}")]
    Kubernetes {
        namespace: String,
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
