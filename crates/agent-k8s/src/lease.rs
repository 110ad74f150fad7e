//! The leader elector (§4.11): a single-winner lease over the cluster's
//! coordination API. Field values (`lease_duration = 60s`, `renew_deadline =
//! 40s`, `retry_period = 8s`) are part of the observable contract and must
//! not change — older agents in the same cluster interoperate against them.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const LEASE_NAME: &str = "ambassador-agent-lease-lock";
pub const LEASE_DURATION: Duration = Duration::from_secs(60);
pub const RENEW_DEADLINE: Duration = Duration::from_secs(40);
pub const RETRY_PERIOD: Duration = Duration::from_secs(8);

/// Whether the initial lease-get came back `Forbidden`: the caller should
/// skip leader election entirely and run the reporter unconditionally
/// (documented degraded mode, I1 becomes best-effort).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    Elected,
    Forbidden,
}

/// A lease-based mutual-exclusion lock over one `coordination.k8s.io/v1`
/// `Lease` object, built directly on the resource rather than a
/// ready-made helper (kept in `agent-k8s` rather than `agent-core` since it
/// needs a live `kube::Client`).
pub struct LeaseLock {
    api: Api<Lease>,
    identity: String,
}

impl LeaseLock {
    pub fn new(client: Client, namespace: &str, identity: impl Into<String>) -> Self {
        LeaseLock {
            api: Api::namespaced(client, namespace),
            identity: identity.into(),
        }
    }

    /// Probes whether this identity is even permitted to read the lease;
    /// per §4.11, a `Forbidden` response here means leader election is
    /// skipped entirely for the life of the process.
    pub async fn probe(&self) -> LeaseOutcome {
        match self.api.get(LEASE_NAME).await {
            Err(kube::Error::Api(resp)) if resp.code == 403 => LeaseOutcome::Forbidden,
            _ => LeaseOutcome::Elected,
        }
    }

    /// Runs the elect/renew/release loop until `cancel` fires, invoking
    /// `on_started_leading` when this identity acquires the lease and
    /// awaiting its returned future for the duration of the leadership term;
    /// when leadership is lost (renewal failed or the term holder changed),
    /// the future is dropped, cancelling whatever it is guarding.
    pub async fn run<F, Fut>(&self, cancel: CancellationToken, mut on_started_leading: F)
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            match self.try_acquire().await {
                Ok(true) => {
                    info!(identity = %self.identity, "acquired leader lease");
                    let leading_cancel = CancellationToken::new();
                    let guard = leading_cancel.clone();
                    let task = tokio::spawn(on_started_leading(leading_cancel.clone()));
                    self.hold_while_leading(&cancel, &leading_cancel).await;
                    guard.cancel();
                    let _ = task.await;
                    let _ = self.release().await;
                }
                Ok(false) => {
                    tokio::select! {
                        _ = tokio::time::sleep(RETRY_PERIOD) => {}
                        _ = cancel.cancelled() => return,
                    }
                }
                Err(err) => {
                    warn!(error = %err, "leader election: error acquiring lease, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(RETRY_PERIOD) => {}
                        _ = cancel.cancelled() => return,
                    }
                }
            }
        }
    }

    /// Renews the lease every `RETRY_PERIOD` until renewal fails, the
    /// renew deadline is blown, or `cancel`/`leading_cancel` fires.
    async fn hold_while_leading(&self, cancel: &CancellationToken, leading_cancel: &CancellationToken) {
        let mut last_renew_ok = Utc::now();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(RETRY_PERIOD) => {}
                _ = cancel.cancelled() => return,
                _ = leading_cancel.cancelled() => return,
            }
            match self.renew().await {
                Ok(()) => last_renew_ok = Utc::now(),
                Err(err) => {
                    warn!(error = %err, "leader election: renew failed");
                    let elapsed = Utc::now().signed_duration_since(last_renew_ok);
                    if elapsed.to_std().unwrap_or_default() >= RENEW_DEADLINE {
                        warn!("leader election: renew deadline exceeded, stepping down");
                        return;
                    }
                }
            }
        }
    }

    async fn try_acquire(&self) -> Result<bool, kube::Error> {
        match self.api.get(LEASE_NAME).await {
            Ok(existing) => {
                if self.is_expired_or_unheld(&existing) {
                    self.take_over(existing.resource_version()).await?;
                    Ok(true)
                } else {
                    Ok(existing.spec.as_ref().and_then(|s| s.holder_identity.as_deref()) == Some(&self.identity))
                }
            }
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                self.create().await?;
                Ok(true)
            }
            Err(err) => Err(err),
        }
    }

    fn is_expired_or_unheld(&self, lease: &Lease) -> bool {
        let Some(spec) = lease.spec.as_ref() else {
            return true;
        };
        let Some(holder) = spec.holder_identity.as_deref() else {
            return true;
        };
        if holder == self.identity {
            return false;
        }
        let Some(renew_time) = spec.renew_time.as_ref() else {
            return true;
        };
        let duration = spec
            .lease_duration_seconds
            .map(|secs| Duration::from_secs(secs as u64))
            .unwrap_or(LEASE_DURATION);
        let expiry = renew_time.0 + chrono::Duration::from_std(duration).unwrap_or_default();
        Utc::now() > expiry
    }

    async fn create(&self) -> Result<(), kube::Error> {
        let lease = Lease {
            metadata: kube::api::ObjectMeta {
                name: Some(LEASE_NAME.to_string()),
                ..Default::default()
            },
            spec: Some(self.spec_for_acquisition(1)),
        };
        self.api.create(&PostParams::default(), &lease).await?;
        Ok(())
    }

    async fn take_over(&self, resource_version: Option<String>) -> Result<(), kube::Error> {
        let lease = Lease {
            metadata: kube::api::ObjectMeta {
                name: Some(LEASE_NAME.to_string()),
                resource_version,
                ..Default::default()
            },
            spec: Some(self.spec_for_acquisition(1)),
        };
        self.api
            .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&lease))
            .await?;
        Ok(())
    }

    async fn renew(&self) -> Result<(), kube::Error> {
        let existing = self.api.get(LEASE_NAME).await?;
        let transitions = existing
            .spec
            .as_ref()
            .and_then(|s| s.lease_transitions)
            .unwrap_or(0);
        let lease = Lease {
            metadata: kube::api::ObjectMeta {
                name: Some(LEASE_NAME.to_string()),
                resource_version: existing.resource_version(),
                ..Default::default()
            },
            spec: Some(self.spec_for_acquisition(transitions)),
        };
        self.api
            .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&lease))
            .await?;
        Ok(())
    }

    async fn release(&self) -> Result<(), kube::Error> {
        let existing = self.api.get(LEASE_NAME).await?;
        if existing.spec.as_ref().and_then(|s| s.holder_identity.as_deref()) != Some(&self.identity) {
            return Ok(());
        }
        let lease = Lease {
            metadata: kube::api::ObjectMeta {
                name: Some(LEASE_NAME.to_string()),
                resource_version: existing.resource_version(),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: None,
                ..Default::default()
            }),
        };
        self.api
            .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&lease))
            .await?;
        Ok(())
    }

    fn spec_for_acquisition(&self, lease_transitions: i32) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(self.identity.clone()),
            lease_duration_seconds: Some(LEASE_DURATION.as_secs() as i32),
            acquire_time: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime(Utc::now())),
            renew_time: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime(Utc::now())),
            lease_transitions: Some(lease_transitions),
            ..Default::default()
        }
    }
}

/// Shares an `Arc<LeaseLock>` across the spawned leadership closures without
/// requiring every call site to manage the lifetime itself.
pub type SharedLeaseLock = Arc<LeaseLock>;
