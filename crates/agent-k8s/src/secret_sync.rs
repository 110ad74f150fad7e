//! Executes `secret-sync` directive commands against the cluster API
//! (§4.12): `SET` upserts a secret carrying a single `token` key, `DELETE`
//! removes it.
//!
//! Open question (§9, "secret-sync semantics"): the source is ambiguous
//! about whether `SET` on a secret owned by something else should patch or
//! refuse. This crate refuses and surfaces a [`SecretConflictError`] rather
//! than guessing, per the design note's recommendation.

use std::collections::BTreeMap;

use agent_core::directive::{SecretSyncAction, SecretSyncCommand};
use agent_core::error::DirectiveError;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::{Client, ResourceExt};

/// The label this agent stamps on every secret it creates, used to detect a
/// pre-existing secret it doesn't own before overwriting it.
const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const MANAGED_BY_VALUE: &str = "ambassador-agent";

/// Runs one secret-sync command to completion.
pub async fn execute(client: Client, command: &SecretSyncCommand) -> Result<(), DirectiveError> {
    let api: Api<Secret> = Api::namespaced(client, &command.namespace);
    match command.action {
        SecretSyncAction::Set => set(&api, command).await,
        SecretSyncAction::Delete => delete(&api, command).await,
    }
}

async fn set(api: &Api<Secret>, command: &SecretSyncCommand) -> Result<(), DirectiveError> {
    let payload = command.payload.clone().unwrap_or_default();

    match api.get(&command.name).await {
        Ok(existing) => {
            if !is_managed_by_us(&existing) {
                return Err(DirectiveError::SecretConflict {
                    namespace: command.namespace.clone(),
                    name: command.name.clone(),
                });
            }
            let mut data = BTreeMap::new();
            data.insert("token".to_string(), ByteString(payload.into_bytes()));
            let replacement = Secret {
                metadata: managed_metadata(&command.name, existing.resource_version()),
                data: Some(data),
                ..Default::default()
            };
            api.replace(&command.name, &PostParams::default(), &replacement)
                .await
                .map_err(|err| kube_err(command, err))?;
            Ok(())
        }
        Err(kube::Error::Api(resp)) if resp.code == 404 => {
            let mut data = BTreeMap::new();
            data.insert("token".to_string(), ByteString(payload.into_bytes()));
            let secret = Secret {
                metadata: managed_metadata(&command.name, None),
                data: Some(data),
                ..Default::default()
            };
            api.create(&PostParams::default(), &secret)
                .await
                .map_err(|err| kube_err(command, err))?;
            Ok(())
        }
        Err(err) => Err(kube_err(command, err)),
    }
}

async fn delete(api: &Api<Secret>, command: &SecretSyncCommand) -> Result<(), DirectiveError> {
    match api.get(&command.name).await {
        Ok(existing) if !is_managed_by_us(&existing) => Err(DirectiveError::SecretConflict {
            namespace: command.namespace.clone(),
            name: command.name.clone(),
        }),
        Ok(_) => {
            api.delete(&command.name, &DeleteParams::default())
                .await
                .map_err(|err| kube_err(command, err))?;
            Ok(())
        }
        Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
        Err(err) => Err(kube_err(command, err)),
    }
}

fn is_managed_by_us(secret: &Secret) -> bool {
    secret
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(MANAGED_BY_LABEL))
        .map(|v| v == MANAGED_BY_VALUE)
        .unwrap_or(false)
}

fn managed_metadata(name: &str, resource_version: Option<String>) -> ObjectMeta {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    ObjectMeta {
        name: Some(name.to_string()),
        resource_version,
        labels: Some(labels),
        ..Default::default()
    }
}

fn kube_err(command: &SecretSyncCommand, err: kube::Error) -> DirectiveError {
    DirectiveError::Kubernetes {
        namespace: command.namespace.clone(),
        name: command.name.clone(),
        source: Box::new(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmanaged_secret_is_not_recognized_as_ours() {
        let secret = Secret::default();
        assert!(!is_managed_by_us(&secret));
    }

    #[test]
    fn managed_metadata_carries_the_marker_label() {
        let meta = managed_metadata("tok", None);
        assert_eq!(
            meta.labels.unwrap().get(MANAGED_BY_LABEL).map(String::as_str),
            Some(MANAGED_BY_VALUE)
        );
    }
}
