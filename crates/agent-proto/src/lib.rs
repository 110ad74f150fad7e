//! Generated protobuf/tonic types for the fleet agent's two RPC surfaces
//! (§6: the Director's `AgentComm` stream and the local `AgentService`),
//! plus the conversions between those wire types and the plain domain
//! types in `agent-core`.
//!
//! Follows a `RustType`/`ProtoType` convention: generated code stays in its
//! own module, hand-written `From`/`TryFrom` impls bridge it to the types
//! the rest of the workspace actually operates on, and nothing outside this
//! crate ever names a generated type directly.

use agent_core::{
    AggregatedMetrics, Command, CommandResult, Directive, Identity, IngressInfoRequest,
    IngressInfoResponse, MetricFamily, MetricSample, Report, SecretSyncAction, SecretSyncCommand,
};

tonic::include_proto!("agent");

/// A conversion that cannot fail structurally but can discover the wire
/// message was missing a field this crate treats as required.
#[derive(Debug, thiserror::Error)]
pub enum ProtoConversionError {
    #[error("message is missing required field `{0}`")]
    MissingField(&'static str),
}

impl From<Identity> for self::Identity {
    fn from(identity: Identity) -> Self {
        self::Identity {
            hostname: identity.hostname,
            cluster_id: identity.cluster_id,
            label: identity.label,
            version: identity.version,
        }
    }
}

impl From<self::Identity> for Identity {
    fn from(identity: self::Identity) -> Self {
        Identity {
            hostname: identity.hostname,
            cluster_id: identity.cluster_id,
            label: identity.label,
            version: identity.version,
        }
    }
}

/// Stamps a [`Report`] (the generic "assembled and ready to send" type) as
/// a wire `Snapshot` message.
pub fn report_to_snapshot(report: Report) -> self::Snapshot {
    self::Snapshot {
        identity: Some(report.identity.into()),
        raw: report.raw,
        content_type: report.content_type,
        api_version: report.api_version,
        timestamp_unix_millis: report.timestamp.timestamp_millis(),
    }
}

/// Stamps a [`Report`] as a wire `Diagnostics` message.
pub fn report_to_diagnostics(report: Report) -> self::Diagnostics {
    self::Diagnostics {
        identity: Some(report.identity.into()),
        raw: report.raw,
        content_type: report.content_type,
        api_version: report.api_version,
        timestamp_unix_millis: report.timestamp.timestamp_millis(),
    }
}

/// Builds a wire `MetricBatch` from one instance's drained, already
/// filtered families (§4.9's replace-on-write aggregator has already run).
pub fn metric_batch(instance: String, families: Vec<MetricFamily>) -> self::MetricBatch {
    self::MetricBatch {
        instance,
        families: families.into_iter().map(Into::into).collect(),
    }
}

/// Flattens a whole drained [`AggregatedMetrics`] map into one batch per
/// instance, the shape the `StreamMetrics` leg of the Director RPC sends.
pub fn metric_batches_from_drain(
    drained: std::collections::HashMap<String, Vec<MetricFamily>>,
) -> Vec<self::MetricBatch> {
    drained
        .into_iter()
        .map(|(instance, families)| metric_batch(instance, families))
        .collect()
}

impl From<MetricFamily> for self::MetricFamily {
    fn from(family: MetricFamily) -> Self {
        self::MetricFamily {
            name: family.name,
            samples: family.samples.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<self::MetricFamily> for MetricFamily {
    fn from(family: self::MetricFamily) -> Self {
        MetricFamily {
            name: family.name,
            samples: family.samples.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<MetricSample> for self::MetricSample {
    fn from(sample: MetricSample) -> Self {
        self::MetricSample {
            labels: sample.labels.into_iter().collect(),
            value: sample.value,
        }
    }
}

impl From<self::MetricSample> for MetricSample {
    fn from(sample: self::MetricSample) -> Self {
        MetricSample {
            labels: sample.labels.into_iter().collect(),
            value: sample.value,
        }
    }
}

impl From<CommandResult> for self::CommandResult {
    fn from(result: CommandResult) -> Self {
        self::CommandResult {
            command_id: result.command_id,
            ok: result.ok,
            error: result.error,
        }
    }
}

impl TryFrom<self::Directive> for Directive {
    type Error = ProtoConversionError;

    fn try_from(directive: self::Directive) -> Result<Self, Self::Error> {
        let commands = directive
            .commands
            .into_iter()
            .map(Command::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Directive {
            id: directive.id,
            stop_reporting: directive.stop_reporting,
            min_report_period_secs: directive.min_report_period_secs,
            commands,
        })
    }
}

impl TryFrom<self::Command> for Command {
    type Error = ProtoConversionError;

    fn try_from(command: self::Command) -> Result<Self, Self::Error> {
        match command.kind {
            Some(command::Kind::SecretSync(secret_sync)) => {
                Ok(Command::SecretSync(secret_sync.try_into()?))
            }
            None => Err(ProtoConversionError::MissingField("kind")),
        }
    }
}

impl TryFrom<self::SecretSyncCommand> for SecretSyncCommand {
    type Error = ProtoConversionError;

    fn try_from(command: self::SecretSyncCommand) -> Result<Self, Self::Error> {
        let action = match self::SecretSyncAction::from_i32(command.action) {
            Some(self::SecretSyncAction::Set) => SecretSyncAction::Set,
            Some(self::SecretSyncAction::Delete) => SecretSyncAction::Delete,
            None => return Err(ProtoConversionError::MissingField("action")),
        };
        Ok(SecretSyncCommand {
            command_id: command.command_id,
            name: command.name,
            namespace: command.namespace,
            action,
            payload: command.payload,
        })
    }
}

impl From<IngressInfoRequest> for self::IngressInfoRequest {
    fn from(request: IngressInfoRequest) -> Self {
        self::IngressInfoRequest {
            namespace: request.namespace,
            service_id: request.service_id,
            service_name: request.service_name,
            service_port_name: request.service_port_name,
            service_port_number: request.service_port_number,
        }
    }
}

impl From<self::IngressInfoRequest> for IngressInfoRequest {
    fn from(request: self::IngressInfoRequest) -> Self {
        IngressInfoRequest {
            namespace: request.namespace,
            service_id: request.service_id,
            service_name: request.service_name,
            service_port_name: request.service_port_name,
            service_port_number: request.service_port_number,
        }
    }
}

impl From<IngressInfoResponse> for self::IngressInfoResponse {
    fn from(response: IngressInfoResponse) -> Self {
        self::IngressInfoResponse {
            l3_host: response.l3_host,
            port: response.port,
            tls: response.tls,
            l5_host: response.l5_host,
        }
    }
}

impl From<self::IngressInfoResponse> for IngressInfoResponse {
    fn from(response: self::IngressInfoResponse) -> Self {
        IngressInfoResponse {
            l3_host: response.l3_host,
            port: response.port,
            tls: response.tls,
            l5_host: response.l5_host,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_round_trips_through_the_wire_type() {
        let identity = Identity {
            hostname: "h".into(),
            cluster_id: "c".into(),
            label: "l".into(),
            version: "v".into(),
        };
        let wire: self::Identity = identity.clone().into();
        let back: Identity = wire.into();
        assert_eq!(identity, back);
    }

    #[test]
    fn directive_without_a_command_kind_is_rejected() {
        let directive = self::Directive {
            id: "d1".into(),
            stop_reporting: false,
            min_report_period_secs: None,
            commands: vec![self::Command { kind: None }],
        };
        assert!(Directive::try_from(directive).is_err());
    }

    #[test]
    fn secret_sync_command_round_trips() {
        let wire = self::SecretSyncCommand {
            command_id: "cmd-1".into(),
            name: "token".into(),
            namespace: "ambassador".into(),
            action: self::SecretSyncAction::Set as i32,
            payload: Some("abc".into()),
        };
        let command = SecretSyncCommand::try_from(wire).unwrap();
        assert_eq!(command.action, SecretSyncAction::Set);
        assert_eq!(command.payload.as_deref(), Some("abc"));
    }
}
