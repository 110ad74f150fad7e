//! The remote channel (§4.6 in the component table, "Comm"): a lazily
//! opened bidirectional connection to the Director, multiplexing the
//! report/diagnostics/metrics/command-result legs outbound and the
//! directive leg inbound over one gRPC stream (§6 "Wire encoding").
//!
//! Rebuilt whenever the effective token changes (I4): callers drop the
//! current [`Comm`] and construct a new one rather than mutating one in
//! place, which is what makes "tear down before the next send" trivial to
//! get right in the reporter loop.

use std::collections::HashMap;
use std::sync::Arc;

use agent_core::{CommandResult, Directive, MetricFamily, Report};
use agent_proto::agent_comm_client::AgentCommClient;
use agent_proto::{agent_message, AgentMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue};
use tonic::service::Interceptor;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};
use tracing::{info, warn};

const TOKEN_HEADER: &str = "x-ambassador-api-key";

#[derive(Debug, thiserror::Error)]
pub enum CommError {
    #[error("connecting to director at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: tonic::transport::Error,
    },
    #[error("establishing Connect stream: {0}")]
    Establish(#[source] Status),
    #[error("the connection to the director has been torn down")]
    Closed,
}

/// Splits `RPC_CONNECTION_ADDRESS`'s `host:port[+secure?]` shape (§6) into
/// a `host:port` pair and whether the `+secure` suffix was present.
pub fn parse_rpc_address(addr: &str) -> (String, bool) {
    match addr.strip_suffix("+secure") {
        Some(host_port) => (host_port.to_string(), true),
        None => (addr.to_string(), false),
    }
}

/// Attaches the effective token and any operator-configured extra headers
/// to every outbound request on a connection, the same shape as the
/// teacher's `VersionAttachInterceptor`.
#[derive(Debug, Clone)]
struct TokenInterceptor {
    token: AsciiMetadataValue,
    extra_headers: Vec<(AsciiMetadataKey, AsciiMetadataValue)>,
}

impl Interceptor for TokenInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        request
            .metadata_mut()
            .insert(TOKEN_HEADER, self.token.clone());
        for (key, value) in &self.extra_headers {
            request.metadata_mut().insert(key.clone(), value.clone());
        }
        Ok(request)
    }
}

/// The reader task's handle, wrapped so the last clone of a [`Comm`] to
/// drop aborts it — this is what makes tearing a connection down (I4) as
/// simple as letting every `Arc<Comm>` clone go out of scope.
struct ReaderTask(JoinHandle<()>);

impl Drop for ReaderTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// The lazily opened connection to the Director: cheap to clone (an
/// `Arc` inside), so every detached send task can hold its own handle
/// without the reporter loop needing `&mut` access to dispatch one.
/// Dropping the last clone tears the connection down (I4); the reporter
/// loop owns the paired [`DirectiveStream`] uniquely, since receiving is
/// inherently single-consumer.
#[derive(Clone)]
pub struct Comm {
    tx: mpsc::UnboundedSender<AgentMessage>,
    _reader: Arc<ReaderTask>,
}

/// The inbound directive leg, split out from [`Comm`] because `recv`
/// requires unique access and the reporter loop is its only consumer.
pub struct DirectiveStream {
    rx: mpsc::UnboundedReceiver<Directive>,
}

impl DirectiveStream {
    /// Awaits the next inbound directive. Returns `None` once the
    /// connection has been torn down.
    pub async fn recv(&mut self) -> Option<Directive> {
        self.rx.recv().await
    }
}

impl Comm {
    /// Opens a connection to `addr` (already split into `host:port` and a
    /// secure flag) authenticated with `token`, plus any operator-configured
    /// extra headers.
    pub async fn connect(
        addr: &str,
        secure: bool,
        token: &str,
        extra_headers: &[(String, String)],
    ) -> Result<(Self, DirectiveStream), CommError> {
        let scheme = if secure { "https" } else { "http" };
        let uri = format!("{scheme}://{addr}");
        let channel: Channel = Endpoint::from_shared(uri.clone())
            .map_err(|source| CommError::Connect {
                addr: addr.to_string(),
                source,
            })?
            .connect()
            .await
            .map_err(|source| CommError::Connect {
                addr: addr.to_string(),
                source,
            })?;

        let token = AsciiMetadataValue::try_from(token).unwrap_or_else(|_| AsciiMetadataValue::from_static(""));
        let extra_headers = extra_headers
            .iter()
            .filter_map(|(k, v)| {
                let key = AsciiMetadataKey::try_from(k.as_str()).ok()?;
                let value = AsciiMetadataValue::try_from(v.as_str()).ok()?;
                Some((key, value))
            })
            .collect();
        let interceptor = TokenInterceptor { token, extra_headers };

        let mut client = AgentCommClient::with_interceptor(channel, interceptor);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<AgentMessage>();
        let mut inbound = client
            .connect(Request::new(UnboundedReceiverStream::new(outbound_rx)))
            .await
            .map_err(CommError::Establish)?
            .into_inner();

        let (directive_tx, directive_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            use futures::StreamExt;
            while let Some(next) = inbound.next().await {
                match next {
                    Ok(message) => {
                        if let Some(directive) = message.directive {
                            match Directive::try_from(directive) {
                                Ok(directive) => {
                                    if directive_tx.send(directive).is_err() {
                                        break;
                                    }
                                }
                                Err(err) => warn!(error = %err, "dropping malformed directive"),
                            }
                        }
                    }
                    Err(status) => {
                        warn!(error = %status, "director stream closed with an error");
                        break;
                    }
                }
            }
        });

        info!(%addr, secure, "connected to director");
        let comm = Comm {
            tx: outbound_tx,
            _reader: Arc::new(ReaderTask(task)),
        };
        let directives = DirectiveStream { rx: directive_rx };
        Ok((comm, directives))
    }

    pub fn send_snapshot(&self, report: Report) -> Result<(), CommError> {
        self.send(agent_message::Payload::Report(agent_proto::report_to_snapshot(report)))
    }

    pub fn send_diagnostics(&self, report: Report) -> Result<(), CommError> {
        self.send(agent_message::Payload::ReportDiagnostics(
            agent_proto::report_to_diagnostics(report),
        ))
    }

    /// Sends one drained [`agent_core::AggregatedMetrics`] map, already
    /// filtered and swapped out, as one batch per instance.
    pub fn send_metrics(&self, drained: HashMap<String, Vec<MetricFamily>>) -> Result<(), CommError> {
        for batch in agent_proto::metric_batches_from_drain(drained) {
            self.send(agent_message::Payload::StreamMetrics(batch))?;
        }
        Ok(())
    }

    pub fn send_command_result(&self, result: CommandResult) -> Result<(), CommError> {
        self.send(agent_message::Payload::ReportCommandResult(result.into()))
    }

    fn send(&self, payload: agent_message::Payload) -> Result<(), CommError> {
        self.tx
            .send(AgentMessage { payload: Some(payload) })
            .map_err(|_| CommError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_suffix_is_parsed_and_stripped() {
        assert_eq!(
            parse_rpc_address("director.example.com:443+secure"),
            ("director.example.com:443".to_string(), true)
        );
    }

    #[test]
    fn plain_address_is_not_secure() {
        assert_eq!(
            parse_rpc_address("director.example.com:80"),
            ("director.example.com:80".to_string(), false)
        );
    }
}
