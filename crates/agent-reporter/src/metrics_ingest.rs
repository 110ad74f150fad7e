//! The metrics aggregator's listening side (§4.9, §6 `:8080`): an
//! envoy-style streaming sink that each gateway instance opens a client
//! stream on, submitting `MetricBatch` messages that are filtered and
//! folded into the shared [`AggregatedMetrics`] table with replace-on-write
//! semantics.

use std::net::SocketAddr;
use std::sync::Arc;

use agent_core::AggregatedMetrics;
use agent_proto::metrics_ingest_server::{MetricsIngest, MetricsIngestServer};
use agent_proto::{Empty, MetricBatch};
use futures::StreamExt;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};
use tracing::info;

pub struct MetricsIngestService {
    aggregated: Arc<AggregatedMetrics>,
}

impl MetricsIngestService {
    pub fn new(aggregated: Arc<AggregatedMetrics>) -> Self {
        MetricsIngestService { aggregated }
    }
}

#[tonic::async_trait]
impl MetricsIngest for MetricsIngestService {
    async fn stream_metrics(
        &self,
        request: Request<Streaming<MetricBatch>>,
    ) -> Result<Response<Empty>, Status> {
        let mut stream = request.into_inner();
        while let Some(batch) = stream.next().await {
            let batch = batch?;
            let families = batch.families.into_iter().map(Into::into).collect();
            self.aggregated.record(batch.instance, families);
        }
        Ok(Response::new(Empty {}))
    }
}

/// Binds `addr` and serves the metrics intake server until the process
/// exits. Runs regardless of leadership: every replica accepts metrics,
/// only the elected leader drains and forwards them (the reporter loop
/// owns the drain).
pub async fn serve(addr: SocketAddr, aggregated: Arc<AggregatedMetrics>) -> Result<(), anyhow::Error> {
    info!(%addr, "starting metrics intake server");
    let service = MetricsIngestService::new(aggregated);
    Server::builder()
        .add_service(MetricsIngestServer::new(service))
        .serve(addr)
        .await?;
    Ok(())
}
