//! A thin wrapper around a [`prometheus::Registry`].

use prometheus::core::{Collector, Metric};
use prometheus::{Encoder, Registry, TextEncoder};

/// The agent's own operational metrics registry — counts and latencies about
/// the agent's behavior, distinct from the Envoy metrics it relays on behalf
/// of the gateway (see `agent_core::metrics::AggregatedMetrics`).
#[derive(Clone, Debug, Default)]
pub struct MetricsRegistry {
    inner: Registry,
}

impl MetricsRegistry {
    /// Creates a new, empty registry.
    pub fn new() -> Self {
        Self {
            inner: Registry::new(),
        }
    }

    /// Registers a collector, panicking on a duplicate registration — a
    /// programmer error, not a runtime condition to recover from.
    pub fn register(&self, collector: impl Collector + 'static) {
        self.inner
            .register(Box::new(collector))
            .expect("metric registered under a duplicate name");
    }

    /// Registers a collector whose metric vectors share a label, returning
    /// the metric itself for convenience.
    pub fn register_metric<M>(&self, metric: M) -> M
    where
        M: Metric + Collector + Clone + 'static,
    {
        self.register(metric.clone());
        metric
    }

    /// Renders every registered metric in the Prometheus text exposition
    /// format, for serving on `/metrics`.
    pub fn encode_text(&self) -> Result<String, anyhow::Error> {
        let metric_families = self.inner.gather();
        let mut buf = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}
