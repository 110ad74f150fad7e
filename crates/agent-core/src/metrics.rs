//! The metrics aggregator (§4.9 in the original numbering): an Envoy-style
//! streaming sink that accepts only an allow-listed set of metric names and
//! replaces, rather than accumulates, each instance's last report.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Metric-name suffixes this agent is willing to relay. Matches the
/// reference agent's envoy metric allow-list.
const ALLOWED_SUFFIXES: [&str; 3] = ["upstream_rq_total", "upstream_rq_time", "upstream_rq_5xx"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricFamily {
    pub name: String,
    pub samples: Vec<MetricSample>,
}

/// Keeps only the families this agent is permitted to relay (P6).
pub fn filter_allowed(families: Vec<MetricFamily>) -> Vec<MetricFamily> {
    families
        .into_iter()
        .filter(|f| ALLOWED_SUFFIXES.iter().any(|suffix| f.name.ends_with(suffix)))
        .collect()
}

/// A per-instance, replace-on-write aggregation of the most recently
/// accepted metric batch. `record` overwrites whatever the instance sent
/// last; `drain` empties the map and returns what was there, in one
/// O(1) swap so the reporter never blocks the metrics sink while sending.
#[derive(Debug, Default)]
pub struct AggregatedMetrics {
    by_instance: Mutex<HashMap<String, Vec<MetricFamily>>>,
}

impl AggregatedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a batch from `instance`, filtering to the allow-list first
    /// and replacing any prior batch from the same instance.
    pub fn record(&self, instance: impl Into<String>, families: Vec<MetricFamily>) {
        let filtered = filter_allowed(families);
        self.by_instance
            .lock()
            .expect("metrics lock poisoned")
            .insert(instance.into(), filtered);
    }

    /// Swaps out the whole map, returning what had accumulated since the
    /// last drain. Called once per metrics-report tick.
    pub fn drain(&self) -> HashMap<String, Vec<MetricFamily>> {
        std::mem::take(&mut *self.by_instance.lock().expect("metrics lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(name: &str, value: f64) -> MetricFamily {
        MetricFamily {
            name: name.to_string(),
            samples: vec![MetricSample {
                labels: vec![],
                value,
            }],
        }
    }

    #[test]
    fn filter_keeps_only_allowed_suffixes() {
        let families = vec![family("upstream_rq_total", 1.0), family("other", 9.0)];
        let kept = filter_allowed(families);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "upstream_rq_total");
    }

    #[test]
    fn record_replaces_rather_than_accumulates() {
        let agg = AggregatedMetrics::new();
        agg.record("10.0.0.1", vec![family("upstream_rq_total", 1.0), family("other", 9.0)]);
        agg.record("10.0.0.1", vec![family("upstream_rq_total", 2.0)]);

        let drained = agg.drain();
        let families = &drained["10.0.0.1"];
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].samples[0].value, 2.0);
    }

    #[test]
    fn drain_empties_the_map() {
        let agg = AggregatedMetrics::new();
        agg.record("10.0.0.1", vec![family("upstream_rq_total", 1.0)]);
        assert_eq!(agg.drain().len(), 1);
        assert_eq!(agg.drain().len(), 0);
    }
}
