//! Prometheus exposition of group metrics
//!
//! Renders every registered group's [`MetricsSnapshot`](crate::cache::MetricsSnapshot)
//! plus store occupancy in the Prometheus text format, one series per group.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::error::{Error, Result};
use crate::registry::GroupRegistry;

const NAMESPACE: &str = "fatcache";

/// Builds a Prometheus text payload from a [`GroupRegistry`]
pub struct MetricsExporter {
    registry: Registry,
    gets: IntCounterVec,
    hits: IntCounterVec,
    misses: IntCounterVec,
    peer_loads: IntCounterVec,
    peer_errors: IntCounterVec,
    local_loads: IntCounterVec,
    local_errors: IntCounterVec,
    evictions: IntCounterVec,
    oversize_rejections: IntCounterVec,
    server_requests: IntCounterVec,
    cache_bytes: IntGaugeVec,
    cache_entries: IntGaugeVec,
    cache_budget: IntGaugeVec,
}

impl MetricsExporter {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let counter = |name: &str, help: &str| -> Result<IntCounterVec> {
            let vec = IntCounterVec::new(Opts::new(name, help).namespace(NAMESPACE), &["group"])
                .map_err(|e| Error::Internal(format!("Failed to create metric {}: {}", name, e)))?;
            registry
                .register(Box::new(vec.clone()))
                .map_err(|e| Error::Internal(format!("Failed to register metric {}: {}", name, e)))?;
            Ok(vec)
        };
        let gauge = |name: &str, help: &str| -> Result<IntGaugeVec> {
            let vec = IntGaugeVec::new(Opts::new(name, help).namespace(NAMESPACE), &["group"])
                .map_err(|e| Error::Internal(format!("Failed to create metric {}: {}", name, e)))?;
            registry
                .register(Box::new(vec.clone()))
                .map_err(|e| Error::Internal(format!("Failed to register metric {}: {}", name, e)))?;
            Ok(vec)
        };

        Ok(Self {
            gets: counter("gets_total", "Lookups served by the group")?,
            hits: counter("hits_total", "Lookups answered from the local store")?,
            misses: counter("misses_total", "Lookups that required a load")?,
            peer_loads: counter("peer_loads_total", "Values fetched from a peer")?,
            peer_errors: counter("peer_errors_total", "Failed peer fetches")?,
            local_loads: counter("local_loads_total", "Values produced by the local data source")?,
            local_errors: counter("local_errors_total", "Failed local loads")?,
            evictions: counter("evictions_total", "Entries evicted from the local store")?,
            oversize_rejections: counter("oversize_rejections_total", "Values too large to cache")?,
            server_requests: counter("server_requests_total", "Requests served to other peers")?,
            cache_bytes: gauge("cache_bytes", "Bytes held in the local store")?,
            cache_entries: gauge("cache_entries", "Entries held in the local store")?,
            cache_budget: gauge("cache_budget_bytes", "Configured byte budget")?,
            registry,
        })
    }

    /// Encode current values for every group
    pub fn gather(&self, groups: &GroupRegistry) -> Result<Vec<u8>> {
        for group in groups.groups() {
            let stats = group.stats();
            let labels = [stats.name.as_str()];
            let m = &stats.metrics;

            advance(&self.gets.with_label_values(&labels), m.gets);
            advance(&self.hits.with_label_values(&labels), m.hits);
            advance(&self.misses.with_label_values(&labels), m.misses);
            advance(&self.peer_loads.with_label_values(&labels), m.peer_loads);
            advance(&self.peer_errors.with_label_values(&labels), m.peer_errors);
            advance(&self.local_loads.with_label_values(&labels), m.local_loads);
            advance(&self.local_errors.with_label_values(&labels), m.local_errors);
            advance(&self.evictions.with_label_values(&labels), m.evictions);
            advance(
                &self.oversize_rejections.with_label_values(&labels),
                m.oversize_rejections,
            );
            advance(
                &self.server_requests.with_label_values(&labels),
                m.server_requests,
            );
            self.cache_bytes.with_label_values(&labels).set(stats.bytes_used);
            self.cache_entries
                .with_label_values(&labels)
                .set(i64::try_from(stats.entries).unwrap_or(i64::MAX));
            self.cache_budget.with_label_values(&labels).set(stats.cache_bytes);
        }

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::Internal(format!("Failed to encode metrics: {}", e)))?;
        Ok(buffer)
    }

    /// Content type of [`gather`](Self::gather) output
    pub fn format_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}

impl std::fmt::Debug for MetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsExporter").finish_non_exhaustive()
    }
}

/// Bring `counter` up to `current`. A lower value means the group was
/// replaced and its counters restarted, so the series restarts too.
fn advance(counter: &IntCounter, current: u64) {
    let seen = counter.get();
    if current >= seen {
        counter.inc_by(current - seen);
    } else {
        counter.reset();
        counter.inc_by(current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::group::{GetterFn, Group};

    fn echo_group(groups: &GroupRegistry, name: &str, cache_bytes: i64) -> Arc<Group> {
        groups.new_group(
            name,
            cache_bytes,
            GetterFn::new(|key: &str| {
                let value = key.as_bytes().to_vec();
                async move { Ok(value) }
            }),
        )
    }

    #[tokio::test]
    async fn test_gather_reports_each_group() {
        let groups = GroupRegistry::new();
        let scores = echo_group(&groups, "scores", 1024);
        echo_group(&groups, "users", 64);

        scores.get("Tom").await.unwrap();
        scores.get("Tom").await.unwrap();

        let exporter = MetricsExporter::new().unwrap();
        let text = String::from_utf8(exporter.gather(&groups).unwrap()).unwrap();

        assert!(text.contains("# TYPE fatcache_hits_total counter"));
        assert!(text.contains("fatcache_hits_total{group=\"scores\"} 1"));
        assert!(text.contains("fatcache_misses_total{group=\"scores\"} 1"));
        assert!(text.contains("# TYPE fatcache_cache_entries gauge"));
        assert!(text.contains("fatcache_cache_entries{group=\"scores\"} 1"));
        assert!(text.contains("fatcache_cache_budget_bytes{group=\"users\"} 64"));
    }

    #[tokio::test]
    async fn test_counters_follow_snapshots_across_gathers() {
        let groups = GroupRegistry::new();
        let scores = echo_group(&groups, "scores", 1024);
        let exporter = MetricsExporter::new().unwrap();

        scores.get("a").await.unwrap();
        exporter.gather(&groups).unwrap();
        scores.get("a").await.unwrap();
        scores.get("a").await.unwrap();
        let text = String::from_utf8(exporter.gather(&groups).unwrap()).unwrap();

        assert!(text.contains("fatcache_gets_total{group=\"scores\"} 3"));
        assert!(text.contains("fatcache_hits_total{group=\"scores\"} 2"));
    }

    #[tokio::test]
    async fn test_replaced_group_restarts_series() {
        let groups = GroupRegistry::new();
        let first = echo_group(&groups, "scores", 1024);
        let exporter = MetricsExporter::new().unwrap();

        for key in ["a", "b", "c"] {
            first.get(key).await.unwrap();
        }
        exporter.gather(&groups).unwrap();

        let second = echo_group(&groups, "scores", 1024);
        second.get("a").await.unwrap();
        let text = String::from_utf8(exporter.gather(&groups).unwrap()).unwrap();

        assert!(text.contains("fatcache_gets_total{group=\"scores\"} 1"));
    }

    #[test]
    fn test_empty_registry() {
        let exporter = MetricsExporter::new().unwrap();
        let text = exporter.gather(&GroupRegistry::new()).unwrap();
        assert!(text.is_empty());
        assert!(exporter.format_type().starts_with("text/plain"));
    }
}
