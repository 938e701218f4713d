//! Metrics Collection
//!
//! Pool activity counters and the per-connection liveness gauge, exported
//! through the `metrics` facade. [`install_exporter`] serves them in
//! Prometheus format.

use async_trait::async_trait;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use takbridge_core::ConnectionId;
use tracing::info;

const CONNECTION_HEALTH: &str = "takbridge_connection_health";

/// Pool metrics collector
#[derive(Debug)]
pub struct PoolMetrics {
    connections_added: AtomicU64,
    connections_removed: AtomicU64,
    cot_events: AtomicU64,
    reconnects: AtomicU64,
    stalled: AtomicU64,
    fanout_failures: AtomicU64,
}

impl PoolMetrics {
    pub fn new() -> Self {
        describe_counter!(
            "takbridge_pool_connections_added_total",
            "Total connections added to the pool"
        );
        describe_counter!(
            "takbridge_pool_connections_removed_total",
            "Total connections removed from the pool"
        );
        describe_counter!(
            "takbridge_pool_cot_events_total",
            "Total CoT events received from TAK servers"
        );
        describe_counter!(
            "takbridge_pool_reconnects_total",
            "Total reconnect attempts"
        );
        describe_counter!(
            "takbridge_pool_stalled_total",
            "Connections given up on before they ever opened"
        );
        describe_counter!(
            "takbridge_pool_fanout_failures_total",
            "WebSocket and sink deliveries that failed"
        );
        describe_gauge!("takbridge_pool_connections", "Connections currently in the pool");

        Self {
            connections_added: AtomicU64::new(0),
            connections_removed: AtomicU64::new(0),
            cot_events: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            stalled: AtomicU64::new(0),
            fanout_failures: AtomicU64::new(0),
        }
    }

    pub fn record_connection_added(&self, pool_size: usize) {
        self.connections_added.fetch_add(1, Ordering::Relaxed);
        counter!("takbridge_pool_connections_added_total").increment(1);
        gauge!("takbridge_pool_connections").set(pool_size as f64);
    }

    pub fn record_connection_removed(&self, pool_size: usize) {
        self.connections_removed.fetch_add(1, Ordering::Relaxed);
        counter!("takbridge_pool_connections_removed_total").increment(1);
        gauge!("takbridge_pool_connections").set(pool_size as f64);
    }

    pub fn record_cot(&self) {
        self.cot_events.fetch_add(1, Ordering::Relaxed);
        counter!("takbridge_pool_cot_events_total").increment(1);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        counter!("takbridge_pool_reconnects_total").increment(1);
    }

    pub fn record_stalled(&self) {
        self.stalled.fetch_add(1, Ordering::Relaxed);
        counter!("takbridge_pool_stalled_total").increment(1);
    }

    pub fn record_fanout_failures(&self, count: u64) {
        self.fanout_failures.fetch_add(count, Ordering::Relaxed);
        counter!("takbridge_pool_fanout_failures_total").increment(count);
    }

    pub fn connections_added(&self) -> u64 {
        self.connections_added.load(Ordering::Relaxed)
    }

    pub fn connections_removed(&self) -> u64 {
        self.connections_removed.load(Ordering::Relaxed)
    }

    pub fn cot_events(&self) -> u64 {
        self.cot_events.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn stalled(&self) -> u64 {
        self.stalled.load(Ordering::Relaxed)
    }

    pub fn fanout_failures(&self) -> u64 {
        self.fanout_failures.load(Ordering::Relaxed)
    }
}

impl Default for PoolMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Receives the liveness signal sent each time a server acknowledges a
/// client's ping.
#[async_trait]
pub trait HealthReporter: Send + Sync {
    async fn post(&self, id: ConnectionId) -> anyhow::Result<()>;

    /// The connection's session ended.
    fn clear(&self, _id: ConnectionId) {}
}

/// Liveness as a `takbridge_connection_health` gauge labelled by connection
/// and stack.
#[derive(Debug, Clone)]
pub struct PrometheusHealth {
    stack_name: String,
}

impl PrometheusHealth {
    pub fn new(stack_name: impl Into<String>) -> Self {
        describe_gauge!(CONNECTION_HEALTH, "1 while the TAK server acknowledges pings, 0 after the session ends");
        Self {
            stack_name: stack_name.into(),
        }
    }

    fn set(&self, id: ConnectionId, value: f64) {
        gauge!(
            CONNECTION_HEALTH,
            "connection_id" => id.to_string(),
            "stack" => self.stack_name.clone()
        )
        .set(value);
    }
}

#[async_trait]
impl HealthReporter for PrometheusHealth {
    async fn post(&self, id: ConnectionId) -> anyhow::Result<()> {
        self.set(id, 1.0);
        Ok(())
    }

    fn clear(&self, id: ConnectionId) {
        self.set(id, 0.0);
    }
}

/// Installs the global Prometheus recorder with an HTTP scrape endpoint on
/// `listen`.
pub fn install_exporter(listen: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new().with_http_listener(listen).install()?;
    info!(bind_address = %listen, "Prometheus metrics exporter started");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_metrics() {
        let metrics = PoolMetrics::new();

        metrics.record_connection_added(1);
        metrics.record_connection_added(2);
        metrics.record_connection_removed(1);
        metrics.record_cot();
        metrics.record_reconnect();
        metrics.record_stalled();
        metrics.record_fanout_failures(3);

        assert_eq!(metrics.connections_added(), 2);
        assert_eq!(metrics.connections_removed(), 1);
        assert_eq!(metrics.cot_events(), 1);
        assert_eq!(metrics.reconnects(), 1);
        assert_eq!(metrics.stalled(), 1);
        assert_eq!(metrics.fanout_failures(), 3);
    }

    #[tokio::test]
    async fn test_prometheus_health_without_recorder() {
        let health = PrometheusHealth::new("test");
        assert!(health.post(ConnectionId::new(1)).await.is_ok());
        health.clear(ConnectionId::new(1));
    }
}
