//! takbridge Connection Pool
//!
//! Keeps one streaming TAK client per stored connection and turns what they
//! receive into WebSocket messages, sink deliveries and liveness metrics.
//!
//! # Architecture
//!
//! ```text
//!   ┌──────────────────┐        ┌─────────────────────────────┐
//!   │ ConnectionStore  │──init─►│   Connection Pool Manager   │
//!   │   (store.rs)     │        │   (pool.rs)                 │
//!   └──────────────────┘        │  - add / delete / refresh   │
//!                               │  - status and summary       │
//!                               │  - one supervisor per entry │
//!                               └──────────────┬──────────────┘
//!                                              │ ClientEvent
//!                 ┌────────────────────────────┼───────────────────┐
//!                 │                            │                   │
//!       ┌─────────▼────────┐        ┌──────────▼───────┐  ┌────────▼────────┐
//!       │   Reconnects     │        │    Fan-out       │  │    Metrics      │
//!       │   (retry.rs)     │        │  (fanout.rs)     │  │  (metrics.rs)   │
//!       │  - bounded until │        │  - WebSocket raw │  │  - liveness     │
//!       │    first event   │        │    or GeoJSON    │  │  - pool totals  │
//!       │  - capped after  │        │  - atom sinks    │  │  - Prometheus   │
//!       └──────────────────┘        └──────────────────┘  └─────────────────┘
//! ```
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use takbridge_client::{TlsClientConfig, TlsClientFactory};
//! use takbridge_core::ConnectionId;
//! use takbridge_pool::{ChannelWsClient, ConnectionPool, MemoryStore, PoolConfig, WsFormat};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(MemoryStore::from_yaml_file("connections.yaml")?);
//!     let factory = Arc::new(TlsClientFactory::new(TlsClientConfig::default()));
//!     let pool = ConnectionPool::new(PoolConfig::default(), store, factory);
//!
//!     let (subscriber, mut messages) = ChannelWsClient::new(WsFormat::GeoJson);
//!     pool.ws_registry().register(ConnectionId::new(1), Arc::new(subscriber));
//!
//!     pool.init().await?;
//!     while let Some(message) = messages.recv().await {
//!         println!("{}", message);
//!     }
//!
//!     pool.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod fanout;
pub mod metrics;
pub mod pool;
pub mod retry;
pub mod store;

pub use fanout::{
    BroadcastReport, ChannelWsClient, LoggingSinks, SinkDispatcher, WsClient, WsFormat, WsRegistry,
};
pub use metrics::{install_exporter, HealthReporter, PoolMetrics, PrometheusHealth};
pub use pool::{ConnectionPool, PoolConfig};
pub use retry::{RetryDecision, RetryPolicy, RetryState};
pub use store::{ConnectionStore, MemoryStore};
