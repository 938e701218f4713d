//! Connection Pool Manager
//!
//! Keeps one TAK client per stored connection, routes each client's events
//! to subscribers and sinks, and reconnects failed clients with backoff.

use crate::fanout::{Fanout, LoggingSinks, SinkDispatcher, WsRegistry};
use crate::metrics::{HealthReporter, PoolMetrics, PrometheusHealth};
use crate::retry::{RetryDecision, RetryPolicy, RetryState};
use crate::store::ConnectionStore;
use anyhow::Context;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::RwLock;
use std::sync::Arc;
use takbridge_client::{ClientEvent, ClientEvents, ClientFactory, ClientHandle, TakClient};
use takbridge_core::config::{AppConfig, PoolSettings, ServerSettings};
use takbridge_core::error::ConnectionError;
use takbridge_core::{Connection, ConnectionId, ConnectionStatus, Result, StatusSummary};
use takbridge_cot::Event;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Configuration for connection pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// TAK server every connection streams from
    pub server_url: String,
    /// Label on the liveness metric
    pub stack_name: String,
    /// Skip sink dispatch for every connection
    pub nosinks: bool,
    /// Skip the liveness metric for every connection
    pub nometrics: bool,
    /// Offline mode; `init` connects nothing
    pub local: bool,
    pub retry: RetryPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from_settings(&ServerSettings::default(), &PoolSettings::default())
    }
}

impl PoolConfig {
    pub fn from_settings(server: &ServerSettings, pool: &PoolSettings) -> Self {
        Self {
            server_url: server.url.clone(),
            stack_name: pool.stack_name.clone(),
            nosinks: pool.nosinks,
            nometrics: pool.nometrics,
            local: pool.local,
            retry: RetryPolicy::from(&pool.retry),
        }
    }
}

impl From<&AppConfig> for PoolConfig {
    fn from(config: &AppConfig) -> Self {
        Self::from_settings(&config.server, &config.pool)
    }
}

/// One registered connection
struct PoolEntry {
    connection: Connection,
    client: Arc<dyn TakClient>,
    retry: Arc<RetryState>,
    ephemeral: bool,
    supervisor: JoinHandle<()>,
}

/// Connection Pool Manager
///
/// Each entry owns a client and a supervisor task that consumes the client's
/// events in order. Pending reconnect delays live in the supervisor, so
/// deleting an entry cancels them.
pub struct ConnectionPool {
    entries: DashMap<ConnectionId, PoolEntry>,
    server_url: RwLock<String>,
    config: PoolConfig,
    store: Arc<dyn ConnectionStore>,
    factory: Arc<dyn ClientFactory>,
    fanout: Fanout,
    health: Arc<dyn HealthReporter>,
    metrics: Arc<PoolMetrics>,
}

impl ConnectionPool {
    /// Creates an empty pool. Sinks only log and liveness goes to the
    /// Prometheus gauge until replaced with the `with_*` methods.
    pub fn new(
        config: PoolConfig,
        store: Arc<dyn ConnectionStore>,
        factory: Arc<dyn ClientFactory>,
    ) -> Self {
        let metrics = Arc::new(PoolMetrics::new());
        Self {
            entries: DashMap::new(),
            server_url: RwLock::new(config.server_url.clone()),
            fanout: Fanout {
                ws: Arc::new(WsRegistry::new()),
                sinks: Arc::new(LoggingSinks),
                metrics: Arc::clone(&metrics),
                nosinks: config.nosinks,
            },
            health: Arc::new(PrometheusHealth::new(config.stack_name.clone())),
            metrics,
            config,
            store,
            factory,
        }
    }

    pub fn with_ws_registry(mut self, ws: Arc<WsRegistry>) -> Self {
        self.fanout.ws = ws;
        self
    }

    pub fn with_sinks(mut self, sinks: Arc<dyn SinkDispatcher>) -> Self {
        self.fanout.sinks = sinks;
        self
    }

    pub fn with_health(mut self, health: Arc<dyn HealthReporter>) -> Self {
        self.health = health;
        self
    }

    /// Adds every enabled connection from the store.
    ///
    /// A connection that fails to add is logged and skipped. Returns how many
    /// were added.
    pub async fn init(&self) -> anyhow::Result<usize> {
        if self.config.local {
            info!("Local mode; not connecting to TAK");
            return Ok(0);
        }

        let mut connections = self
            .store
            .stream()
            .await
            .context("Failed to list connections")?;

        let mut added = 0;
        while let Some(connection) = connections.next().await {
            let connection = connection.context("Failed to read connection from store")?;
            if !connection.enabled {
                debug!(connection_id = %connection.id, "Skipping disabled connection");
                continue;
            }

            let id = connection.id;
            match self.add(connection) {
                Ok(()) => added += 1,
                Err(e) => error!(connection_id = %id, error = %e, "Failed to add connection"),
            }
        }

        info!(added, total = self.len(), "Connection pool initialized");
        Ok(added)
    }

    /// Connects and registers a connection.
    ///
    /// # Errors
    ///
    /// Fails if the id is already registered (delete it first) or the client
    /// rejects the URL or credentials.
    pub fn add(&self, connection: Connection) -> Result<()> {
        self.insert(connection, false)
    }

    /// Like [`ConnectionPool::add`], but events only reach WebSocket
    /// subscribers: no sinks and no liveness metric.
    pub fn add_ephemeral(&self, connection: Connection) -> Result<()> {
        self.insert(connection, true)
    }

    fn insert(&self, connection: Connection, ephemeral: bool) -> Result<()> {
        let id = connection.id;
        let url = self.server_url.read().clone();

        let slot = match self.entries.entry(id) {
            Entry::Occupied(_) => return Err(ConnectionError::AlreadyRegistered { id }.into()),
            Entry::Vacant(slot) => slot,
        };

        let ClientHandle { client, events } = self.factory.connect(id, &url, &connection.auth)?;
        let retry = Arc::new(RetryState::new());

        let supervisor = Supervisor {
            connection: connection.clone(),
            client: Arc::clone(&client),
            retry: Arc::clone(&retry),
            ephemeral,
            policy: self.config.retry.clone(),
            nometrics: self.config.nometrics,
            fanout: self.fanout.clone(),
            health: Arc::clone(&self.health),
            metrics: Arc::clone(&self.metrics),
        };
        let supervisor = tokio::spawn(supervisor.run(events));

        slot.insert(PoolEntry {
            connection,
            client,
            retry,
            ephemeral,
            supervisor,
        });

        self.metrics.record_connection_added(self.entries.len());
        info!(connection_id = %id, ephemeral, total_connections = self.len(), "Connection added to pool");
        Ok(())
    }

    /// Destroys and removes a connection. Returns false if it was not
    /// registered.
    pub fn delete(&self, id: ConnectionId) -> bool {
        let Some((_, entry)) = self.entries.remove(&id) else {
            return false;
        };

        entry.supervisor.abort();
        entry.client.destroy();
        if !entry.ephemeral && !self.config.nometrics {
            self.health.clear(id);
        }

        self.metrics.record_connection_removed(self.entries.len());
        info!(connection_id = %id, remaining_connections = self.len(), "Connection removed from pool");
        true
    }

    /// Deletes every entry and runs [`ConnectionPool::init`] again, first
    /// switching to `server_url` if given.
    pub async fn refresh(&self, server_url: Option<String>) -> anyhow::Result<usize> {
        if let Some(url) = server_url {
            info!(server = %url, "Switching TAK server");
            *self.server_url.write() = url;
        }

        for id in self.ids() {
            self.delete(id);
        }
        self.init().await
    }

    /// `Live` if registered and open, `Dead` if registered but not open,
    /// `Unknown` otherwise.
    pub fn status(&self, id: ConnectionId) -> ConnectionStatus {
        match self.entries.get(&id) {
            Some(entry) if entry.client.is_open() => ConnectionStatus::Live,
            Some(_) => ConnectionStatus::Dead,
            None => ConnectionStatus::Unknown,
        }
    }

    /// Status of every registered connection
    pub fn statuses(&self) -> Vec<(ConnectionId, ConnectionStatus)> {
        self.entries
            .iter()
            .map(|entry| {
                let status = if entry.client.is_open() {
                    ConnectionStatus::Live
                } else {
                    ConnectionStatus::Dead
                };
                (*entry.key(), status)
            })
            .collect()
    }

    pub fn summary(&self) -> StatusSummary {
        self.statuses().into_iter().map(|(_, status)| status).collect()
    }

    /// Pushes an event through the same fan-out as events received from the
    /// TAK server. The server does not echo a submitter's own events, so the
    /// API layer publishes them here.
    ///
    /// # Errors
    ///
    /// Fails if the connection is neither registered nor in the store.
    pub async fn cot(&self, id: ConnectionId, event: &Event) -> Result<()> {
        let registered = self
            .entries
            .get(&id)
            .map(|entry| (entry.connection.clone(), entry.ephemeral));

        let (connection, ephemeral) = match registered {
            Some(found) => found,
            None => match self.store.get(id).await {
                Ok(Some(connection)) => (connection, false),
                Ok(None) => return Err(ConnectionError::NotRegistered { id }.into()),
                Err(e) => {
                    warn!(connection_id = %id, error = %e, "Connection lookup failed");
                    return Err(ConnectionError::NotRegistered { id }.into());
                }
            },
        };

        self.fanout.publish(&connection, event, ephemeral).await;
        Ok(())
    }

    /// Writes events to a connection's TAK server.
    pub async fn write(&self, id: ConnectionId, events: &[Event]) -> Result<()> {
        let client = self
            .entries
            .get(&id)
            .map(|entry| Arc::clone(&entry.client))
            .ok_or(ConnectionError::NotRegistered { id })?;

        client.write(events).await
    }

    /// Deletes every entry.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of connection pool");

        for id in self.ids() {
            self.delete(id);
        }

        info!("Connection pool shutdown complete");
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.entries.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Connection> {
        self.entries.get(&id).map(|entry| entry.connection.clone())
    }

    pub fn client(&self, id: ConnectionId) -> Option<Arc<dyn TakClient>> {
        self.entries.get(&id).map(|entry| Arc::clone(&entry.client))
    }

    pub fn server_version(&self, id: ConnectionId) -> Option<String> {
        self.entries.get(&id).and_then(|entry| entry.client.server_version())
    }

    /// Consecutive failures since the connection last delivered an event
    pub fn retry_count(&self, id: ConnectionId) -> Option<u32> {
        self.entries.get(&id).map(|entry| entry.retry.retry_count())
    }

    pub fn has_opened(&self, id: ConnectionId) -> Option<bool> {
        self.entries.get(&id).map(|entry| entry.retry.has_opened())
    }

    pub fn server_url(&self) -> String {
        self.server_url.read().clone()
    }

    pub fn ws_registry(&self) -> Arc<WsRegistry> {
        Arc::clone(&self.fanout.ws)
    }

    pub fn metrics(&self) -> Arc<PoolMetrics> {
        Arc::clone(&self.metrics)
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        for entry in self.entries.iter() {
            entry.supervisor.abort();
            entry.client.destroy();
        }
    }
}

/// Consumes one client's events for the life of its pool entry.
struct Supervisor {
    connection: Connection,
    client: Arc<dyn TakClient>,
    retry: Arc<RetryState>,
    ephemeral: bool,
    policy: RetryPolicy,
    nometrics: bool,
    fanout: Fanout,
    health: Arc<dyn HealthReporter>,
    metrics: Arc<PoolMetrics>,
}

impl Supervisor {
    #[instrument(name = "pool_supervisor", skip_all, fields(connection_id = %self.connection.id))]
    async fn run(self, mut events: ClientEvents) {
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::Cot(cot) => {
                    self.retry.record_open();
                    self.metrics.record_cot();
                    self.fanout.publish(&self.connection, &cot, self.ephemeral).await;
                }
                ClientEvent::Ping => self.report_health().await,
                ClientEvent::End => {
                    warn!("Connection ended");
                    self.retry_later().await;
                }
                ClientEvent::Timeout => {
                    warn!("Connection timed out");
                    self.retry_later().await;
                }
                ClientEvent::Error(e) => {
                    error!(error = %e, transient = e.is_transient(), "Connection error");
                    self.retry_later().await;
                }
            }
        }
        debug!("Client event channel closed");
    }

    async fn report_health(&self) {
        if self.ephemeral || self.nometrics {
            return;
        }
        if let Err(e) = self.health.post(self.connection.id).await {
            warn!(error = %e, "Failed to push liveness metric");
        }
    }

    async fn retry_later(&self) {
        if !self.ephemeral && !self.nometrics {
            self.health.clear(self.connection.id);
        }

        match self.policy.decide(&self.retry) {
            RetryDecision::Stalled => {
                warn!(
                    retries = self.retry.retry_count(),
                    "Connection never opened; giving up until it is added again"
                );
                self.metrics.record_stalled();
            }
            RetryDecision::Retry { attempt, delay } => {
                info!(attempt, retry_ms = delay.as_millis() as u64, "Retrying connection");
                tokio::time::sleep(delay).await;
                self.metrics.record_reconnect();
                if let Err(e) = self.client.reconnect() {
                    error!(error = %e, "Reconnect failed");
                }
            }
        }
    }
}
