//! Fan-out of received events to WebSocket subscribers and sinks

use crate::metrics::PoolMetrics;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use takbridge_core::{Connection, ConnectionId};
use takbridge_cot::{encode, to_geojson, Event};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Payload format a WebSocket subscriber asked for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WsFormat {
    /// `data` is the event XML as received
    #[default]
    Raw,
    /// `data` is a GeoJSON Feature
    GeoJson,
}

impl WsFormat {
    /// Parses a `format` query value. Anything but `geojson` means raw.
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("geojson") {
            WsFormat::GeoJson
        } else {
            WsFormat::Raw
        }
    }
}

/// A WebSocket subscriber for one connection's events.
pub trait WsClient: Send + Sync {
    fn format(&self) -> WsFormat;

    /// Sends one JSON text message.
    fn send(&self, message: String) -> anyhow::Result<()>;

    /// True once the socket is gone; closed subscribers are pruned.
    fn is_closed(&self) -> bool;
}

/// [`WsClient`] backed by an unbounded channel drained by the socket task.
#[derive(Debug, Clone)]
pub struct ChannelWsClient {
    format: WsFormat,
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelWsClient {
    pub fn new(format: WsFormat) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { format, tx }, rx)
    }
}

impl WsClient for ChannelWsClient {
    fn format(&self) -> WsFormat {
        self.format
    }

    fn send(&self, message: String) -> anyhow::Result<()> {
        self.tx
            .send(message)
            .map_err(|_| anyhow::anyhow!("WebSocket subscriber is gone"))
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Serialize)]
struct CotMessage<T: Serialize> {
    #[serde(rename = "type")]
    kind: &'static str,
    connection: ConnectionId,
    data: T,
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: usize,
    pub failed: usize,
    pub pruned: usize,
}

/// WebSocket subscribers keyed by connection id
#[derive(Default)]
pub struct WsRegistry {
    clients: DashMap<ConnectionId, Vec<Arc<dyn WsClient>>>,
}

impl WsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: ConnectionId, client: Arc<dyn WsClient>) {
        self.clients.entry(id).or_default().push(client);
        debug!(connection_id = %id, "WebSocket subscriber registered");
    }

    /// Removes one subscriber. Returns false if it was not registered.
    pub fn unregister(&self, id: ConnectionId, client: &Arc<dyn WsClient>) -> bool {
        let Some(mut clients) = self.clients.get_mut(&id) else {
            return false;
        };
        let before = clients.len();
        clients.retain(|c| !Arc::ptr_eq(c, client));
        let removed = clients.len() != before;
        let now_empty = clients.is_empty();
        drop(clients);

        if now_empty {
            self.clients.remove_if(&id, |_, clients| clients.is_empty());
        }
        removed
    }

    /// Number of subscribers for a connection
    pub fn subscribers(&self, id: ConnectionId) -> usize {
        self.clients.get(&id).map_or(0, |clients| clients.len())
    }

    /// Sends `{type: "cot", connection, data}` to every subscriber of `id`.
    ///
    /// A failing subscriber does not stop delivery to the rest.
    pub fn broadcast(&self, id: ConnectionId, event: &Event) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let Some(mut clients) = self.clients.get_mut(&id) else {
            return report;
        };

        let mut raw = None;
        let mut geojson = None;

        clients.retain(|client| {
            if client.is_closed() {
                report.pruned += 1;
                return false;
            }

            let message = match client.format() {
                WsFormat::Raw => raw.get_or_insert_with(|| raw_message(id, event)),
                WsFormat::GeoJson => geojson.get_or_insert_with(|| geojson_message(id, event)),
            };
            let Some(message) = message.as_ref() else {
                report.failed += 1;
                return true;
            };

            match client.send(message.clone()) {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    warn!(connection_id = %id, error = %e, "Failed to send to WebSocket subscriber");
                    report.failed += 1;
                }
            }
            true
        });

        if report.pruned > 0 {
            debug!(connection_id = %id, pruned = report.pruned, "Pruned closed WebSocket subscribers");
        }
        report
    }
}

fn raw_message(id: ConnectionId, event: &Event) -> Option<String> {
    let data = if event.raw.is_empty() {
        encode(event)
    } else {
        event.raw.clone()
    };
    to_message(id, data)
}

fn geojson_message(id: ConnectionId, event: &Event) -> Option<String> {
    to_message(id, to_geojson(event))
}

fn to_message<T: Serialize>(connection: ConnectionId, data: T) -> Option<String> {
    let message = CotMessage {
        kind: "cot",
        connection,
        data,
    };
    match serde_json::to_string(&message) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(connection_id = %connection, error = %e, "Failed to serialize WebSocket message");
            None
        }
    }
}

/// Downstream consumers of atom events.
#[async_trait]
pub trait SinkDispatcher: Send + Sync {
    async fn dispatch(&self, connection: &Connection, event: &Event) -> anyhow::Result<()>;
}

/// Sink dispatcher that only logs what it would deliver.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSinks;

#[async_trait]
impl SinkDispatcher for LoggingSinks {
    async fn dispatch(&self, connection: &Connection, event: &Event) -> anyhow::Result<()> {
        debug!(
            connection_id = %connection.id,
            uid = %event.uid,
            cot_type = %event.event_type,
            "Sink dispatch"
        );
        Ok(())
    }
}

/// Delivers one event to WebSocket subscribers, then to sinks.
#[derive(Clone)]
pub(crate) struct Fanout {
    pub(crate) ws: Arc<WsRegistry>,
    pub(crate) sinks: Arc<dyn SinkDispatcher>,
    pub(crate) metrics: Arc<PoolMetrics>,
    pub(crate) nosinks: bool,
}

impl Fanout {
    pub(crate) async fn publish(&self, connection: &Connection, event: &Event, ephemeral: bool) {
        let report = self.ws.broadcast(connection.id, event);
        if report.failed > 0 {
            self.metrics.record_fanout_failures(report.failed as u64);
        }

        if ephemeral || self.nosinks || !event.is_atom() {
            return;
        }

        if let Err(e) = self.sinks.dispatch(connection, event).await {
            warn!(connection_id = %connection.id, error = %e, "Sink dispatch failed");
            self.metrics.record_fanout_failures(1);
        }
    }
}
