use crate::state::ConnectionState;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use takbridge_core::config::ClientSettings;
use takbridge_core::{ConnectionAuth, ConnectionId, Result, TakBridgeError};
use takbridge_cot::{encode, Event};
use tokio::sync::mpsc;

/// Configuration for TAK client sessions
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// TCP connect and TLS handshake timeout
    pub connect_timeout: Duration,
    /// Idle window after which a silent session is reported as `Timeout`
    pub read_timeout: Duration,
    /// Write timeout
    pub write_timeout: Duration,
    /// Keep-alive ping interval
    pub ping_interval: Duration,
    /// Capacity of the event channel
    pub channel_capacity: usize,
    /// Receive buffer ceiling without a complete event
    pub max_buffer_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from(&ClientSettings::default())
    }
}

impl From<&ClientSettings> for ClientConfig {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout(),
            read_timeout: settings.read_timeout(),
            write_timeout: Duration::from_secs(10),
            ping_interval: settings.ping_interval(),
            channel_capacity: settings.channel_capacity,
            max_buffer_bytes: settings.max_buffer_bytes,
        }
    }
}

/// What a client reports to its owner.
///
/// Each session ends with exactly one of `End`, `Timeout` or `Error`,
/// unless the client was destroyed.
#[derive(Debug)]
pub enum ClientEvent {
    /// An application event from the server
    Cot(Event),
    /// The server acknowledged the handshake
    Ping,
    /// The session went silent for longer than the read timeout
    Timeout,
    /// The session failed
    Error(TakBridgeError),
    /// The server closed the session
    End,
}

impl ClientEvent {
    /// True for the events that end a session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ClientEvent::Timeout | ClientEvent::Error(_) | ClientEvent::End)
    }
}

/// Receiving side of a client's event channel
pub type ClientEvents = mpsc::Receiver<ClientEvent>;

/// A streaming TAK client.
#[async_trait]
pub trait TakClient: Send + Sync {
    /// Connection this client serves
    fn id(&self) -> ConnectionId;

    /// Tears down the current session, if any, and starts a new one with the
    /// same URL and credentials.
    ///
    /// Does nothing on a destroyed client.
    fn reconnect(&self) -> Result<()>;

    /// Closes the socket and stops all activity. No further events are
    /// emitted. Idempotent.
    fn destroy(&self);

    /// Queues one XML body for the socket; a newline is written after it.
    ///
    /// # Errors
    ///
    /// Fails when the client is destroyed or has no live session.
    async fn write_xml(&self, body: String) -> Result<()>;

    /// Encodes and queues events in order.
    async fn write(&self, events: &[Event]) -> Result<()> {
        for event in events {
            self.write_xml(encode(event)).await?;
        }
        Ok(())
    }

    /// True once the handshake acknowledgement has been seen on the current
    /// session
    fn is_open(&self) -> bool;

    fn is_destroyed(&self) -> bool;

    /// Version reported by the server banner, if one arrived
    fn server_version(&self) -> Option<String>;

    fn state(&self) -> ConnectionState;
}

/// A connected client together with its event channel.
pub struct ClientHandle {
    pub client: Arc<dyn TakClient>,
    pub events: ClientEvents,
}

/// Creates connected clients for the pool.
pub trait ClientFactory: Send + Sync {
    /// Validates the inputs and starts the first session.
    ///
    /// # Errors
    ///
    /// Fails synchronously for an unsupported URL scheme or missing or
    /// malformed credentials. Network failures are reported later as events.
    fn connect(&self, id: ConnectionId, url: &str, auth: &ConnectionAuth) -> Result<ClientHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use takbridge_core::error::ConnectionError;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.ping_interval, Duration::from_secs(5));
        assert!(config.read_timeout > config.ping_interval);
    }

    #[test]
    fn test_terminal_events() {
        assert!(ClientEvent::End.is_terminal());
        assert!(ClientEvent::Timeout.is_terminal());
        assert!(ClientEvent::Error(ConnectionError::NotConnected.into()).is_terminal());
        assert!(!ClientEvent::Ping.is_terminal());
        assert!(!ClientEvent::Cot(Event::new("a-f-G", "u")).is_terminal());
    }
}
