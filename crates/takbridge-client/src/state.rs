use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

/// Lifecycle state of a TAK client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No session is running
    Disconnected,
    /// A session is connecting or waiting for the handshake acknowledgement
    Connecting,
    /// The server acknowledged the handshake
    Open,
    /// The client was destroyed; terminal
    Destroyed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Destroyed => write!(f, "Destroyed"),
        }
    }
}

/// Counters for one client across all of its sessions
#[derive(Debug)]
pub struct ConnectionMetrics {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    events_received: AtomicU64,
    decode_errors: AtomicU64,
    sessions: AtomicU64,
    last_activity: RwLock<SystemTime>,
    opened_at: RwLock<Option<SystemTime>>,
}

impl Default for ConnectionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        Self {
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            events_received: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            sessions: AtomicU64::new(0),
            last_activity: RwLock::new(SystemTime::now()),
            opened_at: RwLock::new(None),
        }
    }

    pub fn record_bytes_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_bytes_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
        *self.last_activity.write() = SystemTime::now();
    }

    pub fn record_event(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session(&self) {
        self.sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn events_received(&self) -> u64 {
        self.events_received.load(Ordering::Relaxed)
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    pub fn sessions(&self) -> u64 {
        self.sessions.load(Ordering::Relaxed)
    }

    /// Time since bytes were last received
    pub fn time_since_last_activity(&self) -> Duration {
        self.last_activity.read().elapsed().unwrap_or_default()
    }

    /// How long the current session has been open
    pub fn open_duration(&self) -> Option<Duration> {
        self.opened_at.read().and_then(|t| t.elapsed().ok())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bytes_sent: self.bytes_sent(),
            bytes_received: self.bytes_received(),
            events_received: self.events_received(),
            decode_errors: self.decode_errors(),
            sessions: self.sessions(),
            last_activity: *self.last_activity.read(),
            opened_at: *self.opened_at.read(),
        }
    }
}

/// Snapshot of connection metrics at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub events_received: u64,
    pub decode_errors: u64,
    pub sessions: u64,
    pub last_activity: SystemTime,
    pub opened_at: Option<SystemTime>,
}

#[derive(Debug)]
struct Lifecycle {
    state: ConnectionState,
    session: u64,
}

/// State shared between a client and its session tasks.
///
/// Every session gets a number from [`ClientState::begin_session`]. Updates
/// from a session that has been replaced, or from any session after the
/// client was destroyed, are ignored.
#[derive(Debug)]
pub struct ClientState {
    lifecycle: RwLock<Lifecycle>,
    server_version: RwLock<Option<String>>,
    metrics: ConnectionMetrics,
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientState {
    pub fn new() -> Self {
        Self {
            lifecycle: RwLock::new(Lifecycle {
                state: ConnectionState::Disconnected,
                session: 0,
            }),
            server_version: RwLock::new(None),
            metrics: ConnectionMetrics::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.read().state
    }

    /// Starts a new session and returns its number, or `None` once destroyed.
    pub fn begin_session(&self) -> Option<u64> {
        let mut lifecycle = self.lifecycle.write();
        if lifecycle.state == ConnectionState::Destroyed {
            return None;
        }
        lifecycle.session += 1;
        lifecycle.state = ConnectionState::Connecting;
        *self.metrics.opened_at.write() = None;
        self.metrics.record_session();
        Some(lifecycle.session)
    }

    /// True while `session` is the live session of a client that has not
    /// been destroyed.
    pub fn is_current(&self, session: u64) -> bool {
        let lifecycle = self.lifecycle.read();
        lifecycle.state != ConnectionState::Destroyed && lifecycle.session == session
    }

    /// The handshake acknowledgement arrived on `session`.
    pub fn mark_open(&self, session: u64) {
        let mut lifecycle = self.lifecycle.write();
        if lifecycle.state == ConnectionState::Destroyed || lifecycle.session != session {
            return;
        }
        if lifecycle.state != ConnectionState::Open {
            lifecycle.state = ConnectionState::Open;
            *self.metrics.opened_at.write() = Some(SystemTime::now());
        }
    }

    /// `session` ended. Returns false if it had already been replaced or the
    /// client was destroyed, in which case the end must not be reported.
    pub fn end_session(&self, session: u64) -> bool {
        let mut lifecycle = self.lifecycle.write();
        if lifecycle.state == ConnectionState::Destroyed || lifecycle.session != session {
            return false;
        }
        lifecycle.state = ConnectionState::Disconnected;
        *self.metrics.opened_at.write() = None;
        true
    }

    /// Marks the client destroyed. Returns true only for the first call.
    pub fn mark_destroyed(&self) -> bool {
        let mut lifecycle = self.lifecycle.write();
        if lifecycle.state == ConnectionState::Destroyed {
            return false;
        }
        lifecycle.state = ConnectionState::Destroyed;
        *self.metrics.opened_at.write() = None;
        true
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == ConnectionState::Destroyed
    }

    pub fn set_server_version(&self, version: impl Into<String>) {
        *self.server_version.write() = Some(version.into());
    }

    pub fn server_version(&self) -> Option<String> {
        self.server_version.read().clone()
    }

    pub fn metrics(&self) -> &ConnectionMetrics {
        &self.metrics
    }
}
