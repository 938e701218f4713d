//! Core types for the takbridge connection pool.
//!
//! This module defines the connection records read from the metadata store,
//! the status reported for each pool entry, and the TAK server URL.

use crate::error::{CertificateError, ConnectionError, Result};
use http::Uri;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a connection record in the metadata store.
///
/// Connection ids are assigned by the store and are stable for the lifetime
/// of the record, so the pool keys its entries by them.
///
/// # Examples
///
/// ```
/// use takbridge_core::types::ConnectionId;
///
/// let id = ConnectionId::from(7);
/// assert_eq!(id.to_string(), "7");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(i64);

impl ConnectionId {
    /// Creates a connection identifier from its store value.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the underlying store value.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ConnectionId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<ConnectionId> for i64 {
    fn from(id: ConnectionId) -> Self {
        id.0
    }
}

/// Mutual-TLS credentials of a connection, both PEM encoded.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionAuth {
    /// Client certificate chain (PEM)
    #[serde(default)]
    pub cert: String,

    /// Client private key (PEM)
    #[serde(default)]
    pub key: String,
}

impl ConnectionAuth {
    /// Creates credentials from PEM strings.
    pub fn new(cert: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            cert: cert.into(),
            key: key.into(),
        }
    }

    /// Checks that both the certificate and the key are present.
    pub fn validate(&self) -> Result<()> {
        if self.cert.trim().is_empty() {
            return Err(CertificateError::MissingCertificate.into());
        }
        if self.key.trim().is_empty() {
            return Err(CertificateError::MissingPrivateKey.into());
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionAuth")
            .field("cert_len", &self.cert.len())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// A logical connection to a TAK server, as stored in the metadata store.
///
/// The pool never mutates a `Connection`; a changed record is applied by
/// deleting the pool entry and adding it again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Store identifier
    pub id: ConnectionId,

    /// Human readable name
    pub name: String,

    /// Disabled connections are skipped during pool bootstrap
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Readonly connections accept no writes from the API layer
    #[serde(default)]
    pub readonly: bool,

    /// Mutual-TLS credentials
    #[serde(default)]
    pub auth: ConnectionAuth,

    /// Owning agency, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agency: Option<i64>,

    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Connection {
    /// Creates an enabled connection record.
    pub fn new(id: impl Into<ConnectionId>, name: impl Into<String>, auth: ConnectionAuth) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            readonly: false,
            auth,
            agency: None,
            description: None,
        }
    }

    /// Sets the enabled flag.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the owning agency.
    pub fn with_agency(mut self, agency: i64) -> Self {
        self.agency = Some(agency);
        self
    }
}

/// Status of a pool entry as reported to the API layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Entry exists and its client has seen the handshake acknowledgement
    Live,
    /// Entry exists but its client is not open
    Dead,
    /// No entry for this id
    Unknown,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Live => write!(f, "live"),
            ConnectionStatus::Dead => write!(f, "dead"),
            ConnectionStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Aggregate status counts across pool entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub live: usize,
    pub dead: usize,
    pub unknown: usize,
}

impl StatusSummary {
    /// Counts one status.
    pub fn record(&mut self, status: ConnectionStatus) {
        match status {
            ConnectionStatus::Live => self.live += 1,
            ConnectionStatus::Dead => self.dead += 1,
            ConnectionStatus::Unknown => self.unknown += 1,
        }
    }

    /// Total number of counted entries.
    pub fn total(&self) -> usize {
        self.live + self.dead + self.unknown
    }
}

impl FromIterator<ConnectionStatus> for StatusSummary {
    fn from_iter<I: IntoIterator<Item = ConnectionStatus>>(iter: I) -> Self {
        let mut summary = StatusSummary::default();
        for status in iter {
            summary.record(status);
        }
        summary
    }
}

/// Scheme accepted for TAK streaming connections.
pub const TAK_SCHEME: &str = "ssl";

/// Default TAK streaming port.
pub const DEFAULT_TAK_PORT: u16 = 8089;

/// A parsed `ssl://host:port` TAK server URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TakServerUrl {
    host: String,
    port: u16,
}

impl TakServerUrl {
    /// Parses a TAK server URL.
    ///
    /// Only the `ssl` scheme is accepted; the port defaults to 8089.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::UnsupportedProtocol` for any other scheme and
    /// `ConnectionError::InvalidUrl` when the URL cannot be parsed or has no host.
    pub fn parse(url: &str) -> Result<Self> {
        let uri: Uri = url
            .parse()
            .map_err(|e: http::uri::InvalidUri| ConnectionError::invalid_url(url, e.to_string()))?;

        match uri.scheme_str() {
            Some(TAK_SCHEME) => {}
            Some(other) => {
                return Err(ConnectionError::UnsupportedProtocol {
                    protocol: other.to_string(),
                }
                .into())
            }
            None => return Err(ConnectionError::invalid_url(url, "missing scheme").into()),
        }

        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConnectionError::invalid_url(url, "missing host"))?;

        // IPv6 literals come back bracketed
        let host = host.trim_start_matches('[').trim_end_matches(']').to_string();

        Ok(Self {
            host,
            port: uri.port_u16().unwrap_or(DEFAULT_TAK_PORT),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for TakServerUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", TAK_SCHEME, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", TAK_SCHEME, self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TakBridgeError;

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(42).to_string(), "42");
        assert_eq!(i64::from(ConnectionId::from(3)), 3);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&ConnectionStatus::Live).unwrap(), "\"live\"");
        assert_eq!(ConnectionStatus::Unknown.to_string(), "unknown");
    }

    #[test]
    fn test_status_summary() {
        let summary: StatusSummary = [
            ConnectionStatus::Live,
            ConnectionStatus::Dead,
            ConnectionStatus::Live,
        ]
        .into_iter()
        .collect();

        assert_eq!(summary.live, 2);
        assert_eq!(summary.dead, 1);
        assert_eq!(summary.unknown, 0);
        assert_eq!(summary.total(), 3);
    }

    #[test]
    fn test_parse_tak_url() {
        let url = TakServerUrl::parse("ssl://ops.example.com:8089").unwrap();
        assert_eq!(url.host(), "ops.example.com");
        assert_eq!(url.port(), 8089);
        assert_eq!(url.to_string(), "ssl://ops.example.com:8089");

        let url = TakServerUrl::parse("ssl://10.0.0.5").unwrap();
        assert_eq!(url.port(), DEFAULT_TAK_PORT);
    }

    #[test]
    fn test_parse_ipv6_url() {
        let url = TakServerUrl::parse("ssl://[::1]:8443").unwrap();
        assert_eq!(url.host(), "::1");
        assert_eq!(url.to_string(), "ssl://[::1]:8443");
    }

    #[test]
    fn test_unsupported_scheme() {
        let err = TakServerUrl::parse("tcp://ops.example.com:8087").unwrap_err();
        assert!(matches!(
            err,
            TakBridgeError::Connection(ConnectionError::UnsupportedProtocol { ref protocol }) if protocol == "tcp"
        ));
    }

    #[test]
    fn test_invalid_url() {
        assert!(TakServerUrl::parse("not a url").is_err());
        assert!(TakServerUrl::parse("ops.example.com:8089").is_err());
    }

    #[test]
    fn test_auth_validation() {
        assert!(ConnectionAuth::new("cert", "key").validate().is_ok());
        assert!(matches!(
            ConnectionAuth::new("", "key").validate(),
            Err(TakBridgeError::Certificate(CertificateError::MissingCertificate))
        ));
        assert!(matches!(
            ConnectionAuth::new("cert", "  ").validate(),
            Err(TakBridgeError::Certificate(CertificateError::MissingPrivateKey))
        ));
    }

    #[test]
    fn test_auth_debug_redacts_key() {
        let auth = ConnectionAuth::new("cert", "secret-key");
        let debug = format!("{:?}", auth);
        assert!(!debug.contains("secret-key"));
    }

    #[test]
    fn test_connection_from_yaml() {
        let yaml = r#"
id: 4
name: ops
auth:
  cert: "CERT"
  key: "KEY"
"#;
        let conn: Connection = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(conn.id, ConnectionId::new(4));
        assert!(conn.enabled);
        assert!(!conn.readonly);
        assert_eq!(conn.auth.cert, "CERT");
    }
}
