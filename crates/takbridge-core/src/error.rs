//! Error types for the takbridge connection pool.
//!
//! All errors implement `std::error::Error` and are serializable so the API
//! layer can return them as-is.

use crate::types::ConnectionId;
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Result type alias using TakBridgeError as the error type.
pub type Result<T> = std::result::Result<T, TakBridgeError>;

/// Top-level error type for takbridge operations.
#[derive(Debug, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum TakBridgeError {
    /// Connection-related errors
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Certificate and TLS credential errors
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Timeout errors
    #[error("Timeout error: {0}")]
    Timeout(#[from] TimeoutError),

    /// Internal errors that shouldn't normally occur
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TakBridgeError {
    /// Returns true if the error is fatal at connect time and retrying with
    /// the same inputs cannot succeed.
    pub fn is_fatal(&self) -> bool {
        match self {
            TakBridgeError::Connection(e) => e.is_fatal(),
            TakBridgeError::Certificate(_) | TakBridgeError::Config(_) => true,
            _ => false,
        }
    }

    /// Returns true for network failures a reconnect may get past.
    pub fn is_transient(&self) -> bool {
        match self {
            TakBridgeError::Connection(e) => e.is_transient(),
            TakBridgeError::Io(_) | TakBridgeError::Timeout(_) => true,
            _ => false,
        }
    }
}

/// Errors related to TAK server connections.
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum ConnectionError {
    /// Failed to establish a connection
    #[error("Failed to connect to {host}:{port}: {reason}")]
    ConnectionFailed {
        host: String,
        port: u16,
        reason: String,
    },

    /// Protocol other than the secure TAK stream
    #[error("Unsupported protocol: {protocol}")]
    UnsupportedProtocol { protocol: String },

    /// Server URL could not be parsed
    #[error("Invalid server URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// TLS handshake failed
    #[error("TLS handshake failed: {reason}")]
    TlsHandshakeFailed { reason: String },

    /// Connection is not established
    #[error("Not connected")]
    NotConnected,

    /// Client was destroyed and accepts no further operations
    #[error("Client destroyed")]
    Destroyed,

    /// A pool entry already exists for this connection
    #[error("Connection {id} is already registered")]
    AlreadyRegistered { id: ConnectionId },

    /// No pool entry exists for this connection
    #[error("Connection {id} is not registered")]
    NotRegistered { id: ConnectionId },

    /// The receive buffer grew past its limit without yielding a frame
    #[error("Receive buffer exceeded {limit} bytes without a complete event")]
    BufferOverflow { limit: usize },
}

impl ConnectionError {
    /// Creates a connection failed error.
    pub fn failed(host: impl Into<String>, port: u16, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            host: host.into(),
            port,
            reason: reason.into(),
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a TLS handshake failed error.
    pub fn tls_handshake_failed(reason: impl Into<String>) -> Self {
        Self::TlsHandshakeFailed {
            reason: reason.into(),
        }
    }

    /// Returns true if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectionError::ConnectionFailed { .. }
                | ConnectionError::TlsHandshakeFailed { .. }
                | ConnectionError::BufferOverflow { .. }
        )
    }

    /// Returns true if this error is fatal and retrying won't help.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConnectionError::UnsupportedProtocol { .. }
                | ConnectionError::InvalidUrl { .. }
                | ConnectionError::Destroyed
                | ConnectionError::AlreadyRegistered { .. }
        )
    }
}

/// Errors related to client certificates and TLS setup.
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum CertificateError {
    /// No client certificate supplied
    #[error("Client certificate is missing")]
    MissingCertificate,

    /// No client private key supplied
    #[error("Client private key is missing")]
    MissingPrivateKey,

    /// PEM input could not be decoded
    #[error("Invalid PEM {what}: {reason}")]
    InvalidPem { what: String, reason: String },

    /// CA bundle could not be loaded
    #[error("Failed to load CA bundle from {path}: {reason}")]
    InvalidCaBundle { path: String, reason: String },

    /// The TLS configuration rejected the certificate or key
    #[error("Invalid client credentials: {reason}")]
    InvalidClientAuth { reason: String },
}

impl CertificateError {
    /// Creates an invalid PEM error.
    pub fn invalid_pem(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPem {
            what: what.into(),
            reason: reason.into(),
        }
    }
}

/// Errors related to configuration.
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {reason}")]
    InvalidFormat { reason: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    /// Creates a file not found error.
    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Wrapper for I/O errors to make them serializable.
#[derive(Debug, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct IoError {
    pub kind: IoErrorKind,
    pub message: String,
}

impl From<io::Error> for IoError {
    fn from(err: io::Error) -> Self {
        Self {
            kind: err.kind().into(),
            message: err.to_string(),
        }
    }
}

impl From<io::Error> for TakBridgeError {
    fn from(err: io::Error) -> Self {
        TakBridgeError::Io(err.into())
    }
}

/// Serializable version of std::io::ErrorKind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoErrorKind {
    NotFound,
    PermissionDenied,
    ConnectionRefused,
    ConnectionReset,
    ConnectionAborted,
    NotConnected,
    BrokenPipe,
    InvalidData,
    TimedOut,
    UnexpectedEof,
    Other,
}

impl From<io::ErrorKind> for IoErrorKind {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound => IoErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => IoErrorKind::PermissionDenied,
            io::ErrorKind::ConnectionRefused => IoErrorKind::ConnectionRefused,
            io::ErrorKind::ConnectionReset => IoErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted => IoErrorKind::ConnectionAborted,
            io::ErrorKind::NotConnected => IoErrorKind::NotConnected,
            io::ErrorKind::BrokenPipe => IoErrorKind::BrokenPipe,
            io::ErrorKind::InvalidData => IoErrorKind::InvalidData,
            io::ErrorKind::TimedOut => IoErrorKind::TimedOut,
            io::ErrorKind::UnexpectedEof => IoErrorKind::UnexpectedEof,
            _ => IoErrorKind::Other,
        }
    }
}

/// Timeout errors for socket operations.
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum TimeoutError {
    /// TCP connect timed out
    #[error("Connection timeout after {timeout_secs}s")]
    ConnectTimeout { timeout_secs: u64 },

    /// TLS handshake timed out
    #[error("TLS handshake timeout after {timeout_secs}s")]
    HandshakeTimeout { timeout_secs: u64 },

    /// Socket write did not complete
    #[error("Write timeout after {timeout_secs}s")]
    WriteTimeout { timeout_secs: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_classification() {
        let err = ConnectionError::failed("tak.example.com", 8089, "connection refused");
        assert!(err.is_transient());
        assert!(!err.is_fatal());

        let err = ConnectionError::UnsupportedProtocol {
            protocol: "tcp".to_string(),
        };
        assert!(!err.is_transient());
        assert!(err.is_fatal());
    }

    #[test]
    fn test_top_level_transient_classification() {
        let err: TakBridgeError = io::Error::new(io::ErrorKind::ConnectionReset, "reset").into();
        assert!(err.is_transient());

        let err: TakBridgeError = TimeoutError::ConnectTimeout { timeout_secs: 10 }.into();
        assert!(err.is_transient());

        let err: TakBridgeError = ConnectionError::failed("tak.example.com", 8089, "refused").into();
        assert!(err.is_transient());

        let err: TakBridgeError = CertificateError::MissingCertificate.into();
        assert!(!err.is_transient());

        let err: TakBridgeError = ConnectionError::Destroyed.into();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_certificate_errors_are_fatal() {
        let err: TakBridgeError = CertificateError::MissingPrivateKey.into();
        assert!(err.is_fatal());

        let err: TakBridgeError = TimeoutError::HandshakeTimeout { timeout_secs: 10 }.into();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_error_serialization() {
        let err = TakBridgeError::Connection(ConnectionError::failed(
            "tak.example.com",
            8089,
            "connection refused",
        ));
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("Connection"));
        assert!(json.contains("tak.example.com"));
    }

    #[test]
    fn test_already_registered_display() {
        let err = ConnectionError::AlreadyRegistered {
            id: ConnectionId::new(9),
        };
        assert_eq!(err.to_string(), "Connection 9 is already registered");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        let err: TakBridgeError = io_err.into();
        assert!(matches!(
            err,
            TakBridgeError::Io(IoError {
                kind: IoErrorKind::ConnectionReset,
                ..
            })
        ));
    }
}
