//! # takbridge core
//!
//! Core types, error handling, and configuration for the takbridge TAK connection pool.
//!
//! This crate provides the foundational building blocks shared by the other crates:
//!
//! - **Types**: `ConnectionId`, `Connection` metadata with its mutual-TLS credentials,
//!   the per-entry `ConnectionStatus`, and the parsed `TakServerUrl`.
//! - **Errors**: Error types using `thiserror` for every failure mode of the client
//!   and the pool: connection errors, certificate errors, configuration errors.
//! - **Configuration**: YAML configuration with environment variable overrides
//!   and validation.
//!
//! ## Example
//!
//! ```
//! use takbridge_core::types::TakServerUrl;
//!
//! let url = TakServerUrl::parse("ssl://tak.example.com:8089").unwrap();
//! assert_eq!(url.host(), "tak.example.com");
//! assert_eq!(url.port(), 8089);
//! ```

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types for convenience
pub use config::AppConfig;
pub use error::{Result, TakBridgeError};
pub use types::{
    Connection, ConnectionAuth, ConnectionId, ConnectionStatus, StatusSummary, TakServerUrl,
};
