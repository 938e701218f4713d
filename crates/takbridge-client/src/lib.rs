//! # takbridge-client
//!
//! Streaming TLS client for a single TAK server connection.
//!
//! A [`TlsClient`](tls::TlsClient) owns one mutual-TLS socket. It writes a
//! ping as soon as the session starts and every ping interval after that,
//! cuts the incoming byte stream into CoT events, and reports what it sees as
//! [`ClientEvent`]s on a channel:
//!
//! - `t-x-c-t-r` handshake replies mark the client open and emit `Ping`
//! - `t-x-takp-v` banners record the server version
//! - every other event is emitted as `Cot`
//! - the end of a session is reported once, as `End`, `Timeout` or `Error`
//!
//! The client never reconnects on its own; the owner decides when to call
//! [`TakClient::reconnect`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use takbridge_client::{ClientEvent, TakClient};
//! use takbridge_client::tls::{TlsClient, TlsClientConfig};
//! use takbridge_core::{ConnectionAuth, ConnectionId};
//!
//! #[tokio::main]
//! async fn main() -> takbridge_core::Result<()> {
//!     let auth = ConnectionAuth::new(
//!         std::fs::read_to_string("client.pem")?,
//!         std::fs::read_to_string("client.key")?,
//!     );
//!     let (client, mut events) = TlsClient::connect(
//!         ConnectionId::new(1),
//!         "ssl://tak.example.com:8089",
//!         &auth,
//!         TlsClientConfig::default(),
//!     )?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             ClientEvent::Cot(cot) => println!("{}", cot.raw),
//!             ClientEvent::Ping => println!("open: {}", client.is_open()),
//!             other => {
//!                 println!("session ended: {:?}", other);
//!                 break;
//!             }
//!         }
//!     }
//!
//!     client.destroy();
//!     Ok(())
//! }
//! ```

pub mod client;
mod inbound;
pub mod state;
pub mod tls;

// Re-export commonly used types
pub use client::{ClientConfig, ClientEvent, ClientEvents, ClientFactory, ClientHandle, TakClient};
pub use state::{ClientState, ConnectionMetrics, ConnectionState, MetricsSnapshot};
pub use tls::{TlsClient, TlsClientConfig, TlsClientFactory};
