//! Shared helpers for integration tests: a local TLS server speaking the TAK
//! stream protocol and credential generation.
//!
//! The root crate's end-to-end tests include this module by path.

#![allow(dead_code)]

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::sync::Arc;
use std::time::Duration;
use takbridge_core::ConnectionAuth;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

pub const ACK: &str = r#"<event version="2.0" uid="takPong" type="t-x-c-t-r" how="h-g-i-g-o"/>"#;
pub const BANNER: &str = r#"<event version="2.0" uid="protouid" type="t-x-takp-v" how="m-g"><point lat="0" lon="0" hae="0" ce="999999" le="999999"/><detail><TakControl><TakServerVersionInfo serverVersion="5.2-RELEASE-16"/></TakControl></detail></event>"#;
pub const POSITION: &str = r#"<event version="2.0" uid="ANDROID-1" type="a-f-G-U-C" how="m-g"><point lat="38.5" lon="-77.25" hae="0" ce="10" le="10"/><detail><contact callsign="ALPHA"/></detail></event>"#;

pub const WAIT: Duration = Duration::from_secs(5);

/// A TAK server bound to an ephemeral localhost port
pub struct MockTak {
    listener: TcpListener,
    acceptor: TlsAcceptor,
}

/// The server side of one accepted client session
pub struct Peer {
    lines: tokio::io::Lines<BufReader<ReadHalf<TlsStream<TcpStream>>>>,
    pub writer: WriteHalf<TlsStream<TcpStream>>,
}

impl MockTak {
    pub async fn start() -> Self {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let certs = vec![CertificateDer::from(cert.der().to_vec())];
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

        let config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();

        Self {
            listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
            acceptor: TlsAcceptor::from(Arc::new(config)),
        }
    }

    pub fn url(&self) -> String {
        format!("ssl://{}", self.listener.local_addr().unwrap())
    }

    pub async fn accept(&self) -> Peer {
        let (tcp, _) = timeout(WAIT, self.listener.accept()).await.unwrap().unwrap();
        let tls = self.acceptor.accept(tcp).await.unwrap();
        let (reader, writer) = tokio::io::split(tls);
        Peer {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }
}

impl Peer {
    pub async fn send(&mut self, xml: &str) {
        self.writer.write_all(xml.as_bytes()).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Reads lines until one contains `needle`.
    pub async fn expect_line(&mut self, needle: &str) -> String {
        timeout(WAIT, async {
            loop {
                let line = self.lines.next_line().await.unwrap().expect("client closed");
                if line.contains(needle) {
                    return line;
                }
            }
        })
        .await
        .unwrap()
    }

    /// Closes the session from the server side.
    pub async fn close(mut self) {
        let _ = self.writer.shutdown().await;
    }
}

/// Self-signed client credentials
pub fn client_auth() -> ConnectionAuth {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["takbridge-client".to_string()]).unwrap();
    ConnectionAuth::new(cert.pem(), key_pair.serialize_pem())
}

/// Polls `condition` until it holds or [`WAIT`] elapses.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
