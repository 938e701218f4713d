//! Pool, TLS client and fan-out working together against a local TAK server.

#[path = "../crates/takbridge-client/tests/common/mod.rs"]
mod common;

use common::{client_auth, wait_for, MockTak, ACK, POSITION, WAIT};
use std::sync::Arc;
use std::time::Duration;
use takbridge_client::{TakClient, TlsClientConfig, TlsClientFactory};
use takbridge_core::config::{ClientSettings, PoolSettings, ServerSettings};
use takbridge_core::{Connection, ConnectionId, ConnectionStatus};
use takbridge_cot::Event;
use takbridge_pool::{ChannelWsClient, ConnectionPool, MemoryStore, PoolConfig, WsFormat};
use tokio::time::timeout;

const ID: ConnectionId = ConnectionId::new(1);

fn pool_for(server: &MockTak) -> ConnectionPool {
    let settings = ServerSettings {
        url: server.url(),
        ..Default::default()
    };
    let store = MemoryStore::from_connections([Connection::new(1, "Field Team", client_auth())]);
    let factory = TlsClientFactory::new(TlsClientConfig::from_settings(
        &settings,
        &ClientSettings::default(),
    ));

    ConnectionPool::new(
        PoolConfig::from_settings(&settings, &PoolSettings::default()),
        Arc::new(store),
        Arc::new(factory),
    )
}

#[tokio::test]
async fn test_received_event_is_broadcast_once() {
    let server = MockTak::start().await;
    let pool = pool_for(&server);

    let (subscriber, mut messages) = ChannelWsClient::new(WsFormat::Raw);
    pool.ws_registry().register(ID, Arc::new(subscriber));

    assert_eq!(pool.init().await.unwrap(), 1);
    assert_eq!(pool.status(ID), ConnectionStatus::Dead);

    let mut peer = server.accept().await;
    peer.expect_line(r#"type="t-x-c-t""#).await;
    peer.send(ACK).await;
    wait_for(|| pool.status(ID) == ConnectionStatus::Live).await;

    peer.send(POSITION).await;
    let message = timeout(WAIT, messages.recv()).await.unwrap().unwrap();
    let message: serde_json::Value = serde_json::from_str(&message).unwrap();
    assert_eq!(message["type"], "cot");
    assert_eq!(message["connection"], 1);
    assert_eq!(message["data"], POSITION);

    assert!(timeout(Duration::from_millis(200), messages.recv()).await.is_err());
    assert_eq!(pool.has_opened(ID), Some(true));

    pool.shutdown().await;
}

#[tokio::test]
async fn test_ack_and_event_in_one_write() {
    let server = MockTak::start().await;
    let pool = pool_for(&server);

    let (subscriber, mut messages) = ChannelWsClient::new(WsFormat::Raw);
    pool.ws_registry().register(ID, Arc::new(subscriber));
    pool.init().await.unwrap();

    let mut peer = server.accept().await;
    peer.expect_line(r#"type="t-x-c-t""#).await;

    let event = r#"<event version="2.0" uid="GROUND-1" type="a-f-G" how="m-g"><point lat="10" lon="20" hae="0" ce="1" le="1"/></event>"#;
    peer.send(&format!(r#"<event type="t-x-c-t-r"/>{}"#, event)).await;

    let message = timeout(WAIT, messages.recv()).await.unwrap().unwrap();
    let message: serde_json::Value = serde_json::from_str(&message).unwrap();
    assert_eq!(message["data"], event);
    assert!(timeout(Duration::from_millis(200), messages.recv()).await.is_err());

    assert_eq!(pool.status(ID), ConnectionStatus::Live);
    assert!(pool.client(ID).unwrap().is_open());

    pool.shutdown().await;
}

#[tokio::test]
async fn test_pool_reconnects_after_server_close() {
    let server = MockTak::start().await;
    let pool = pool_for(&server);
    pool.init().await.unwrap();

    let mut peer = server.accept().await;
    peer.expect_line(r#"type="t-x-c-t""#).await;
    peer.send(ACK).await;
    wait_for(|| pool.status(ID) == ConnectionStatus::Live).await;

    peer.close().await;
    wait_for(|| pool.status(ID) == ConnectionStatus::Dead).await;

    // First retry comes after one step
    let mut peer = server.accept().await;
    peer.expect_line(r#"type="t-x-c-t""#).await;
    peer.send(ACK).await;
    wait_for(|| pool.status(ID) == ConnectionStatus::Live).await;
    assert_eq!(pool.metrics().reconnects(), 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn test_write_reaches_server() {
    let server = MockTak::start().await;
    let pool = pool_for(&server);
    pool.init().await.unwrap();

    let mut peer = server.accept().await;
    peer.expect_line(r#"type="t-x-c-t""#).await;
    peer.send(ACK).await;
    wait_for(|| pool.status(ID) == ConnectionStatus::Live).await;

    let mut event = Event::new("b-t-f", "GeoChat.takbridge.All Chat Rooms.1");
    event.how = "h-g-i-g-o".to_string();
    pool.write(ID, &[event]).await.unwrap();

    let line = peer.expect_line("GeoChat.takbridge").await;
    assert!(line.contains(r#"type="b-t-f""#));

    pool.shutdown().await;
}
