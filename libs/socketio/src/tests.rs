use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use crate::engineio::Packet as EnginePacket;
use crate::packet::Packet;
use crate::transport::memory::{MemoryConnector, ServerEnd};
use crate::{Channel, DisconnectReason, Error, Options, TransportKind};

const SERVER: &str = "http://localhost:5000";

fn channel(options: Options) -> (Channel, MemoryConnector, UnboundedReceiver<ServerEnd>) {
    let (connector, accepted) = MemoryConnector::new();
    let channel = Channel::with_connector(SERVER, options, Arc::new(connector.clone())).unwrap();
    (channel, connector, accepted)
}

async fn connected(
    channel: &Channel,
    accepted: &mut UnboundedReceiver<ServerEnd>,
    sid: &str,
) -> (ServerEnd, Value) {
    let connecting = tokio::spawn({
        let channel = channel.clone();
        async move { channel.connect().await }
    });
    let mut server = accepted.recv().await.unwrap();
    let auth = server.accept(sid).await.unwrap();
    connecting.await.unwrap().unwrap();
    (server, auth)
}

fn collect(channel: &Channel, event: &str) -> UnboundedReceiver<Value> {
    let (tx, rx) = unbounded_channel();
    channel.subscribe(event, move |payload| {
        let _ = tx.send(payload);
    });
    rx
}

#[tokio::test]
async fn test_connect_sends_auth_and_exposes_sid() {
    let (channel, _connector, mut accepted) = channel(Options {
        auth: Some(json!({ "token": "secret" })),
        ..Default::default()
    });
    assert!(!channel.is_connected());
    let (server, auth) = connected(&channel, &mut accepted, "sid-1").await;
    assert_eq!(auth, json!({ "token": "secret" }));
    assert_eq!(server.kind, TransportKind::Websocket);
    assert!(channel.is_connected());
    assert_eq!(channel.id().as_deref(), Some("sid-1"));
}

#[tokio::test]
async fn test_url_path_names_namespace() {
    let (connector, mut accepted) = MemoryConnector::new();
    let channel = Channel::with_connector(
        "https://relay.example.com/live",
        Options::default(),
        Arc::new(connector),
    )
    .unwrap();
    assert_eq!(channel.namespace(), "/live");
    assert_eq!(
        crate::transport::endpoint(channel.url(), TransportKind::Websocket)
            .unwrap()
            .as_str(),
        "wss://relay.example.com/socket.io/?EIO=4&transport=websocket"
    );
    connected(&channel, &mut accepted, "sid-1").await;
    assert!(channel.is_connected());

    let channel = Channel::new(
        "http://localhost:5000/live/",
        Options {
            namespace: "/shop".to_string(),
            path: "/rt/".to_string(),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(channel.namespace(), "/shop");
    assert_eq!(channel.url().as_str(), "http://localhost:5000/rt/");
}

#[tokio::test]
async fn test_event_reaches_every_subscriber() {
    let (channel, _connector, mut accepted) = channel(Options::default());
    let mut first = collect(&channel, "viewer-joined");
    let mut second = collect(&channel, "viewer-joined");
    let mut other = collect(&channel, "viewer-left");
    let (server, _) = connected(&channel, &mut accepted, "sid-1").await;

    server.emit("viewer-joined", json!({ "viewerId": "v1", "viewerCount": 1 }));
    assert_eq!(first.recv().await.unwrap()["viewerId"], "v1");
    assert_eq!(second.recv().await.unwrap()["viewerCount"], 1);
    assert!(other.try_recv().is_err());
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let (channel, _connector, mut accepted) = channel(Options::default());
    let (tx, mut dropped) = unbounded_channel::<Value>();
    let id = channel.subscribe("webrtc-answer", move |payload| {
        let _ = tx.send(payload);
    });
    let mut kept = collect(&channel, "webrtc-answer");
    let (server, _) = connected(&channel, &mut accepted, "sid-1").await;

    assert!(channel.unsubscribe(id));
    assert!(!channel.unsubscribe(id));
    server.emit("webrtc-answer", json!({ "viewerId": "v1" }));
    assert_eq!(kept.recv().await.unwrap()["viewerId"], "v1");
    assert!(dropped.try_recv().is_err());
}

#[tokio::test]
async fn test_publish_requires_connection() {
    let (channel, _connector, mut accepted) = channel(Options::default());
    assert!(matches!(
        channel.publish("start-webrtc-stream", json!({})),
        Err(Error::Closed)
    ));

    let (mut server, _) = connected(&channel, &mut accepted, "sid-1").await;
    channel
        .publish("start-webrtc-stream", json!({ "streamId": "s1", "streamKey": "k1" }))
        .unwrap();
    let (name, payload) = server.next_event().await.unwrap();
    assert_eq!(name, "start-webrtc-stream");
    assert_eq!(payload, json!({ "streamId": "s1", "streamKey": "k1" }));
}

#[tokio::test]
async fn test_connect_error_is_reported() {
    let (channel, _connector, mut accepted) = channel(Options {
        transports: vec![TransportKind::Websocket],
        ..Default::default()
    });
    let connecting = tokio::spawn({
        let channel = channel.clone();
        async move { channel.connect().await }
    });
    let mut server = accepted.recv().await.unwrap();
    server.reject("unauthorized").await;
    match connecting.await.unwrap() {
        Err(Error::Connection(message)) => assert_eq!(message, "unauthorized"),
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(!channel.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout() {
    let (channel, _connector, _accepted) = channel(Options {
        connect_timeout_ms: 15000,
        ..Default::default()
    });
    // The relay accepts the transport but never acknowledges the namespace.
    match channel.connect().await {
        Err(Error::ConnectionTimeout(timeout)) => {
            assert_eq!(timeout, Duration::from_millis(15000))
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_relay() {
    let (channel, connector, mut accepted) = channel(Options::default());
    connector.set_online(false);
    assert!(matches!(channel.connect().await, Err(Error::Connection(_))));
    // websocket, then polling
    assert_eq!(connector.attempts(), 2);

    // the channel can be connected again once the relay is back
    connector.set_online(true);
    connected(&channel, &mut accepted, "sid-2").await;
    assert!(channel.is_connected());
}

#[tokio::test]
async fn test_fallback_to_polling() {
    let (channel, connector, mut accepted) = channel(Options::default());
    connector.refuse(TransportKind::Websocket);
    let (server, _) = connected(&channel, &mut accepted, "sid-1").await;
    assert_eq!(server.kind, TransportKind::Polling);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_link_loss() {
    let (channel, _connector, mut accepted) = channel(Options::default());
    let (tx, mut reconnects) = unbounded_channel();
    channel.on_reconnect(move |attempt| {
        let _ = tx.send(attempt);
    });
    let mut events = collect(&channel, "viewer-joined");
    let (server, _) = connected(&channel, &mut accepted, "sid-1").await;

    drop(server);
    let mut server = accepted.recv().await.unwrap();
    server.accept("sid-2").await.unwrap();
    assert_eq!(reconnects.recv().await, Some(1));
    assert_eq!(channel.id().as_deref(), Some("sid-2"));

    // subscriptions survive the reconnect
    server.emit("viewer-joined", json!({ "viewerId": "v2" }));
    assert_eq!(events.recv().await.unwrap()["viewerId"], "v2");
}

#[tokio::test(start_paused = true)]
async fn test_publish_while_reconnecting_is_flushed() {
    let (channel, connector, mut accepted) = channel(Options::default());
    let (server, _) = connected(&channel, &mut accepted, "sid-1").await;
    connector.set_online(false);
    drop(server);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!channel.is_connected());
    channel
        .publish("webrtc-offer", json!({ "viewerId": "v1" }))
        .unwrap();

    connector.set_online(true);
    let mut server = accepted.recv().await.unwrap();
    server.accept("sid-2").await.unwrap();
    let (name, payload) = server.next_event().await.unwrap();
    assert_eq!(name, "webrtc-offer");
    assert_eq!(payload["viewerId"], "v1");
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_gives_up() {
    let (channel, connector, mut accepted) = channel(Options {
        reconnection_attempts: 3,
        ..Default::default()
    });
    let (tx, mut reasons) = unbounded_channel();
    channel.on_disconnect(move |reason| {
        let _ = tx.send(reason);
    });
    let (server, _) = connected(&channel, &mut accepted, "sid-1").await;
    let before = connector.attempts();
    connector.set_online(false);
    drop(server);

    assert_eq!(
        reasons.recv().await,
        Some(DisconnectReason::ReconnectFailed(3))
    );
    // two transports per attempt
    assert_eq!(connector.attempts() - before, 6);
    assert!(!channel.is_connected());
    assert!(matches!(
        channel.publish("webrtc-offer", json!({})),
        Err(Error::Closed)
    ));
}

#[tokio::test]
async fn test_no_reconnect_when_disabled() {
    let (channel, _connector, mut accepted) = channel(Options {
        reconnection: false,
        ..Default::default()
    });
    let (tx, mut reasons) = unbounded_channel();
    channel.on_disconnect(move |reason| {
        let _ = tx.send(reason);
    });
    let (server, _) = connected(&channel, &mut accepted, "sid-1").await;
    drop(server);
    assert!(matches!(
        reasons.recv().await,
        Some(DisconnectReason::TransportClose(_))
    ));
}

#[tokio::test]
async fn test_server_disconnect() {
    let (channel, _connector, mut accepted) = channel(Options::default());
    let (tx, mut reasons) = unbounded_channel();
    channel.on_disconnect(move |reason| {
        let _ = tx.send(reason);
    });
    let (server, _) = connected(&channel, &mut accepted, "sid-1").await;
    let disconnect = Packet::Disconnect {
        namespace: "/".to_string(),
    };
    server
        .to_client
        .send(EnginePacket::Message(disconnect.encode()))
        .unwrap();
    assert_eq!(reasons.recv().await, Some(DisconnectReason::ServerDisconnect));
    assert!(!channel.is_connected());
}

#[tokio::test]
async fn test_client_disconnect() {
    let (channel, _connector, mut accepted) = channel(Options::default());
    let (tx, mut reasons) = unbounded_channel();
    channel.on_disconnect(move |reason| {
        let _ = tx.send(reason);
    });
    let (mut server, _) = connected(&channel, &mut accepted, "sid-1").await;

    channel.disconnect().await;
    assert_eq!(reasons.try_recv().ok(), Some(DisconnectReason::ClientDisconnect));
    assert!(!channel.is_connected());
    assert_eq!(channel.id(), None);

    let mut saw_disconnect = false;
    while let Some(packet) = server.from_client.recv().await {
        if let EnginePacket::Message(raw) = packet {
            if Packet::decode(&raw).unwrap() == (Packet::Disconnect { namespace: "/".to_string() }) {
                saw_disconnect = true;
            }
        }
    }
    assert!(saw_disconnect);

    // a second disconnect is a no-op
    channel.disconnect().await;
}
