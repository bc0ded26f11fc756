use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use url::Url;

use crate::engineio::{Handshake, Packet};
use crate::error::{Error, Result};
use crate::packet;
use crate::transport::{Connector, Transport, TransportKind};

/// In-process relay link for tests: every accepted connection hands its
/// server side to the test through `accepted`.
#[derive(Clone)]
pub(crate) struct MemoryConnector {
    accepted: UnboundedSender<ServerEnd>,
    online: Arc<AtomicBool>,
    refused: Arc<Mutex<HashSet<TransportKind>>>,
    attempts: Arc<AtomicU64>,
    ping_interval: u64,
}

impl MemoryConnector {
    pub(crate) fn new() -> (Self, UnboundedReceiver<ServerEnd>) {
        let (accepted, rx) = unbounded_channel();
        (
            Self {
                accepted,
                online: Arc::new(AtomicBool::new(true)),
                refused: Default::default(),
                attempts: Default::default(),
                ping_interval: 25000,
            },
            rx,
        )
    }

    pub(crate) fn with_ping_interval(mut self, ping_interval: u64) -> Self {
        self.ping_interval = ping_interval;
        self
    }

    pub(crate) fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub(crate) fn refuse(&self, kind: TransportKind) {
        if let Ok(mut refused) = self.refused.lock() {
            refused.insert(kind);
        }
    }

    pub(crate) fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _url: &Url, kind: TransportKind) -> Result<Box<dyn Transport>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.online.load(Ordering::SeqCst) {
            return Err(Error::connection("connection refused"));
        }
        if self
            .refused
            .lock()
            .map(|refused| refused.contains(&kind))
            .unwrap_or(false)
        {
            return Err(Error::connection(format!("{} refused", kind)));
        }
        let (to_client, from_server) = unbounded_channel();
        let (to_server, from_client) = unbounded_channel();
        let handshake = Handshake {
            sid: format!("mem-{}", attempt),
            upgrades: vec![],
            ping_interval: self.ping_interval,
            ping_timeout: 20000,
            max_payload: 1_000_000,
        };
        self.accepted
            .send(ServerEnd {
                kind,
                to_client,
                from_client,
            })
            .map_err(|_| Error::connection("memory relay gone"))?;
        Ok(Box::new(MemoryTransport {
            kind,
            handshake,
            to_server,
            from_server,
        }))
    }
}

pub(crate) struct ServerEnd {
    pub(crate) kind: TransportKind,
    pub(crate) to_client: UnboundedSender<Packet>,
    pub(crate) from_client: UnboundedReceiver<Packet>,
}

impl ServerEnd {
    /// Waits for the namespace CONNECT and acknowledges it, returning the
    /// auth payload the client sent.
    pub(crate) async fn accept(&mut self, sid: &str) -> Option<Value> {
        loop {
            match self.from_client.recv().await? {
                Packet::Message(raw) => {
                    if let Ok(packet::Packet::Connect { namespace, data }) =
                        packet::Packet::decode(&raw)
                    {
                        let ack = packet::Packet::Connect {
                            namespace,
                            data: Some(json!({ "sid": sid })),
                        };
                        let _ = self.to_client.send(Packet::Message(ack.encode()));
                        return Some(data.unwrap_or(Value::Null));
                    }
                }
                _ => continue,
            }
        }
    }

    pub(crate) async fn reject(&mut self, message: &str) {
        while let Some(packet) = self.from_client.recv().await {
            if let Packet::Message(_) = packet {
                let error = packet::Packet::ConnectError {
                    namespace: packet::DEFAULT_NAMESPACE.to_string(),
                    data: json!({ "message": message }),
                };
                let _ = self.to_client.send(Packet::Message(error.encode()));
                return;
            }
        }
    }

    pub(crate) fn emit(&self, name: &str, payload: Value) {
        let event = packet::Packet::event(packet::DEFAULT_NAMESPACE, name, payload);
        let _ = self.to_client.send(Packet::Message(event.encode()));
    }

    /// Next event published by the client, skipping heartbeats.
    pub(crate) async fn next_event(&mut self) -> Option<(String, Value)> {
        loop {
            if let Packet::Message(raw) = self.from_client.recv().await? {
                if let Ok(packet::Packet::Event { name, mut args, .. }) =
                    packet::Packet::decode(&raw)
                {
                    let payload = if args.is_empty() {
                        Value::Null
                    } else {
                        args.remove(0)
                    };
                    return Some((name, payload));
                }
            }
        }
    }
}

struct MemoryTransport {
    kind: TransportKind,
    handshake: Handshake,
    to_server: UnboundedSender<Packet>,
    from_server: UnboundedReceiver<Packet>,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    async fn send(&mut self, packet: Packet) -> Result<()> {
        self.to_server.send(packet).map_err(|_| Error::Closed)
    }

    async fn recv(&mut self) -> Result<Option<Packet>> {
        Ok(self.from_server.recv().await)
    }

    async fn close(&mut self) {
        let _ = self.to_server.send(Packet::Close);
    }
}
