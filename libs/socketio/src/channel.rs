use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::engineio::Packet as EnginePacket;
use crate::error::{Error, Result};
use crate::options::Options;
use crate::packet::{Packet, DEFAULT_NAMESPACE};
use crate::transport::{Connector, DefaultConnector, Transport};

pub type SubscriptionId = u64;

type Handler = Arc<dyn Fn(Value) + Send + Sync>;
type DisconnectHook = Arc<dyn Fn(DisconnectReason) + Send + Sync>;
type ReconnectHook = Arc<dyn Fn(u32) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `Channel::disconnect` was called.
    ClientDisconnect,
    /// The server closed our namespace; socket.io does not reconnect after this.
    ServerDisconnect,
    /// The link dropped and reconnection is disabled.
    TransportClose(String),
    /// Every reconnection attempt failed.
    ReconnectFailed(u32),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ClientDisconnect => write!(f, "client disconnect"),
            DisconnectReason::ServerDisconnect => write!(f, "server disconnect"),
            DisconnectReason::TransportClose(reason) => write!(f, "transport close: {}", reason),
            DisconnectReason::ReconnectFailed(attempts) => {
                write!(f, "reconnect failed after {} attempts", attempts)
            }
        }
    }
}

enum Outbound {
    Event(String, Value),
    Close(oneshot::Sender<()>),
}

#[derive(Default)]
struct Hooks {
    handlers: HashMap<String, Vec<(SubscriptionId, Handler)>>,
    disconnect: Vec<DisconnectHook>,
    reconnect: Vec<ReconnectHook>,
}

#[derive(Default)]
struct State {
    running: bool,
    connected: bool,
    sid: Option<String>,
}

struct Shared {
    url: Url,
    options: Options,
    connector: Arc<dyn Connector>,
    hooks: Mutex<Hooks>,
    state: Mutex<State>,
    next_id: AtomicU64,
    // The outbound queue rests here while no driver task is running.
    parked: Mutex<Option<UnboundedReceiver<Outbound>>>,
}

/// Persistent, auto-reconnecting connection to a socket.io relay with a
/// multi-subscriber event surface.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<Shared>,
    outbound: UnboundedSender<Outbound>,
}

impl Channel {
    pub fn new(server_url: &str, options: Options) -> Result<Self> {
        Self::with_connector(server_url, options, Arc::new(DefaultConnector))
    }

    pub fn with_connector(
        server_url: &str,
        options: Options,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        let mut options = options;
        let mut url = Url::parse(server_url)?;
        let namespace = url.path().trim_end_matches('/').to_string();
        if !namespace.is_empty() && options.namespace == DEFAULT_NAMESPACE {
            options.namespace = namespace;
        }
        options.validate()?;
        url.set_path(&options.path);
        let (outbound, rx) = unbounded_channel();
        Ok(Self {
            shared: Arc::new(Shared {
                url,
                options,
                connector,
                hooks: Default::default(),
                state: Default::default(),
                next_id: AtomicU64::new(1),
                parked: Mutex::new(Some(rx)),
            }),
            outbound,
        })
    }

    /// Server url with the Engine.IO path in place of the namespace path.
    pub fn url(&self) -> &Url {
        &self.shared.url
    }

    pub fn namespace(&self) -> &str {
        &self.shared.options.namespace
    }

    /// Resolves once the namespace CONNECT is acknowledged. Fails with
    /// `Error::ConnectionTimeout` after `connect_timeout_ms` or with
    /// `Error::Connection` when every transport reported an error first.
    pub async fn connect(&self) -> Result<()> {
        let rx = self
            .shared
            .parked
            .lock()
            .ok()
            .and_then(|mut parked| parked.take())
            .ok_or_else(|| Error::connection("already connected"))?;
        self.shared.set_running(true);
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(self.shared.clone().run(rx, ready_tx));
        ready_rx
            .await
            .unwrap_or_else(|_| Err(Error::connection("connection task ended")))
    }

    /// Best effort, at most once. Events published while a reconnect is in
    /// progress are flushed once the link is back.
    pub fn publish(&self, event: &str, payload: Value) -> Result<()> {
        if !self.shared.is_running() {
            return Err(Error::Closed);
        }
        self.outbound
            .send(Outbound::Event(event.to_string(), payload))
            .map_err(|_| Error::Closed)
    }

    pub fn subscribe<F>(&self, event: &str, handler: F) -> SubscriptionId
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut hooks) = self.shared.hooks.lock() {
            hooks
                .handlers
                .entry(event.to_string())
                .or_default()
                .push((id, Arc::new(handler)));
        }
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Ok(mut hooks) = self.shared.hooks.lock() else {
            return false;
        };
        let mut removed = false;
        for handlers in hooks.handlers.values_mut() {
            let before = handlers.len();
            handlers.retain(|(handler_id, _)| *handler_id != id);
            removed |= handlers.len() != before;
        }
        hooks.handlers.retain(|_, handlers| !handlers.is_empty());
        removed
    }

    pub fn on_disconnect<F>(&self, hook: F)
    where
        F: Fn(DisconnectReason) + Send + Sync + 'static,
    {
        if let Ok(mut hooks) = self.shared.hooks.lock() {
            hooks.disconnect.push(Arc::new(hook));
        }
    }

    pub fn on_reconnect<F>(&self, hook: F)
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        if let Ok(mut hooks) = self.shared.hooks.lock() {
            hooks.reconnect.push(Arc::new(hook));
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared
            .state
            .lock()
            .map(|state| state.connected)
            .unwrap_or(false)
    }

    /// Socket id from the server's CONNECT ack.
    pub fn id(&self) -> Option<String> {
        self.shared
            .state
            .lock()
            .ok()
            .and_then(|state| state.sid.clone())
    }

    pub async fn disconnect(&self) {
        if !self.shared.is_running() {
            return;
        }
        let (tx, rx) = oneshot::channel();
        if self.outbound.send(Outbound::Close(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

struct Link {
    transport: Box<dyn Transport>,
    sid: String,
}

enum LinkEnd {
    Closed(Option<oneshot::Sender<()>>),
    ServerDisconnect,
    Lost(String),
}

enum Reconnect {
    Linked(Link, u32),
    Closed(Option<oneshot::Sender<()>>),
    Exhausted(u32),
}

impl Shared {
    fn is_running(&self) -> bool {
        self.state.lock().map(|state| state.running).unwrap_or(false)
    }

    fn set_running(&self, running: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.running = running;
        }
    }

    fn set_link(&self, sid: Option<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.connected = sid.is_some();
            state.sid = sid;
        }
    }

    fn park(&self, rx: UnboundedReceiver<Outbound>) {
        self.set_link(None);
        self.set_running(false);
        if let Ok(mut parked) = self.parked.lock() {
            parked.replace(rx);
        }
    }

    fn dispatch(&self, name: &str, payload: Value) {
        let handlers: Vec<Handler> = match self.hooks.lock() {
            Ok(hooks) => hooks
                .handlers
                .get(name)
                .map(|handlers| handlers.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default(),
            Err(_) => return,
        };
        if handlers.is_empty() {
            trace!("[socketio] no handler for event: {}", name);
        }
        for handler in handlers {
            handler(payload.clone());
        }
    }

    fn fire_disconnect(&self, reason: DisconnectReason) {
        let hooks: Vec<DisconnectHook> = match self.hooks.lock() {
            Ok(hooks) => hooks.disconnect.clone(),
            Err(_) => return,
        };
        for hook in hooks {
            hook(reason.clone());
        }
    }

    fn fire_reconnect(&self, attempt: u32) {
        let hooks: Vec<ReconnectHook> = match self.hooks.lock() {
            Ok(hooks) => hooks.reconnect.clone(),
            Err(_) => return,
        };
        for hook in hooks {
            hook(attempt);
        }
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.options.connect_timeout_ms)
    }

    async fn run(
        self: Arc<Self>,
        mut outbound: UnboundedReceiver<Outbound>,
        ready: oneshot::Sender<Result<()>>,
    ) {
        let timeout = self.connect_timeout();
        let mut link = match tokio::time::timeout(timeout, self.establish()).await {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => {
                let _ = ready.send(Err(e));
                self.park(outbound);
                return;
            }
            Err(_) => {
                let _ = ready.send(Err(Error::ConnectionTimeout(timeout)));
                self.park(outbound);
                return;
            }
        };
        info!(
            "[socketio] connected to {} via {}, sid: {}",
            self.url,
            link.transport.kind(),
            link.sid
        );
        self.set_link(Some(link.sid.clone()));
        let _ = ready.send(Ok(()));

        let mut pending = VecDeque::new();
        let (reason, reply) = loop {
            match self.pump(&mut link, &mut outbound, &mut pending).await {
                LinkEnd::Closed(reply) => {
                    link.transport.close().await;
                    break (DisconnectReason::ClientDisconnect, reply);
                }
                LinkEnd::ServerDisconnect => {
                    link.transport.close().await;
                    break (DisconnectReason::ServerDisconnect, None);
                }
                LinkEnd::Lost(reason) => {
                    warn!("[socketio] link lost: {}", reason);
                    self.set_link(None);
                    if !self.options.reconnection {
                        break (DisconnectReason::TransportClose(reason), None);
                    }
                    match self.reconnect(&mut outbound, &mut pending).await {
                        Reconnect::Linked(next, attempt) => {
                            info!(
                                "[socketio] reconnected after {} attempts, sid: {}",
                                attempt, next.sid
                            );
                            link = next;
                            self.set_link(Some(link.sid.clone()));
                            self.fire_reconnect(attempt);
                        }
                        Reconnect::Closed(reply) => {
                            break (DisconnectReason::ClientDisconnect, reply)
                        }
                        Reconnect::Exhausted(attempts) => {
                            break (DisconnectReason::ReconnectFailed(attempts), None)
                        }
                    }
                }
            }
        };
        info!("[socketio] disconnected: {}", reason);
        self.set_link(None);
        self.fire_disconnect(reason);
        self.park(outbound);
        if let Some(reply) = reply {
            let _ = reply.send(());
        }
    }

    async fn establish(&self) -> Result<Link> {
        let mut last = None;
        for kind in self.options.transports.iter() {
            let transport = match self.connector.connect(&self.url, *kind).await {
                Ok(transport) => transport,
                Err(e) => {
                    warn!("[socketio] {} transport failed: {}", kind, e);
                    last = Some(e);
                    continue;
                }
            };
            match self.handshake(transport).await {
                Ok(link) => return Ok(link),
                Err(e) => {
                    warn!("[socketio] {} handshake failed: {}", kind, e);
                    last = Some(e);
                }
            }
        }
        Err(last.unwrap_or_else(|| Error::connection("no transport configured")))
    }

    async fn handshake(&self, mut transport: Box<dyn Transport>) -> Result<Link> {
        let namespace = &self.options.namespace;
        let connect = Packet::Connect {
            namespace: namespace.clone(),
            data: self.options.auth.clone(),
        };
        transport
            .send(EnginePacket::Message(connect.encode()))
            .await?;
        loop {
            match transport.recv().await? {
                Some(EnginePacket::Ping(data)) => transport.send(EnginePacket::Pong(data)).await?,
                Some(EnginePacket::Message(raw)) => match Packet::decode(&raw)? {
                    Packet::Connect {
                        namespace: acked,
                        data,
                    } if &acked == namespace => {
                        let sid = data
                            .as_ref()
                            .and_then(|data| data.get("sid"))
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        return Ok(Link { transport, sid });
                    }
                    Packet::ConnectError {
                        namespace: rejected,
                        data,
                    } if &rejected == namespace => {
                        transport.close().await;
                        return Err(Error::Connection(Packet::error_message(&data)));
                    }
                    other => debug!("[socketio] ignored before connect: {:?}", other),
                },
                Some(EnginePacket::Close) | None => {
                    return Err(Error::connection("transport closed during handshake"))
                }
                Some(_) => {}
            }
        }
    }

    async fn pump(
        &self,
        link: &mut Link,
        outbound: &mut UnboundedReceiver<Outbound>,
        pending: &mut VecDeque<(String, Value)>,
    ) -> LinkEnd {
        let namespace = self.options.namespace.as_str();
        while let Some((name, payload)) = pending.pop_front() {
            let packet = Packet::event(namespace, &name, payload);
            if let Err(e) = link
                .transport
                .send(EnginePacket::Message(packet.encode()))
                .await
            {
                return LinkEnd::Lost(e.to_string());
            }
        }

        let deadline = link.transport.handshake().heartbeat_deadline();
        let heartbeat = tokio::time::sleep(deadline);
        tokio::pin!(heartbeat);
        loop {
            tokio::select! {
                message = outbound.recv() => match message {
                    Some(Outbound::Event(name, payload)) => {
                        trace!("[socketio] publish: {}", name);
                        let packet = Packet::event(namespace, &name, payload);
                        if let Err(e) = link.transport.send(EnginePacket::Message(packet.encode())).await {
                            return LinkEnd::Lost(e.to_string());
                        }
                    }
                    Some(Outbound::Close(reply)) => {
                        let packet = Packet::Disconnect { namespace: namespace.to_string() };
                        let _ = link.transport.send(EnginePacket::Message(packet.encode())).await;
                        return LinkEnd::Closed(Some(reply));
                    }
                    None => return LinkEnd::Closed(None),
                },
                packet = link.transport.recv() => match packet {
                    Ok(Some(packet)) => {
                        heartbeat.as_mut().reset(Instant::now() + deadline);
                        if let Some(end) = self.on_packet(link, packet).await {
                            return end;
                        }
                    }
                    Ok(None) => return LinkEnd::Lost("transport closed".to_string()),
                    Err(e) => return LinkEnd::Lost(e.to_string()),
                },
                _ = &mut heartbeat => return LinkEnd::Lost("ping timeout".to_string()),
            }
        }
    }

    async fn on_packet(&self, link: &mut Link, packet: EnginePacket) -> Option<LinkEnd> {
        match packet {
            EnginePacket::Ping(data) => {
                if let Err(e) = link.transport.send(EnginePacket::Pong(data)).await {
                    return Some(LinkEnd::Lost(e.to_string()));
                }
            }
            EnginePacket::Close => return Some(LinkEnd::Lost("closed by server".to_string())),
            EnginePacket::Message(raw) => match Packet::decode(&raw) {
                Ok(Packet::Event {
                    namespace,
                    name,
                    args,
                    ..
                }) if namespace == self.options.namespace => {
                    trace!("[socketio] event: {}", name);
                    self.dispatch(&name, args.into_iter().next().unwrap_or(Value::Null));
                }
                Ok(Packet::Disconnect { namespace }) if namespace == self.options.namespace => {
                    return Some(LinkEnd::ServerDisconnect)
                }
                Ok(other) => debug!("[socketio] ignored packet: {:?}", other),
                Err(e) => warn!("[socketio] malformed packet {}: {}", raw, e),
            },
            _ => {}
        }
        None
    }

    async fn reconnect(
        &self,
        outbound: &mut UnboundedReceiver<Outbound>,
        pending: &mut VecDeque<(String, Value)>,
    ) -> Reconnect {
        let delay = Duration::from_millis(self.options.reconnection_delay_ms);
        let timeout = self.connect_timeout();
        let attempts = self.options.reconnection_attempts;
        for attempt in 1..=attempts {
            let wait = tokio::time::sleep(delay);
            tokio::pin!(wait);
            loop {
                tokio::select! {
                    _ = &mut wait => break,
                    message = outbound.recv() => match message {
                        Some(Outbound::Event(name, payload)) => pending.push_back((name, payload)),
                        Some(Outbound::Close(reply)) => return Reconnect::Closed(Some(reply)),
                        None => return Reconnect::Closed(None),
                    },
                }
            }
            info!("[socketio] reconnect attempt {}/{}", attempt, attempts);
            match tokio::time::timeout(timeout, self.establish()).await {
                Ok(Ok(link)) => return Reconnect::Linked(link, attempt),
                Ok(Err(e)) => warn!("[socketio] reconnect attempt {} failed: {}", attempt, e),
                Err(_) => warn!("[socketio] reconnect attempt {} timed out", attempt),
            }
        }
        Reconnect::Exhausted(attempts)
    }
}
