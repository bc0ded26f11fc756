//! The broadcast actor. Every mutation of the session and the viewer pool
//! happens on its task, fed through one mailbox.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, WeakUnboundedSender};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, trace, warn};

use crate::capture::{MediaCapture, MediaConstraints, SharedMedia};
use crate::error::StreamError;
use crate::event::StreamerEvent;
use crate::message::{
    EndStream, Offer, RelayEvent, StartStream, ViewerChange, END_STREAM, OFFER, START_STREAM,
};
use crate::metrics;
use crate::peer::{PeerEvent, PeerEventSink, PeerFactory, SignalData, ViewerPeer};
use crate::pool::{PeerState, ViewerConnection, ViewerPool};
use crate::session::{Session, SessionStatus, StreamInfo};
use crate::signaling::{Signaling, StreamRegistry};

pub(crate) type StartReply = oneshot::Sender<Result<SharedMedia, StreamError>>;

pub(crate) enum Input {
    Start {
        info: StreamInfo,
        reply: StartReply,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
    Relay(RelayEvent),
    MediaReady {
        generation: u64,
        result: Result<SharedMedia, StreamError>,
    },
    PeerReady {
        viewer_id: String,
        serial: u64,
        result: anyhow::Result<(Arc<dyn ViewerPeer>, SignalData)>,
    },
    Peer {
        viewer_id: String,
        serial: u64,
        event: PeerEvent,
    },
}

/// Hands relay traffic to the coordinator without keeping it alive.
#[derive(Clone)]
pub struct RelaySink {
    inbox: WeakUnboundedSender<Input>,
}

impl RelaySink {
    pub(crate) fn new(inbox: WeakUnboundedSender<Input>) -> Self {
        Self { inbox }
    }

    /// False once the coordinator is gone.
    pub fn deliver(&self, event: RelayEvent) -> bool {
        post(&self.inbox, Input::Relay(event)).is_none()
    }
}

/// The collaborators a coordinator drives.
pub struct Parts {
    pub signaling: Arc<dyn Signaling>,
    pub capture: Arc<dyn MediaCapture>,
    pub peers: Arc<dyn PeerFactory>,
    /// Backend record keeping, skipped when absent.
    pub registry: Option<Arc<dyn StreamRegistry>>,
    pub constraints: MediaConstraints,
    /// Upper bound for the backend end-of-stream call during a stop.
    pub end_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub status: SessionStatus,
    pub stream_id: Option<String>,
    /// Local media is held, whether or not the stream is live yet.
    pub preview: bool,
    pub viewer_count: u64,
    pub viewers: Vec<(String, PeerState)>,
}

pub(crate) struct Coordinator {
    parts: Parts,
    inbox: WeakUnboundedSender<Input>,
    events: broadcast::Sender<StreamerEvent>,
    session: Session,
    pool: ViewerPool,
    viewer_count: u64,
    pending_start: Option<(u64, StartReply)>,
}

impl Coordinator {
    pub(crate) fn new(
        parts: Parts,
        inbox: WeakUnboundedSender<Input>,
        events: broadcast::Sender<StreamerEvent>,
    ) -> Self {
        Self {
            parts,
            inbox,
            events,
            session: Session::default(),
            pool: ViewerPool::default(),
            viewer_count: 0,
            pending_start: None,
        }
    }

    pub(crate) async fn run(mut self, mut inbox: UnboundedReceiver<Input>) {
        while let Some(input) = inbox.recv().await {
            self.handle(input).await;
        }
        self.teardown().await;
        debug!("[coordinator] stopped");
    }

    async fn handle(&mut self, input: Input) {
        match input {
            Input::Start { info, reply } => self.on_start(info, reply),
            Input::Stop { reply } => {
                self.teardown().await;
                let _ = reply.send(());
            }
            Input::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Input::Relay(event) => self.on_relay(event).await,
            Input::MediaReady { generation, result } => self.on_media(generation, result),
            Input::PeerReady {
                viewer_id,
                serial,
                result,
            } => self.on_peer_ready(viewer_id, serial, result).await,
            Input::Peer {
                viewer_id,
                serial,
                event,
            } => self.on_peer_event(viewer_id, serial, event).await,
        }
    }

    fn on_start(&mut self, info: StreamInfo, reply: StartReply) {
        let stream_id = info.stream_id.clone();
        let generation = match self.session.begin(info) {
            Ok(generation) => generation,
            Err(e) => {
                debug!("[{}] start refused: {}", stream_id, e);
                let _ = reply.send(Err(e));
                return;
            }
        };
        info!("[{}] starting, acquiring media", stream_id);
        self.emit(StreamerEvent::StatusChanged(SessionStatus::Starting));
        self.pending_start = Some((generation, reply));

        let capture = self.parts.capture.clone();
        let constraints = self.parts.constraints.clone();
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            let result = capture.acquire(&constraints).await;
            if let Some(Input::MediaReady {
                result: Ok(media), ..
            }) = post(&inbox, Input::MediaReady { generation, result })
            {
                media.stop();
            }
        });
    }

    fn on_media(&mut self, generation: u64, result: Result<SharedMedia, StreamError>) {
        let reply = match self.pending_start.take() {
            Some((pending, reply)) if pending == generation => Some(reply),
            other => {
                self.pending_start = other;
                None
            }
        };

        let media = match result {
            Ok(media) => media,
            Err(e) => {
                if self.session.media_failed(generation) {
                    warn!("[capture] {}", e);
                    self.emit(StreamerEvent::Error(e.clone()));
                    self.emit(StreamerEvent::StatusChanged(SessionStatus::Idle));
                }
                if let Some(reply) = reply {
                    let _ = reply.send(Err(e));
                }
                return;
            }
        };

        let info = match self.session.media_acquired(generation, media.clone()) {
            Some(info) => info,
            None => {
                debug!("[capture] start abandoned, releasing late media");
                media.stop();
                if let Some(reply) = reply {
                    let _ = reply.send(Err(StreamError::StartAborted));
                }
                return;
            }
        };

        self.emit(StreamerEvent::PreviewReady {
            stream_id: info.stream_id.clone(),
        });
        match self.publish(START_STREAM, &start_message(&info)) {
            Ok(()) => {
                self.session.mark_announced();
                info!("[{}] media ready, waiting for relay", info.stream_id);
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(media));
                }
            }
            Err(e) => {
                warn!("[{}] announce failed: {}", info.stream_id, e);
                media.stop();
                self.session.reset();
                self.emit(StreamerEvent::Error(e.clone()));
                self.emit(StreamerEvent::StatusChanged(SessionStatus::Idle));
                if let Some(reply) = reply {
                    let _ = reply.send(Err(e));
                }
            }
        }
    }

    async fn on_relay(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::StreamStarted(data) => self.on_started(data),
            RelayEvent::StartError(e) => self.on_start_error(e.message).await,
            RelayEvent::ViewerJoined(change) => self.on_viewer_joined(change).await,
            RelayEvent::ViewerLeft(change) => self.on_viewer_left(change).await,
            RelayEvent::Answer(answer) => self.forward_signal(&answer.from_id, answer.answer).await,
            RelayEvent::Candidate(candidate) => {
                self.forward_signal(&candidate.from_id, candidate.candidate)
                    .await
            }
            RelayEvent::Disconnected(reason) => self.on_disconnected(reason).await,
            RelayEvent::Reconnected(attempt) => self.on_reconnected(attempt),
        }
    }

    fn on_started(&mut self, data: Value) {
        let confirmed = data
            .get("streamId")
            .and_then(Value::as_str)
            .map(str::to_string);
        if !self.session.started(confirmed.as_deref()) {
            debug!("[relay] ignore stream started: {}", data);
            return;
        }
        let stream_id = self.stream_id().unwrap_or_default();
        metrics::STREAMS.inc();
        info!("[{}] live", stream_id);
        self.emit(StreamerEvent::StatusChanged(SessionStatus::Live));
        self.emit(StreamerEvent::StreamStart { stream_id, data });
    }

    async fn on_start_error(&mut self, message: String) {
        if self.session.reannounce_rejected() {
            warn!("[relay] re-announce rejected: {}", message);
            self.emit(StreamerEvent::Error(StreamError::StreamStartRejected(
                message,
            )));
            self.teardown().await;
            return;
        }
        match self.session.start_rejected() {
            Some(media) => {
                warn!("[relay] stream start rejected: {}", message);
                if let Some(media) = media {
                    media.stop();
                }
                self.emit(StreamerEvent::Error(StreamError::StreamStartRejected(
                    message,
                )));
                self.emit(StreamerEvent::StatusChanged(SessionStatus::Idle));
            }
            None => debug!("[relay] stale stream start error: {}", message),
        }
    }

    async fn on_viewer_joined(&mut self, change: ViewerChange) {
        if let Some(count) = change.viewer_count {
            self.set_viewer_count(count);
        }
        let viewer_id = change.viewer_id;
        let media = match self.session.media() {
            Some(media) if self.session.is_live() => media.clone(),
            _ => {
                debug!("[viewer] [{}] joined before stream is live", viewer_id);
                return;
            }
        };

        let (serial, stale) = self.pool.reserve(&viewer_id);
        if let Some(stale) = stale {
            debug!("[viewer] [{}] rejoined, replacing connection", viewer_id);
            destroy(stale).await;
        }
        info!("[viewer] [{}] joined, preparing offer", viewer_id);

        let peers = self.parts.peers.clone();
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            let sink_inbox = inbox.clone();
            let sink_viewer = viewer_id.clone();
            let events: PeerEventSink = Arc::new(move |event| {
                let _ = post(
                    &sink_inbox,
                    Input::Peer {
                        viewer_id: sink_viewer.clone(),
                        serial,
                        event,
                    },
                );
            });
            let result = prepare_peer(peers.as_ref(), &viewer_id, &media, events).await;
            let ready = Input::PeerReady {
                viewer_id,
                serial,
                result,
            };
            if let Some(Input::PeerReady {
                result: Ok((peer, _)),
                ..
            }) = post(&inbox, ready)
            {
                peer.destroy().await;
            }
        });
    }

    async fn on_peer_ready(
        &mut self,
        viewer_id: String,
        serial: u64,
        result: anyhow::Result<(Arc<dyn ViewerPeer>, SignalData)>,
    ) {
        let (peer, offer) = match result {
            Ok(ready) => ready,
            Err(e) => {
                metrics::PEER_ERRORS.inc();
                warn!("[viewer] [{}] peer setup failed: {}", viewer_id, e);
                self.pool.remove_if(&viewer_id, serial);
                return;
            }
        };
        if let Err(peer) = self.pool.attach(&viewer_id, serial, peer) {
            debug!("[viewer] [{}] gone before offer", viewer_id);
            peer.destroy().await;
            return;
        }

        let offer = Offer {
            stream_id: self.stream_id().unwrap_or_default(),
            offer,
            target_id: viewer_id.clone(),
        };
        match self.publish(OFFER, &offer) {
            Ok(()) => {
                metrics::PEER_OFFERS.inc();
                info!("[viewer] [{}] offer sent", viewer_id);
            }
            Err(e) => {
                warn!("[viewer] [{}] offer not delivered: {}", viewer_id, e);
                if let Some(conn) = self.pool.remove_if(&viewer_id, serial) {
                    destroy(conn).await;
                }
            }
        }
    }

    async fn on_peer_event(&mut self, viewer_id: String, serial: u64, event: PeerEvent) {
        match event {
            PeerEvent::Connect => {
                if self.pool.mark_connected(&viewer_id, serial) {
                    info!("[viewer] [{}] connected", viewer_id);
                    self.emit(StreamerEvent::ViewerConnected { viewer_id });
                }
            }
            PeerEvent::Close => {
                if let Some(conn) = self.pool.remove_if(&viewer_id, serial) {
                    info!("[viewer] [{}] peer closed", viewer_id);
                    destroy(conn).await;
                }
            }
            PeerEvent::Error(e) => {
                if let Some(conn) = self.pool.remove_if(&viewer_id, serial) {
                    metrics::PEER_ERRORS.inc();
                    warn!("[viewer] [{}] peer error: {}", viewer_id, e);
                    destroy(conn).await;
                }
            }
        }
    }

    async fn on_viewer_left(&mut self, change: ViewerChange) {
        if let Some(count) = change.viewer_count {
            self.set_viewer_count(count);
        }
        match self.pool.remove(&change.viewer_id) {
            Some(conn) => {
                info!("[viewer] [{}] left", change.viewer_id);
                destroy(conn).await;
            }
            None => debug!("[viewer] [{}] left, no connection held", change.viewer_id),
        }
    }

    async fn forward_signal(&mut self, viewer_id: &str, data: SignalData) {
        match self.pool.peer(viewer_id) {
            Some(peer) => {
                if let Err(e) = peer.signal(data).await {
                    warn!("[viewer] [{}] signal rejected: {}", viewer_id, e);
                }
            }
            None => trace!("[viewer] [{}] drop signal, no peer", viewer_id),
        }
    }

    async fn on_disconnected(&mut self, reason: String) {
        if matches!(
            self.session.status(),
            SessionStatus::Starting | SessionStatus::Live
        ) {
            warn!("[relay] disconnected while streaming: {}", reason);
            self.emit(StreamerEvent::Error(StreamError::RelayDisconnected(reason)));
            self.teardown().await;
        } else {
            info!("[relay] disconnected: {}", reason);
        }
    }

    fn on_reconnected(&mut self, attempt: u32) {
        info!("[relay] reconnected after {} attempt(s)", attempt);
        self.emit(StreamerEvent::Reconnected(attempt));
        if !self.session.announced() {
            return;
        }
        // The relay keys streams by socket, a new socket has to announce again.
        if let Some(info) = self.session.info().cloned() {
            match self.publish(START_STREAM, &start_message(&info)) {
                Ok(()) => self.session.mark_reannounced(),
                Err(e) => warn!("[{}] re-announce failed: {}", info.stream_id, e),
            }
        }
    }

    /// Releases everything the session holds, in order: viewers, media, relay,
    /// backend. A no-op when nothing is active.
    async fn teardown(&mut self) {
        let teardown = match self.session.begin_stop() {
            Some(teardown) => teardown,
            None => return,
        };
        let stream_id = teardown.info.stream_id.clone();
        info!("[{}] stopping", stream_id);
        self.emit(StreamerEvent::StatusChanged(SessionStatus::Stopping));
        if let Some((_, reply)) = self.pending_start.take() {
            let _ = reply.send(Err(StreamError::StartAborted));
        }

        let viewers = self.pool.drain();
        if !viewers.is_empty() {
            debug!("[{}] closing {} viewer(s)", stream_id, viewers.len());
        }
        join_all(viewers.into_iter().map(destroy)).await;

        if let Some(media) = teardown.media {
            media.stop();
        }

        if teardown.announced {
            let end = EndStream {
                stream_id: stream_id.clone(),
                stream_key: teardown.info.stream_key.clone(),
            };
            if let Err(e) = self.publish(END_STREAM, &end) {
                warn!("[{}] end not delivered to relay: {}", stream_id, e);
            }
            if let Some(registry) = &self.parts.registry {
                let ended = tokio::time::timeout(
                    self.parts.end_timeout,
                    registry.end_stream(&teardown.info.stream_key),
                )
                .await;
                match ended {
                    Ok(Ok(())) => debug!("[{}] backend record ended", stream_id),
                    Ok(Err(e)) => warn!("[{}] backend end failed: {}", stream_id, e),
                    Err(_) => warn!(
                        "[{}] backend end timed out after {:?}",
                        stream_id, self.parts.end_timeout
                    ),
                }
            }
        }

        self.set_viewer_count(0);
        self.session.finish();
        self.emit(StreamerEvent::StatusChanged(SessionStatus::Ended));
        if teardown.was_live {
            self.emit(StreamerEvent::StreamEnd {
                stream_id: stream_id.clone(),
            });
        }
        self.session.reset();
        self.emit(StreamerEvent::StatusChanged(SessionStatus::Idle));
        info!("[{}] stopped", stream_id);
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            status: self.session.status(),
            stream_id: self.stream_id(),
            preview: self.session.media().is_some(),
            viewer_count: self.viewer_count,
            viewers: self.pool.viewers(),
        }
    }

    fn stream_id(&self) -> Option<String> {
        self.session.info().map(|info| info.stream_id.clone())
    }

    fn set_viewer_count(&mut self, count: u64) {
        if count == self.viewer_count {
            return;
        }
        self.viewer_count = count;
        metrics::VIEWERS.set(count as i64);
        self.emit(StreamerEvent::ViewerCountChange(count));
    }

    fn publish<T: Serialize>(&self, event: &str, payload: &T) -> Result<(), StreamError> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| StreamError::ConnectionError(e.to_string()))?;
        self.parts.signaling.publish(event, payload)
    }

    fn emit(&self, event: StreamerEvent) {
        trace!("[coordinator] emit {:?}", event);
        let _ = self.events.send(event);
    }
}

fn start_message(info: &StreamInfo) -> StartStream {
    StartStream {
        stream_id: info.stream_id.clone(),
        stream_key: info.stream_key.clone(),
        title: info.title.clone(),
        description: info.description.clone(),
    }
}

async fn prepare_peer(
    peers: &dyn PeerFactory,
    viewer_id: &str,
    media: &SharedMedia,
    events: PeerEventSink,
) -> anyhow::Result<(Arc<dyn ViewerPeer>, SignalData)> {
    let peer = peers.create(viewer_id, media, events).await?;
    match peer.offer().await {
        Ok(offer) => Ok((peer, offer)),
        Err(e) => {
            peer.destroy().await;
            Err(e)
        }
    }
}

async fn destroy(conn: ViewerConnection) {
    if let Some(peer) = conn.peer {
        peer.destroy().await;
    }
}

/// Gives the input back when the coordinator is gone.
fn post(inbox: &WeakUnboundedSender<Input>, input: Input) -> Option<Input> {
    match inbox.upgrade() {
        Some(inbox) => inbox.send(input).err().map(|e| e.0),
        None => Some(input),
    }
}
