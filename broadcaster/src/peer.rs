use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::capture::SharedMedia;

/// Signal payloads in the shapes simple-peer puts on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalData {
    /// `{ "type": "offer" | "answer", "sdp": "..." }`
    Sdp(SessionDescription),
    /// `{ "type": "candidate", "candidate": { ... } }`
    Candidate(CandidateSignal),
    /// A bare `RTCIceCandidateInit`
    Ice(IceCandidate),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSignal {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub candidate: IceCandidate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl SignalData {
    pub fn offer(sdp: impl Into<String>) -> Self {
        SignalData::Sdp(SessionDescription {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        })
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        SignalData::Sdp(SessionDescription {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        })
    }

    pub fn candidate(&self) -> Option<&IceCandidate> {
        match self {
            SignalData::Sdp(_) => None,
            SignalData::Candidate(signal) => Some(&signal.candidate),
            SignalData::Ice(candidate) => Some(candidate),
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(val: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: val.candidate,
            sdp_mid: val.sdp_mid,
            sdp_mline_index: val.sdp_mline_index,
            username_fragment: val.username_fragment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Connect,
    Close,
    Error(String),
}

pub type PeerEventSink = Arc<dyn Fn(PeerEvent) + Send + Sync>;

#[async_trait]
pub trait PeerFactory: Send + Sync {
    /// Creates an initiator peer sending `media`. Connection state changes are
    /// reported through `events` until the peer is destroyed.
    async fn create(
        &self,
        viewer_id: &str,
        media: &SharedMedia,
        events: PeerEventSink,
    ) -> Result<Arc<dyn ViewerPeer>>;
}

#[async_trait]
pub trait ViewerPeer: Send + Sync {
    /// Full offer with ICE gathering complete, nothing trickles afterwards.
    async fn offer(&self) -> Result<SignalData>;

    async fn signal(&self, data: SignalData) -> Result<()>;

    /// Closes the connection without raising further events, idempotent.
    async fn destroy(&self);
}

pub struct RtcPeerFactory {
    ice_servers: Vec<RTCIceServer>,
}

impl RtcPeerFactory {
    pub fn new(ice_servers: Vec<RTCIceServer>) -> Self {
        Self { ice_servers }
    }

    async fn new_peer(&self) -> Result<Arc<RTCPeerConnection>> {
        let mut m = MediaEngine::default();
        m.register_default_codecs()?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut m)?;
        let api = APIBuilder::new()
            .with_media_engine(m)
            .with_interceptor_registry(registry)
            .build();
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        Ok(Arc::new(api.new_peer_connection(config).await?))
    }
}

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    async fn create(
        &self,
        viewer_id: &str,
        media: &SharedMedia,
        events: PeerEventSink,
    ) -> Result<Arc<dyn ViewerPeer>> {
        let peer = self.new_peer().await?;
        for track in media.tracks() {
            let sender = peer.add_track(track).await?;
            // drain RTCP so the interceptors keep running
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while sender.read(&mut buf).await.is_ok() {}
            });
        }

        let destroyed = Arc::new(AtomicBool::new(false));
        let id = viewer_id.to_string();
        let closed = destroyed.clone();
        peer.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            if !closed.load(Ordering::SeqCst) {
                info!("[viewer] [{}] connection state changed: {}", id, s);
                match s {
                    RTCPeerConnectionState::Connected => events(PeerEvent::Connect),
                    RTCPeerConnectionState::Failed => {
                        events(PeerEvent::Error("ice connection failed".to_string()))
                    }
                    RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Closed => {
                        events(PeerEvent::Close)
                    }
                    _ => {}
                }
            }
            Box::pin(async {})
        }));

        Ok(Arc::new(RtcPeer {
            viewer_id: viewer_id.to_string(),
            peer,
            destroyed,
        }))
    }
}

pub struct RtcPeer {
    viewer_id: String,
    peer: Arc<RTCPeerConnection>,
    destroyed: Arc<AtomicBool>,
}

#[async_trait]
impl ViewerPeer for RtcPeer {
    async fn offer(&self) -> Result<SignalData> {
        let offer = self.peer.create_offer(None).await?;
        let mut gather_complete = self.peer.gathering_complete_promise().await;
        self.peer.set_local_description(offer).await?;
        let _ = gather_complete.recv().await;
        let description = self
            .peer
            .local_description()
            .await
            .ok_or_else(|| anyhow!("local description missing"))?;
        Ok(SignalData::offer(description.sdp))
    }

    async fn signal(&self, data: SignalData) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(anyhow!("peer destroyed"));
        }
        match data {
            SignalData::Sdp(description) => match description.kind {
                SdpKind::Answer => {
                    self.peer
                        .set_remote_description(RTCSessionDescription::answer(description.sdp)?)
                        .await?
                }
                kind => return Err(anyhow!("unexpected {:?} from viewer", kind)),
            },
            SignalData::Candidate(CandidateSignal { candidate, .. }) | SignalData::Ice(candidate) => {
                // end-of-candidates
                if candidate.candidate.is_empty() {
                    return Ok(());
                }
                debug!("[viewer] [{}] remote candidate: {}", self.viewer_id, candidate.candidate);
                self.peer.add_ice_candidate(candidate.into()).await?
            }
        }
        Ok(())
    }

    async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.peer.close().await {
            warn!("[viewer] [{}] close error: {}", self.viewer_id, e);
        }
    }
}
