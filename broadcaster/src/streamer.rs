use std::sync::Arc;
use std::time::Duration;

use backend::AuthContext;
use serde_json::json;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info};

use crate::capture::{RtpCapture, SharedMedia};
use crate::config::Config;
use crate::coordinator::{Coordinator, Input, Parts, RelaySink, Snapshot};
use crate::error::{Result, StreamError};
use crate::event::StreamerEvent;
use crate::peer::RtcPeerFactory;
use crate::session::StreamInfo;
use crate::signaling;

const EVENT_CAPACITY: usize = 64;

/// Handle to a running broadcast coordinator. Clones share the same session,
/// the coordinator stops and releases everything once the last clone drops.
#[derive(Clone)]
pub struct Streamer {
    inbox: UnboundedSender<Input>,
    events: broadcast::Sender<StreamerEvent>,
    channel: Option<socketio::Channel>,
}

impl Streamer {
    /// Spawns a coordinator around `parts`. Relay traffic is fed in through
    /// [`Streamer::relay_sink`].
    pub fn with_parts(parts: Parts) -> Self {
        let (inbox, rx) = unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let coordinator = Coordinator::new(parts, inbox.downgrade(), events.clone());
        tokio::spawn(coordinator.run(rx));
        Self {
            inbox,
            events,
            channel: None,
        }
    }

    /// Opens the relay channel with the token of `auth` and wires a webrtc
    /// based coordinator to it.
    pub async fn connect(config: &Config, auth: AuthContext) -> Result<Self> {
        let streamer = Self::new(config, auth)?;
        streamer.open().await?;
        Ok(streamer)
    }

    /// Wires a webrtc based coordinator to a relay channel that is not yet
    /// connected, so events can be subscribed before [`Streamer::open`].
    pub fn new(config: &Config, auth: AuthContext) -> Result<Self> {
        let mut options = config.relay.options.clone();
        if let Some(token) = auth.token() {
            options.auth = Some(json!({ "token": token }));
        }
        let channel = socketio::Channel::new(&config.relay.url, options)
            .map_err(|e| StreamError::InvalidConfig(e.to_string()))?;
        let registry = backend::Client::new(&config.backend.url, auth)
            .map_err(|e| StreamError::InvalidConfig(e.to_string()))?;
        let ice_servers = config
            .ice_servers
            .iter()
            .cloned()
            .map(Into::into)
            .collect();

        let mut streamer = Self::with_parts(Parts {
            signaling: Arc::new(channel.clone()),
            capture: Arc::new(RtpCapture::new(config.capture.clone())),
            peers: Arc::new(RtcPeerFactory::new(ice_servers)),
            registry: Some(Arc::new(registry)),
            constraints: config.capture.constraints.clone(),
            end_timeout: Duration::from_millis(config.end_timeout_ms),
        });
        signaling::bind(&channel, streamer.relay_sink());
        streamer.channel = Some(channel);
        Ok(streamer)
    }

    /// Connects the relay channel. A failure is returned and also emitted as
    /// [`StreamerEvent::Error`].
    pub async fn open(&self) -> Result<()> {
        let Some(channel) = &self.channel else {
            return Err(StreamError::InvalidConfig("no relay channel".to_string()));
        };
        info!("[relay] connecting to {}", channel.url());
        if let Err(e) = channel.connect().await {
            let e = StreamError::from(e);
            error!("[relay] connect failed: {}", e);
            let _ = self.events.send(StreamerEvent::Error(e.clone()));
            return Err(e);
        }
        info!(
            "[relay] connected, socket id: {}",
            channel.id().unwrap_or_default()
        );
        Ok(())
    }

    /// Captures media and announces the stream to the relay. Resolves with the
    /// local media once the relay was told, the stream goes live on its ack.
    pub async fn start_stream(
        &self,
        stream_id: &str,
        stream_key: &str,
        title: &str,
        description: &str,
    ) -> Result<SharedMedia> {
        let info = StreamInfo {
            stream_id: stream_id.to_string(),
            stream_key: stream_key.to_string(),
            title: title.to_string(),
            description: description.to_string(),
        };
        let (reply, rx) = oneshot::channel();
        self.send(Input::Start { info, reply })?;
        rx.await.map_err(|_| StreamError::Closed)?
    }

    /// Ends the active stream, a no-op when idle. Resolves after teardown.
    pub async fn stop_stream(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Input::Stop { reply })?;
        rx.await.map_err(|_| StreamError::Closed)
    }

    pub async fn snapshot(&self) -> Result<Snapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Input::Snapshot { reply })?;
        rx.await.map_err(|_| StreamError::Closed)
    }

    pub async fn viewer_count(&self) -> u64 {
        self.snapshot()
            .await
            .map(|snapshot| snapshot.viewer_count)
            .unwrap_or(0)
    }

    pub fn subscribe_event(&self) -> broadcast::Receiver<StreamerEvent> {
        self.events.subscribe()
    }

    pub fn relay_sink(&self) -> RelaySink {
        RelaySink::new(self.inbox.downgrade())
    }

    pub fn channel(&self) -> Option<&socketio::Channel> {
        self.channel.as_ref()
    }

    /// Stops any stream, then closes the relay channel.
    pub async fn disconnect(&self) {
        if let Err(e) = self.stop_stream().await {
            debug!("[streamer] stop before disconnect: {}", e);
        }
        if let Some(channel) = &self.channel {
            channel.disconnect().await;
        }
    }

    fn send(&self, input: Input) -> Result<()> {
        self.inbox.send(input).map_err(|_| StreamError::Closed)
    }
}
