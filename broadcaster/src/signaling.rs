use async_trait::async_trait;
use serde_json::Value;
use tracing::{trace, warn};

use crate::coordinator::RelaySink;
use crate::error::StreamError;
use crate::message::{RelayEvent, INBOUND};

/// Outbound half of the relay link.
pub trait Signaling: Send + Sync {
    fn publish(&self, event: &str, payload: Value) -> Result<(), StreamError>;
}

impl Signaling for socketio::Channel {
    fn publish(&self, event: &str, payload: Value) -> Result<(), StreamError> {
        socketio::Channel::publish(self, event, payload).map_err(StreamError::from)
    }
}

/// Backend bookkeeping of livestream records.
#[async_trait]
pub trait StreamRegistry: Send + Sync {
    async fn end_stream(&self, stream_key: &str) -> anyhow::Result<()>;
}

#[async_trait]
impl StreamRegistry for backend::Client {
    async fn end_stream(&self, stream_key: &str) -> anyhow::Result<()> {
        self.end_livestream(stream_key).await
    }
}

/// Routes relay traffic and link state from `channel` into the coordinator.
pub fn bind(channel: &socketio::Channel, sink: RelaySink) {
    for name in INBOUND {
        let sink = sink.clone();
        channel.subscribe(name, move |payload| {
            match RelayEvent::decode(name, payload) {
                Ok(Some(event)) => {
                    trace!("[relay] {}", name);
                    sink.deliver(event);
                }
                Ok(None) => {}
                Err(e) => warn!("[relay] malformed {}: {}", name, e),
            }
        });
    }
    let disconnected = sink.clone();
    channel.on_disconnect(move |reason| {
        disconnected.deliver(RelayEvent::Disconnected(reason.to_string()));
    });
    channel.on_reconnect(move |attempt| {
        sink.deliver(RelayEvent::Reconnected(attempt));
    });
}
