//! Events exchanged with the relay, payloads are camelCase JSON objects.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::peer::SignalData;

pub const START_STREAM: &str = "start-webrtc-stream";
pub const END_STREAM: &str = "end-webrtc-stream";
pub const OFFER: &str = "webrtc-offer";

pub const STREAM_STARTED: &str = "webrtc-stream-started";
pub const STREAM_START_ERROR: &str = "stream-start-error";
pub const VIEWER_JOINED: &str = "viewer-joined";
pub const VIEWER_LEFT: &str = "viewer-left";
pub const ANSWER: &str = "webrtc-answer";
pub const ICE_CANDIDATE: &str = "webrtc-ice-candidate";

pub const INBOUND: [&str; 6] = [
    STREAM_STARTED,
    STREAM_START_ERROR,
    VIEWER_JOINED,
    VIEWER_LEFT,
    ANSWER,
    ICE_CANDIDATE,
];

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartStream {
    pub stream_id: String,
    pub stream_key: String,
    pub title: String,
    pub description: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EndStream {
    pub stream_id: String,
    pub stream_key: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub stream_id: String,
    pub offer: SignalData,
    pub target_id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StartError {
    #[serde(default)]
    pub message: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ViewerChange {
    pub viewer_id: String,
    /// `None` when the relay sent no usable count.
    #[serde(
        default,
        deserialize_with = "lenient_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub viewer_count: Option<u64>,
}

fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Value::deserialize(deserializer)?.as_u64())
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub from_id: String,
    pub answer: SignalData,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub from_id: String,
    pub candidate: SignalData,
}

/// Everything the relay can tell the coordinator.
#[derive(Clone, Debug, PartialEq)]
pub enum RelayEvent {
    StreamStarted(Value),
    StartError(StartError),
    ViewerJoined(ViewerChange),
    ViewerLeft(ViewerChange),
    Answer(Answer),
    Candidate(Candidate),
    Disconnected(String),
    Reconnected(u32),
}

impl RelayEvent {
    /// `Ok(None)` for event names the coordinator does not handle.
    pub fn decode(name: &str, payload: Value) -> serde_json::Result<Option<Self>> {
        Ok(Some(match name {
            STREAM_STARTED => RelayEvent::StreamStarted(payload),
            STREAM_START_ERROR => RelayEvent::StartError(serde_json::from_value(payload)?),
            VIEWER_JOINED => RelayEvent::ViewerJoined(serde_json::from_value(payload)?),
            VIEWER_LEFT => RelayEvent::ViewerLeft(serde_json::from_value(payload)?),
            ANSWER => RelayEvent::Answer(serde_json::from_value(payload)?),
            ICE_CANDIDATE => RelayEvent::Candidate(serde_json::from_value(payload)?),
            _ => return Ok(None),
        }))
    }
}
