use serde_json::Value;

use crate::error::StreamError;
use crate::session::SessionStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamerEvent {
    StatusChanged(SessionStatus),
    /// Local media is captured but viewers cannot join yet.
    PreviewReady { stream_id: String },
    StreamStart { stream_id: String, data: Value },
    StreamEnd { stream_id: String },
    ViewerCountChange(u64),
    ViewerConnected { viewer_id: String },
    Reconnected(u32),
    Error(StreamError),
}
