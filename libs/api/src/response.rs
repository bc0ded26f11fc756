use std::fmt;

use serde::{Deserialize, Serialize};

/// Envelope wrapped around every backend reply.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

/// Body of a non-2xx reply, only `message` is used.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Livestream {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: LivestreamStatus,
    pub stream_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_viewers: Option<u64>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub is_webrtc: bool,
    #[serde(default)]
    pub is_active_webrtc: bool,
}

impl Livestream {
    /// A record that currently has a broadcaster attached.
    pub fn is_streaming(&self) -> bool {
        self.status == LivestreamStatus::Live && self.is_active_webrtc
    }
}

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LivestreamStatus {
    #[default]
    Scheduled,
    Live,
    Ended,
    Cancelled,
}

impl fmt::Display for LivestreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LivestreamStatus::Scheduled => write!(f, "scheduled"),
            LivestreamStatus::Live => write!(f, "live"),
            LivestreamStatus::Ended => write!(f, "ended"),
            LivestreamStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The overview payload is not fixed by the backend, keep it as JSON.
pub type LivestreamStats = serde_json::Value;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_livestream_list() {
        let body = r#"{
            "success": true,
            "data": [{
                "id": "9b2c",
                "title": "Spring drop",
                "status": "live",
                "stream_key": "sk_123",
                "current_viewers": 4,
                "created_at": "2025-01-01T10:00:00Z",
                "updated_at": "2025-01-01T10:05:00Z",
                "is_webrtc": true,
                "is_active_webrtc": true
            }]
        }"#;
        let res: ApiResponse<Vec<Livestream>> = serde_json::from_str(body).unwrap();
        assert!(res.success);
        let streams = res.data.unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].status, LivestreamStatus::Live);
        assert_eq!(streams[0].description, None);
        assert!(streams[0].is_streaming());
    }

    #[test]
    fn test_decode_failure_envelope() {
        let res: ApiResponse<Livestream> =
            serde_json::from_str(r#"{"success":false,"message":"Stream not found"}"#).unwrap();
        assert!(!res.success);
        assert!(res.data.is_none());
        assert_eq!(res.message.as_deref(), Some("Stream not found"));
    }
}
