use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capture::SharedMedia;
use crate::error::StreamError;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Starting,
    Live,
    Stopping,
    Ended,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Starting => "starting",
            SessionStatus::Live => "live",
            SessionStatus::Stopping => "stopping",
            SessionStatus::Ended => "ended",
        };
        write!(f, "{}", status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub stream_id: String,
    pub stream_key: String,
    pub title: String,
    pub description: String,
}

/// What a stop has to release.
pub struct Teardown {
    pub info: StreamInfo,
    pub media: Option<SharedMedia>,
    pub was_live: bool,
    /// The relay was told about the stream and must be told it ended.
    pub announced: bool,
}

/// Lifecycle of the single broadcast this instance may run.
///
/// Every `begin` opens a new generation, media acquired for an older
/// generation is stale and must be released by the caller.
#[derive(Default)]
pub struct Session {
    status: SessionStatus,
    info: Option<StreamInfo>,
    media: Option<SharedMedia>,
    generation: u64,
    announced: bool,
    // A live stream was announced again on a new socket, no reply yet.
    reannounced: bool,
}

impl Session {
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn info(&self) -> Option<&StreamInfo> {
        self.info.as_ref()
    }

    pub fn media(&self) -> Option<&SharedMedia> {
        self.media.as_ref()
    }

    pub fn is_live(&self) -> bool {
        self.status == SessionStatus::Live
    }

    pub fn begin(&mut self, info: StreamInfo) -> Result<u64, StreamError> {
        if self.status != SessionStatus::Idle {
            return Err(StreamError::SessionAlreadyActive);
        }
        self.generation += 1;
        self.status = SessionStatus::Starting;
        self.info = Some(info);
        self.media = None;
        self.announced = false;
        Ok(self.generation)
    }

    /// `None` when the media belongs to a start that was already abandoned.
    pub fn media_acquired(&mut self, generation: u64, media: SharedMedia) -> Option<StreamInfo> {
        if generation != self.generation
            || self.status != SessionStatus::Starting
            || self.media.is_some()
        {
            return None;
        }
        self.media = Some(media);
        self.info.clone()
    }

    /// Rolls a failed capture back to `Idle`.
    pub fn media_failed(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.status != SessionStatus::Starting {
            return false;
        }
        self.reset();
        true
    }

    pub fn mark_announced(&mut self) {
        self.announced = true;
    }

    pub fn announced(&self) -> bool {
        self.announced
    }

    /// A live stream was announced again after a reconnect.
    pub fn mark_reannounced(&mut self) {
        if self.status == SessionStatus::Live {
            self.reannounced = true;
        }
    }

    /// The relay refused a re-announce, the live stream has to stop.
    pub fn reannounce_rejected(&mut self) -> bool {
        let rejected = self.reannounced && self.status == SessionStatus::Live;
        self.reannounced = false;
        rejected
    }

    /// Relay acknowledged the start. Acks for another stream id are ignored.
    pub fn started(&mut self, stream_id: Option<&str>) -> bool {
        if self.status == SessionStatus::Live {
            self.reannounced = false;
        }
        if self.status != SessionStatus::Starting || !self.announced {
            return false;
        }
        match (stream_id, self.info.as_ref()) {
            (Some(id), Some(info)) if id != info.stream_id => false,
            _ => {
                self.status = SessionStatus::Live;
                true
            }
        }
    }

    /// Relay refused the start, returns the media to release.
    pub fn start_rejected(&mut self) -> Option<Option<SharedMedia>> {
        if self.status != SessionStatus::Starting || !self.announced {
            return None;
        }
        let media = self.media.take();
        self.reset();
        Some(media)
    }

    pub fn begin_stop(&mut self) -> Option<Teardown> {
        if !matches!(
            self.status,
            SessionStatus::Starting | SessionStatus::Live
        ) {
            return None;
        }
        let info = self.info.take()?;
        let was_live = self.status == SessionStatus::Live;
        self.status = SessionStatus::Stopping;
        Some(Teardown {
            info,
            media: self.media.take(),
            was_live,
            announced: self.announced,
        })
    }

    pub fn finish(&mut self) {
        if self.status == SessionStatus::Stopping {
            self.status = SessionStatus::Ended;
        }
    }

    pub fn reset(&mut self) {
        self.status = SessionStatus::Idle;
        self.info = None;
        self.media = None;
        self.announced = false;
        self.reannounced = false;
    }
}
