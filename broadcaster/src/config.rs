use std::env;

use serde::{Deserialize, Serialize};
use webrtc::ice;
use webrtc::ice_transport::ice_server::RTCIceServer;

use crate::capture::MediaConstraints;
use crate::codec::Codec;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub relay: Relay,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default)]
    pub capture: Capture,
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServer>,
    #[serde(default)]
    pub log: Log,
    /// Bound on the backend "end livestream" call made while stopping.
    #[serde(default = "default_end_timeout_ms")]
    pub end_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Relay {
    #[serde(default = "default_relay_url")]
    pub url: String,
    #[serde(flatten)]
    pub options: socketio::Options,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Backend {
    #[serde(default = "default_backend_url")]
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Capture {
    #[serde(default = "default_capture_listen")]
    pub listen: String,
    /// 0 picks a free port
    #[serde(default)]
    pub video_port: u16,
    #[serde(default)]
    pub audio_port: u16,
    #[serde(default = "default_video_codec")]
    pub video_codec: Codec,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: Codec,
    /// e.g. `ffmpeg -re -f lavfi -i testsrc=size={width}x{height}:rate={frame_rate} -vcodec libvpx -f rtp rtp://127.0.0.1:{video_port}`
    #[serde(default)]
    pub command: Option<String>,
    /// Wait for the first video packet before the stream counts as captured, 0 disables.
    #[serde(default)]
    pub startup_timeout_ms: u64,
    #[serde(default)]
    pub constraints: MediaConstraints,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IceServer {
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_relay_url() -> String {
    env::var("LIVESHOP_RELAY_URL").unwrap_or_else(|_| "http://localhost:5000".to_string())
}

fn default_backend_url() -> String {
    env::var("LIVESHOP_API_URL").unwrap_or_else(|_| backend::DEFAULT_URL.to_string())
}

fn default_capture_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_video_codec() -> Codec {
    Codec::Vp8
}

fn default_audio_codec() -> Codec {
    Codec::Opus
}

fn default_end_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    env::var("LOG_LEVEL").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug".to_string()
        } else {
            "info".to_string()
        }
    })
}

pub fn default_ice_servers() -> Vec<IceServer> {
    vec![IceServer {
        urls: vec!["stun:stun.l.google.com:19302".to_string()],
        username: "".to_string(),
        credential: "".to_string(),
    }]
}

impl Default for Relay {
    fn default() -> Self {
        Self {
            url: default_relay_url(),
            options: Default::default(),
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            token: None,
        }
    }
}

impl Default for Capture {
    fn default() -> Self {
        Self {
            listen: default_capture_listen(),
            video_port: 0,
            audio_port: 0,
            video_codec: default_video_codec(),
            audio_codec: default_audio_codec(),
            command: None,
            startup_timeout_ms: 0,
            constraints: Default::default(),
        }
    }
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl IceServer {
    /// TURN urls need credentials, everything must parse as an ICE url.
    pub fn validate(&self) -> webrtc::error::Result<()> {
        for url in &self.urls {
            let url = ice::url::Url::parse_url(url)?;
            if (url.scheme == ice::url::SchemeType::Turn
                || url.scheme == ice::url::SchemeType::Turns)
                && (self.username.is_empty() || self.credential.is_empty())
            {
                return Err(webrtc::Error::ErrNoTurnCredentials);
            }
        }
        Ok(())
    }
}

impl From<IceServer> for RTCIceServer {
    fn from(val: IceServer) -> Self {
        RTCIceServer {
            urls: val.urls,
            username: val.username,
            credential: val.credential,
        }
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        url::Url::parse(&self.relay.url)
            .map_err(|e| anyhow::anyhow!("relay url error : {}", e))?;
        self.relay
            .options
            .validate()
            .map_err(|e| anyhow::anyhow!("relay error : {}", e))?;
        url::Url::parse(&self.backend.url)
            .map_err(|e| anyhow::anyhow!("backend url error : {}", e))?;
        for ice_server in self.ice_servers.iter() {
            ice_server
                .validate()
                .map_err(|e| anyhow::anyhow!(format!("ice_server error : {}", e)))?;
        }
        self.capture.validate()?;
        Ok(())
    }
}

impl Capture {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.video_codec.kind() != webrtc::rtp_transceiver::rtp_codec::RTPCodecType::Video {
            return Err(anyhow::anyhow!(
                "capture error : {} is not a video codec",
                self.video_codec
            ));
        }
        if self.audio_codec.kind() != webrtc::rtp_transceiver::rtp_codec::RTPCodecType::Audio {
            return Err(anyhow::anyhow!(
                "capture error : {} is not an audio codec",
                self.audio_codec
            ));
        }
        if let Some(command) = &self.command {
            let args = shellwords::split(command)
                .map_err(|e| anyhow::anyhow!("capture command error : {}", e))?;
            if args.is_empty() {
                return Err(anyhow::anyhow!("capture command error : empty command"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.relay.options.reconnection_attempts, 10);
        assert_eq!(cfg.relay.options.connect_timeout_ms, 15000);
        assert_eq!(cfg.capture.video_codec, Codec::Vp8);
        assert_eq!(cfg.capture.constraints.video.ideal_width, 1280);
        assert_eq!(cfg.end_timeout_ms, 5000);
        assert_eq!(cfg.ice_servers.len(), 1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_parse_full() {
        let cfg: Config = toml::from_str(
            r#"
            end_timeout_ms = 1000

            [relay]
            url = "https://relay.example.com"
            transports = ["polling"]
            reconnection_attempts = 3

            [backend]
            url = "https://api.example.com/api"
            token = "secret"

            [capture]
            video_codec = "h264"
            command = "ffmpeg -i input.mp4 -f rtp rtp://127.0.0.1:{video_port}"

            [capture.constraints]
            audio = false

            [[ice_servers]]
            urls = ["turn:turn.example.com:3478"]
            username = "user"
            credential = "pass"
            "#,
        )
        .unwrap();
        assert_eq!(
            cfg.relay.options.transports,
            vec![socketio::TransportKind::Polling]
        );
        assert_eq!(cfg.relay.options.reconnection_attempts, 3);
        assert_eq!(cfg.backend.token.as_deref(), Some("secret"));
        assert_eq!(cfg.capture.video_codec, Codec::H264);
        assert!(!cfg.capture.constraints.audio);
        assert_eq!(cfg.end_timeout_ms, 1000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_errors() {
        let mut cfg = Config::default();
        cfg.ice_servers = vec![IceServer {
            urls: vec!["turn:turn.example.com:3478".to_string()],
            username: "".to_string(),
            credential: "".to_string(),
        }];
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.capture.video_codec = Codec::Opus;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.relay.url = "not a url".to_string();
        assert!(cfg.validate().is_err());
    }
}
