use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use webrtc::rtp;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::util::Unmarshal;

use crate::config::Capture;
use crate::error::StreamError;

pub type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

/// Locally captured media. The session owns it, viewer peers only borrow the
/// tracks and never stop them.
pub trait MediaStream: Send + Sync {
    fn tracks(&self) -> Vec<LocalTrack>;

    /// Releases the capture, calling it again is a no-op.
    fn stop(&self);

    fn is_stopped(&self) -> bool;
}

pub type SharedMedia = Arc<dyn MediaStream>;

#[async_trait]
pub trait MediaCapture: Send + Sync {
    async fn acquire(&self, constraints: &MediaConstraints)
        -> std::result::Result<SharedMedia, StreamError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    #[serde(default)]
    pub video: VideoConstraints,
    #[serde(default = "default_audio")]
    pub audio: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    #[serde(default = "default_ideal_width")]
    pub ideal_width: u32,
    #[serde(default = "default_ideal_height")]
    pub ideal_height: u32,
    /// Informational, passed on to the capture command.
    #[serde(default = "default_ideal_frame_rate")]
    pub ideal_frame_rate: u32,
}

fn default_audio() -> bool {
    true
}

fn default_ideal_width() -> u32 {
    1280
}

fn default_ideal_height() -> u32 {
    720
}

fn default_ideal_frame_rate() -> u32 {
    30
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            video: Default::default(),
            audio: default_audio(),
        }
    }
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            ideal_width: default_ideal_width(),
            ideal_height: default_ideal_height(),
            ideal_frame_rate: default_ideal_frame_rate(),
        }
    }
}

/// Takes media in as RTP over UDP, optionally produced by a child process
/// such as ffmpeg or gstreamer.
pub struct RtpCapture {
    config: Capture,
}

impl RtpCapture {
    pub fn new(config: Capture) -> Self {
        Self { config }
    }

    async fn open(&self, constraints: &MediaConstraints) -> Result<RtpStream> {
        let stream = RtpStream::default();
        let (first_tx, first_rx) = oneshot::channel();

        let video_socket =
            UdpSocket::bind(format!("{}:{}", self.config.listen, self.config.video_port)).await?;
        let video_port = video_socket.local_addr()?.port();
        let video_track = Arc::new(TrackLocalStaticRTP::new(
            self.config.video_codec.capability(),
            "video".to_owned(),
            "liveshop".to_owned(),
        ));
        info!("[capture] video RTP listener started on {}", video_socket.local_addr()?);
        stream.push_track(video_track.clone());
        stream.push_task(tokio::spawn(rtp_forward(
            video_socket,
            video_track,
            Some(first_tx),
        )));

        let mut audio_port = 0;
        if constraints.audio {
            let audio_socket =
                UdpSocket::bind(format!("{}:{}", self.config.listen, self.config.audio_port))
                    .await?;
            audio_port = audio_socket.local_addr()?.port();
            let audio_track = Arc::new(TrackLocalStaticRTP::new(
                self.config.audio_codec.capability(),
                "audio".to_owned(),
                "liveshop".to_owned(),
            ));
            info!("[capture] audio RTP listener started on {}", audio_socket.local_addr()?);
            stream.push_track(audio_track.clone());
            stream.push_task(tokio::spawn(rtp_forward(audio_socket, audio_track, None)));
        }

        let mut child = match &self.config.command {
            Some(template) => {
                let command = render_command(template, constraints, video_port, audio_port);
                debug!("[capture] spawn: {}", command);
                let mut args = shellwords::split(&command)?;
                if args.is_empty() {
                    return Err(anyhow!("empty capture command"));
                }
                Some(
                    Command::new(args.remove(0))
                        .args(args)
                        .stdin(Stdio::null())
                        .stdout(Stdio::inherit())
                        .kill_on_drop(true)
                        .spawn()?,
                )
            }
            None => None,
        };

        if self.config.startup_timeout_ms > 0 {
            let timeout = Duration::from_millis(self.config.startup_timeout_ms);
            let exited = async {
                match child.as_mut() {
                    Some(child) => child.wait().await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = first_rx => debug!("[capture] first video packet received"),
                status = exited => {
                    stream.stop();
                    return Err(anyhow!("capture command exited early: {:?}", status));
                }
                _ = tokio::time::sleep(timeout) => {
                    stream.stop();
                    return Err(anyhow!("no video received within {:?}", timeout));
                }
            }
        }

        if let Some(child) = child.take() {
            stream.set_child(child);
        }
        Ok(stream)
    }
}

#[async_trait]
impl MediaCapture for RtpCapture {
    async fn acquire(
        &self,
        constraints: &MediaConstraints,
    ) -> std::result::Result<SharedMedia, StreamError> {
        match self.open(constraints).await {
            Ok(stream) => Ok(Arc::new(stream)),
            Err(e) => Err(capture_error(e)),
        }
    }
}

/// Permission problems become `MediaAcquisitionDenied`, the rest
/// `MediaAcquisitionError`.
pub(crate) fn capture_error(err: anyhow::Error) -> StreamError {
    let denied = err.chain().any(|cause| {
        cause
            .downcast_ref::<io::Error>()
            .map(|e| e.kind() == io::ErrorKind::PermissionDenied)
            .unwrap_or(false)
    });
    if denied {
        StreamError::MediaAcquisitionDenied(err.to_string())
    } else {
        StreamError::MediaAcquisitionError(err.to_string())
    }
}

pub(crate) fn render_command(
    template: &str,
    constraints: &MediaConstraints,
    video_port: u16,
    audio_port: u16,
) -> String {
    template
        .replace("{video_port}", &video_port.to_string())
        .replace("{audio_port}", &audio_port.to_string())
        .replace("{width}", &constraints.video.ideal_width.to_string())
        .replace("{height}", &constraints.video.ideal_height.to_string())
        .replace("{frame_rate}", &constraints.video.ideal_frame_rate.to_string())
}

async fn rtp_forward(
    socket: UdpSocket,
    track: Arc<TrackLocalStaticRTP>,
    mut first: Option<oneshot::Sender<()>>,
) {
    let mut buf = vec![0u8; 1600];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, addr)) => {
                trace!("[capture] {} bytes from {}", n, addr);
                match rtp::packet::Packet::unmarshal(&mut &buf[..n]) {
                    Ok(packet) => {
                        if let Some(first) = first.take() {
                            let _ = first.send(());
                        }
                        if let Err(e) = track.write_rtp(&packet).await {
                            warn!("[capture] [{}] write rtp error: {}", track.id(), e);
                        }
                    }
                    Err(e) => debug!("[capture] drop non RTP datagram: {}", e),
                }
            }
            Err(e) => {
                error!("[capture] RTP receive error: {}", e);
                break;
            }
        }
    }
}

#[derive(Default)]
pub struct RtpStream {
    tracks: Mutex<Vec<LocalTrack>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    child: Mutex<Option<Child>>,
    stopped: AtomicBool,
}

impl RtpStream {
    fn push_track(&self, track: LocalTrack) {
        if let Ok(mut tracks) = self.tracks.lock() {
            tracks.push(track);
        }
    }

    fn push_task(&self, task: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(task);
        }
    }

    fn set_child(&self, child: Child) {
        if let Ok(mut slot) = self.child.lock() {
            slot.replace(child);
        }
    }
}

impl MediaStream for RtpStream {
    fn tracks(&self) -> Vec<LocalTrack> {
        self.tracks
            .lock()
            .map(|tracks| tracks.clone())
            .unwrap_or_default()
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        if let Ok(mut child) = self.child.lock() {
            if let Some(mut child) = child.take() {
                if let Err(e) = child.start_kill() {
                    warn!("[capture] kill capture command error: {}", e);
                }
            }
        }
        info!("[capture] stopped");
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for RtpStream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_command() {
        let constraints = MediaConstraints::default();
        assert_eq!(
            render_command(
                "ffmpeg -f lavfi -i testsrc=size={width}x{height}:rate={frame_rate} -f rtp rtp://127.0.0.1:{video_port} {audio_port}",
                &constraints,
                5004,
                5006
            ),
            "ffmpeg -f lavfi -i testsrc=size=1280x720:rate=30 -f rtp rtp://127.0.0.1:5004 5006"
        );
    }

    #[test]
    fn test_capture_error_mapping() {
        let denied = anyhow::Error::new(io::Error::new(io::ErrorKind::PermissionDenied, "camera"));
        assert!(matches!(
            capture_error(denied),
            StreamError::MediaAcquisitionDenied(_)
        ));
        let other = anyhow::Error::new(io::Error::new(io::ErrorKind::AddrInUse, "port"));
        assert!(matches!(
            capture_error(other),
            StreamError::MediaAcquisitionError(_)
        ));
    }

    #[tokio::test]
    async fn test_rtp_capture_without_command() {
        let capture = RtpCapture::new(Capture::default());
        let media = capture
            .acquire(&MediaConstraints {
                audio: false,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(media.tracks().len(), 1);
        assert!(!media.is_stopped());
        media.stop();
        media.stop();
        assert!(media.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rtp_capture_startup_timeout() {
        let capture = RtpCapture::new(Capture {
            startup_timeout_ms: 200,
            ..Default::default()
        });
        let err = capture
            .acquire(&MediaConstraints::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StreamError::MediaAcquisitionError(_)));
    }
}
