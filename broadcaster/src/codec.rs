use std::fmt;

use serde::{Deserialize, Serialize};
use webrtc::api::media_engine::*;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::RTCPFeedback;

/// Codec of the RTP the capture command sends us.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Vp8,
    Vp9,
    H264,
    Opus,
    G722,
    Pcmu,
    Pcma,
}

impl Codec {
    pub fn kind(&self) -> RTPCodecType {
        match self {
            Codec::Vp8 | Codec::Vp9 | Codec::H264 => RTPCodecType::Video,
            Codec::Opus | Codec::G722 | Codec::Pcmu | Codec::Pcma => RTPCodecType::Audio,
        }
    }

    pub fn capability(&self) -> RTCRtpCodecCapability {
        let video_rtcp_feedback = vec![
            RTCPFeedback {
                typ: "goog-remb".to_owned(),
                parameter: "".to_owned(),
            },
            RTCPFeedback {
                typ: "ccm".to_owned(),
                parameter: "fir".to_owned(),
            },
            RTCPFeedback {
                typ: "nack".to_owned(),
                parameter: "".to_owned(),
            },
            RTCPFeedback {
                typ: "nack".to_owned(),
                parameter: "pli".to_owned(),
            },
        ];
        let (mime_type, clock_rate, channels, fmtp) = match self {
            Codec::Vp8 => (MIME_TYPE_VP8, 90000, 0, ""),
            Codec::Vp9 => (MIME_TYPE_VP9, 90000, 0, "profile-id=0"),
            Codec::H264 => (
                MIME_TYPE_H264,
                90000,
                0,
                "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42001f",
            ),
            Codec::Opus => (MIME_TYPE_OPUS, 48000, 2, "minptime=10;useinbandfec=1"),
            Codec::G722 => (MIME_TYPE_G722, 8000, 0, ""),
            Codec::Pcmu => (MIME_TYPE_PCMU, 8000, 0, ""),
            Codec::Pcma => (MIME_TYPE_PCMA, 8000, 0, ""),
        };
        RTCRtpCodecCapability {
            mime_type: mime_type.to_owned(),
            clock_rate,
            channels,
            sdp_fmtp_line: fmtp.to_owned(),
            rtcp_feedback: match self.kind() {
                RTPCodecType::Video => video_rtcp_feedback,
                _ => vec![],
            },
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Codec::Vp8 => "vp8",
            Codec::Vp9 => "vp9",
            Codec::H264 => "h264",
            Codec::Opus => "opus",
            Codec::G722 => "g722",
            Codec::Pcmu => "pcmu",
            Codec::Pcma => "pcma",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_kind_and_capability() {
        assert_eq!(Codec::Vp8.kind(), RTPCodecType::Video);
        assert_eq!(Codec::Opus.kind(), RTPCodecType::Audio);

        let opus = Codec::Opus.capability();
        assert_eq!(opus.mime_type, MIME_TYPE_OPUS);
        assert_eq!(opus.clock_rate, 48000);
        assert_eq!(opus.channels, 2);
        assert!(opus.rtcp_feedback.is_empty());
        assert_eq!(Codec::H264.capability().rtcp_feedback.len(), 4);
    }
}
