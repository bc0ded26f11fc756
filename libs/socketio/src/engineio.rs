//! Engine.IO v4 text packet codec.
//!
//! Reference: https://github.com/socketio/engine.io-protocol

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const PROTOCOL: u8 = 4;

/// Separates packets inside one HTTP long-polling payload.
pub const SEPARATOR: char = '\x1e';

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: u64,
}

impl Handshake {
    /// How long the link may stay silent before it is considered lost.
    pub fn heartbeat_deadline(&self) -> Duration {
        Duration::from_millis(self.ping_interval + self.ping_timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl Packet {
    pub fn encode(&self) -> String {
        match self {
            Packet::Open(handshake) => format!(
                "0{}",
                serde_json::to_string(handshake).unwrap_or_else(|_| "{}".to_string())
            ),
            Packet::Close => "1".to_string(),
            Packet::Ping(data) => format!("2{}", data),
            Packet::Pong(data) => format!("3{}", data),
            Packet::Message(data) => format!("4{}", data),
            Packet::Upgrade => "5".to_string(),
            Packet::Noop => "6".to_string(),
        }
    }

    pub fn decode(raw: &str) -> Result<Packet> {
        let mut chars = raw.chars();
        let kind = chars
            .next()
            .ok_or_else(|| Error::protocol("empty engine.io packet"))?;
        let body = chars.as_str();
        match kind {
            '0' => Ok(Packet::Open(serde_json::from_str(body)?)),
            '1' => Ok(Packet::Close),
            '2' => Ok(Packet::Ping(body.to_string())),
            '3' => Ok(Packet::Pong(body.to_string())),
            '4' => Ok(Packet::Message(body.to_string())),
            '5' => Ok(Packet::Upgrade),
            '6' => Ok(Packet::Noop),
            'b' => Err(Error::protocol("binary engine.io packets are not supported")),
            other => Err(Error::protocol(format!(
                "unknown engine.io packet type: {}",
                other
            ))),
        }
    }
}

pub fn encode_payload(packets: &[Packet]) -> String {
    packets
        .iter()
        .map(Packet::encode)
        .collect::<Vec<_>>()
        .join(&SEPARATOR.to_string())
}

pub fn decode_payload(raw: &str) -> Result<Vec<Packet>> {
    raw.split(SEPARATOR)
        .filter(|s| !s.is_empty())
        .map(Packet::decode)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_open() {
        let packet = Packet::decode(
            r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":["websocket"],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#,
        )
        .unwrap();
        match packet {
            Packet::Open(handshake) => {
                assert_eq!(handshake.sid, "lv_VI97HAXpY6yYWAAAC");
                assert_eq!(handshake.upgrades, vec!["websocket".to_string()]);
                assert_eq!(handshake.heartbeat_deadline(), Duration::from_millis(45000));
            }
            other => panic!("unexpected packet: {:?}", other),
        }
    }

    #[test]
    fn test_decode_payload() {
        let packets = decode_payload("2\x1e42[\"hello\",1]\x1e6").unwrap();
        assert_eq!(
            packets,
            vec![
                Packet::Ping("".to_string()),
                Packet::Message("2[\"hello\",1]".to_string()),
                Packet::Noop,
            ]
        );
        assert_eq!(encode_payload(&packets), "2\x1e42[\"hello\",1]\x1e6");
    }

    #[test]
    fn test_reject_binary_and_unknown() {
        assert!(Packet::decode("bAQID").is_err());
        assert!(Packet::decode("9").is_err());
        assert!(Packet::decode("").is_err());
    }
}
