//! Socket.IO v5 packets, carried inside Engine.IO message packets.
//!
//! Reference: https://github.com/socketio/socket.io-protocol

use serde_json::Value;

use crate::error::{Error, Result};

pub const DEFAULT_NAMESPACE: &str = "/";

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        data: Value,
    },
}

impl Packet {
    pub fn event(namespace: &str, name: &str, payload: Value) -> Self {
        Packet::Event {
            namespace: namespace.to_string(),
            id: None,
            name: name.to_string(),
            args: vec![payload],
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            Packet::Connect { namespace, .. }
            | Packet::Disconnect { namespace }
            | Packet::Event { namespace, .. }
            | Packet::Ack { namespace, .. }
            | Packet::ConnectError { namespace, .. } => namespace,
        }
    }

    pub fn encode(&self) -> String {
        let (kind, id, data) = match self {
            Packet::Connect { data, .. } => ('0', None, data.clone()),
            Packet::Disconnect { .. } => ('1', None, None),
            Packet::Event { id, name, args, .. } => {
                let mut array = Vec::with_capacity(args.len() + 1);
                array.push(Value::String(name.clone()));
                array.extend(args.iter().cloned());
                ('2', *id, Some(Value::Array(array)))
            }
            Packet::Ack { id, args, .. } => ('3', Some(*id), Some(Value::Array(args.clone()))),
            Packet::ConnectError { data, .. } => ('4', None, Some(data.clone())),
        };
        let mut out = String::new();
        out.push(kind);
        let namespace = self.namespace();
        if namespace != DEFAULT_NAMESPACE {
            out.push_str(namespace);
            out.push(',');
        }
        if let Some(id) = id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = data {
            out.push_str(&data.to_string());
        }
        out
    }

    pub fn decode(raw: &str) -> Result<Packet> {
        let kind = raw
            .chars()
            .next()
            .ok_or_else(|| Error::protocol("empty socket.io packet"))?;
        let mut rest = &raw[kind.len_utf8()..];

        let namespace = if rest.starts_with('/') {
            match rest.find(',') {
                Some(idx) => {
                    let namespace = &rest[..idx];
                    rest = &rest[idx + 1..];
                    namespace.to_string()
                }
                None => {
                    let namespace = rest.to_string();
                    rest = "";
                    namespace
                }
            }
        } else {
            DEFAULT_NAMESPACE.to_string()
        };

        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        let id = if digits > 0 {
            let id = rest[..digits]
                .parse::<u64>()
                .map_err(|e| Error::protocol(format!("invalid ack id: {}", e)))?;
            rest = &rest[digits..];
            Some(id)
        } else {
            None
        };

        let data: Option<Value> = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str(rest)?)
        };

        match kind {
            '0' => Ok(Packet::Connect { namespace, data }),
            '1' => Ok(Packet::Disconnect { namespace }),
            '2' => {
                let mut args = match data {
                    Some(Value::Array(args)) => args,
                    _ => return Err(Error::protocol("event payload must be an array")),
                };
                if args.is_empty() {
                    return Err(Error::protocol("event without name"));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    other => return Err(Error::protocol(format!("invalid event name: {}", other))),
                };
                Ok(Packet::Event {
                    namespace,
                    id,
                    name,
                    args,
                })
            }
            '3' => {
                let id = id.ok_or_else(|| Error::protocol("ack without id"))?;
                let args = match data {
                    Some(Value::Array(args)) => args,
                    _ => vec![],
                };
                Ok(Packet::Ack {
                    namespace,
                    id,
                    args,
                })
            }
            '4' => Ok(Packet::ConnectError {
                namespace,
                data: data.unwrap_or(Value::Null),
            }),
            '5' | '6' => Err(Error::protocol("binary socket.io packets are not supported")),
            other => Err(Error::protocol(format!(
                "unknown socket.io packet type: {}",
                other
            ))),
        }
    }

    /// Human readable reason carried by a CONNECT_ERROR packet.
    pub fn error_message(data: &Value) -> String {
        match data {
            Value::String(message) => message.clone(),
            Value::Object(map) => map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| data.to_string()),
            _ => data.to_string(),
        }
    }
}
