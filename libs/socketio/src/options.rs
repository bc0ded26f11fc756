use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::packet::DEFAULT_NAMESPACE;
use crate::transport::{TransportKind, DEFAULT_PATH};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    /// Tried in order on every (re)connect attempt.
    #[serde(default = "default_transports")]
    pub transports: Vec<TransportKind>,
    #[serde(default = "default_reconnection")]
    pub reconnection: bool,
    #[serde(default = "default_reconnection_delay_ms")]
    pub reconnection_delay_ms: u64,
    #[serde(default = "default_reconnection_attempts")]
    pub reconnection_attempts: u32,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// A path in the server url overrides the default `/` namespace, as
    /// `io("https://host/live")` does.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Engine.IO endpoint path on the server.
    #[serde(default = "default_path")]
    pub path: String,
    /// Sent with the namespace CONNECT packet, e.g. `{ "token": "..." }`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Value>,
}

fn default_transports() -> Vec<TransportKind> {
    vec![TransportKind::Websocket, TransportKind::Polling]
}

fn default_reconnection() -> bool {
    true
}

fn default_reconnection_delay_ms() -> u64 {
    2000
}

fn default_reconnection_attempts() -> u32 {
    10
}

fn default_connect_timeout_ms() -> u64 {
    15000
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_path() -> String {
    DEFAULT_PATH.to_string()
}

impl Default for Options {
    fn default() -> Self {
        Self {
            transports: default_transports(),
            reconnection: default_reconnection(),
            reconnection_delay_ms: default_reconnection_delay_ms(),
            reconnection_attempts: default_reconnection_attempts(),
            connect_timeout_ms: default_connect_timeout_ms(),
            namespace: default_namespace(),
            path: default_path(),
            auth: None,
        }
    }
}

impl Options {
    pub fn validate(&self) -> Result<()> {
        if self.transports.is_empty() {
            return Err(Error::connection("at least one transport is required"));
        }
        if !self.namespace.starts_with('/') {
            return Err(Error::connection(format!(
                "namespace must start with '/': {}",
                self.namespace
            )));
        }
        if !self.path.starts_with('/') {
            return Err(Error::connection(format!(
                "path must start with '/': {}",
                self.path
            )));
        }
        if self.connect_timeout_ms == 0 {
            return Err(Error::connection("connect_timeout_ms must be positive"));
        }
        Ok(())
    }
}
