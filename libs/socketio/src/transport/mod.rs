use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::engineio::{self, Handshake, Packet};
use crate::error::{Error, Result};

#[cfg(test)]
pub(crate) mod memory;
pub mod polling;
pub mod websocket;

pub const DEFAULT_PATH: &str = "/socket.io/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Websocket,
    Polling,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Websocket => write!(f, "websocket"),
            TransportKind::Polling => write!(f, "polling"),
        }
    }
}

/// One open Engine.IO link. `recv` must be cancel safe, the channel driver
/// polls it inside `select!`.
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    fn handshake(&self) -> &Handshake;

    async fn send(&mut self, packet: Packet) -> Result<()>;

    /// `Ok(None)` once the remote side closed the link.
    async fn recv(&mut self) -> Result<Option<Packet>>;

    async fn close(&mut self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url, kind: TransportKind) -> Result<Box<dyn Transport>>;
}

#[derive(Debug, Clone, Default)]
pub struct DefaultConnector;

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(&self, url: &Url, kind: TransportKind) -> Result<Box<dyn Transport>> {
        let endpoint = endpoint(url, kind)?;
        match kind {
            TransportKind::Websocket => Ok(Box::new(
                websocket::WebSocketTransport::connect(endpoint).await?,
            )),
            TransportKind::Polling => Ok(Box::new(
                polling::PollingTransport::connect(endpoint).await?,
            )),
        }
    }
}

/// Builds the Engine.IO endpoint for `server`, whose path is the Engine.IO
/// path (see [`crate::Channel::url`]), e.g.
/// `http://localhost:5000` -> `ws://localhost:5000/socket.io/?EIO=4&transport=websocket`
pub fn endpoint(server: &Url, kind: TransportKind) -> Result<Url> {
    let mut url = server.clone();
    if url.path().is_empty() || url.path() == "/" {
        url.set_path(DEFAULT_PATH);
    } else if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    if kind == TransportKind::Websocket {
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(Error::connection(format!("unsupported scheme: {}", other))),
        };
        url.set_scheme(scheme)
            .map_err(|_| Error::connection("cannot switch url scheme"))?;
    } else if !matches!(url.scheme(), "http" | "https") {
        let scheme = if url.scheme() == "wss" { "https" } else { "http" };
        url.set_scheme(scheme)
            .map_err(|_| Error::connection("cannot switch url scheme"))?;
    }
    url.query_pairs_mut()
        .append_pair("EIO", &engineio::PROTOCOL.to_string())
        .append_pair("transport", &kind.to_string());
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_websocket() {
        let url = Url::parse("http://localhost:5000").unwrap();
        assert_eq!(
            endpoint(&url, TransportKind::Websocket).unwrap().as_str(),
            "ws://localhost:5000/socket.io/?EIO=4&transport=websocket"
        );
        let url = Url::parse("https://relay.example.com/custom").unwrap();
        assert_eq!(
            endpoint(&url, TransportKind::Websocket).unwrap().as_str(),
            "wss://relay.example.com/custom/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn test_endpoint_polling() {
        let url = Url::parse("ws://127.0.0.1:5000/").unwrap();
        assert_eq!(
            endpoint(&url, TransportKind::Polling).unwrap().as_str(),
            "http://127.0.0.1:5000/socket.io/?EIO=4&transport=polling"
        );
    }

    #[test]
    fn test_transport_kind_serde() {
        let kinds: Vec<TransportKind> = serde_json::from_str(r#"["websocket","polling"]"#).unwrap();
        assert_eq!(kinds, vec![TransportKind::Websocket, TransportKind::Polling]);
    }
}
