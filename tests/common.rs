use std::net::{Ipv4Addr, SocketAddr};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

pub fn pick_port() -> u16 {
    portpicker::pick_unused_port().expect("failed to pick unused port")
}

pub async fn listen() -> (TcpListener, String) {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, pick_port()));
    let listener = TcpListener::bind(addr).await.unwrap();
    (listener, format!("http://{addr}"))
}

/// Bare Engine.IO v4 / Socket.IO v5 relay over one websocket.
pub struct Relay {
    ws: WebSocketStream<TcpStream>,
}

impl Relay {
    /// Accepts one client, completes the handshake and returns the CONNECT auth.
    pub async fn accept(listener: &TcpListener, sid: &str) -> (Self, Value) {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let mut relay = Self { ws };
        let open = json!({
            "sid": format!("eio-{sid}"),
            "upgrades": [],
            "pingInterval": 25000,
            "pingTimeout": 20000,
            "maxPayload": 1000000
        });
        relay.send(format!("0{open}")).await;
        let connect = relay.next_text().await;
        let auth = connect
            .strip_prefix("40")
            .filter(|rest| !rest.is_empty())
            .map(|rest| serde_json::from_str(rest).unwrap())
            .unwrap_or(Value::Null);
        relay.send(format!("40{}", json!({ "sid": sid }))).await;
        (relay, auth)
    }

    pub async fn send(&mut self, text: String) {
        self.ws.send(Message::text(text)).await.unwrap();
    }

    pub async fn emit(&mut self, name: &str, payload: Value) {
        self.send(format!("42{}", json!([name, payload]))).await;
    }

    pub async fn next_text(&mut self) -> String {
        loop {
            match self.ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return text.as_str().to_string(),
                _ => continue,
            }
        }
    }

    /// Next socket.io event, engine.io control packets are skipped.
    pub async fn next_event(&mut self) -> (String, Value) {
        loop {
            let text = self.next_text().await;
            if let Some(raw) = text.strip_prefix("42") {
                let mut args: Vec<Value> = serde_json::from_str(raw).unwrap();
                let name = args.remove(0).as_str().unwrap().to_string();
                let payload = if args.is_empty() {
                    Value::Null
                } else {
                    args.remove(0)
                };
                return (name, payload);
            }
        }
    }
}
