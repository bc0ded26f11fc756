use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

use crate::engineio::{Handshake, Packet};
use crate::error::{Error, Result};
use crate::transport::{Transport, TransportKind};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketTransport {
    sink: SplitSink<Socket, Message>,
    stream: SplitStream<Socket>,
    handshake: Handshake,
}

impl WebSocketTransport {
    pub async fn connect(endpoint: Url) -> Result<Self> {
        debug!("websocket connecting: {}", endpoint);
        let (socket, _) = connect_async(endpoint.as_str()).await?;
        let (sink, mut stream) = socket.split();
        let handshake = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => match Packet::decode(text.as_str())? {
                    Packet::Open(handshake) => break handshake,
                    other => {
                        return Err(Error::protocol(format!(
                            "expected open packet, got: {:?}",
                            other
                        )))
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    return Err(Error::connection("websocket closed before handshake"))
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        };
        debug!("websocket open, sid: {}", handshake.sid);
        Ok(Self {
            sink,
            stream,
            handshake,
        })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Websocket
    }

    fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    async fn send(&mut self, packet: Packet) -> Result<()> {
        let text = packet.encode();
        trace!("websocket send: {}", text);
        self.sink.send(Message::text(text)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Packet>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    trace!("websocket recv: {}", text.as_str());
                    return Packet::decode(text.as_str()).map(Some);
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("websocket closed by remote: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.sink.send(Message::text(Packet::Close.encode())).await;
        let _ = self.sink.close().await;
    }
}
