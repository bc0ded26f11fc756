use async_trait::async_trait;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use url::Url;

use crate::engineio::{self, Handshake, Packet};
use crate::error::{Error, Result};
use crate::transport::{Transport, TransportKind};

/// HTTP long-polling. A background task keeps one GET outstanding and feeds
/// decoded packets into a queue, so `recv` never drops an in-flight response.
pub struct PollingTransport {
    client: reqwest::Client,
    endpoint: Url,
    handshake: Handshake,
    inbound: UnboundedReceiver<Result<Packet>>,
    poller: JoinHandle<()>,
}

impl PollingTransport {
    pub async fn connect(endpoint: Url) -> Result<Self> {
        debug!("polling connecting: {}", endpoint);
        let client = reqwest::Client::new();
        let body = get(&client, &endpoint).await?;
        let mut packets = engineio::decode_payload(&body)?.into_iter();
        let handshake = match packets.next() {
            Some(Packet::Open(handshake)) => handshake,
            other => {
                return Err(Error::protocol(format!(
                    "expected open packet, got: {:?}",
                    other
                )))
            }
        };
        let mut endpoint = endpoint;
        endpoint
            .query_pairs_mut()
            .append_pair("sid", &handshake.sid);

        let (tx, inbound) = unbounded_channel();
        for packet in packets {
            let _ = tx.send(Ok(packet));
        }
        let poller = tokio::spawn(poll(client.clone(), endpoint.clone(), tx));
        debug!("polling open, sid: {}", handshake.sid);
        Ok(Self {
            client,
            endpoint,
            handshake,
            inbound,
            poller,
        })
    }
}

async fn get(client: &reqwest::Client, url: &Url) -> Result<String> {
    let response = client.get(url.clone()).send().await?;
    if !response.status().is_success() {
        return Err(Error::connection(format!(
            "polling request failed: {}",
            response.status()
        )));
    }
    Ok(response.text().await?)
}

async fn poll(client: reqwest::Client, endpoint: Url, tx: UnboundedSender<Result<Packet>>) {
    loop {
        let packets = match get(&client, &endpoint).await {
            Ok(body) => engineio::decode_payload(&body),
            Err(e) => Err(e),
        };
        match packets {
            Ok(packets) => {
                for packet in packets {
                    trace!("polling recv: {:?}", packet);
                    let closed = packet == Packet::Close;
                    if tx.send(Ok(packet)).is_err() || closed {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("polling stopped: {}", e);
                let _ = tx.send(Err(e));
                return;
            }
        }
    }
}

#[async_trait]
impl Transport for PollingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Polling
    }

    fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    async fn send(&mut self, packet: Packet) -> Result<()> {
        let body = packet.encode();
        trace!("polling send: {}", body);
        let response = self
            .client
            .post(self.endpoint.clone())
            .header("Content-Type", "text/plain;charset=UTF-8")
            .body(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::connection(format!(
                "polling post failed: {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Packet>> {
        match self.inbound.recv().await {
            Some(Ok(Packet::Close)) | None => Ok(None),
            Some(Ok(packet)) => Ok(Some(packet)),
            Some(Err(e)) => Err(e),
        }
    }

    async fn close(&mut self) {
        let _ = self.send(Packet::Close).await;
        self.poller.abort();
    }
}

impl Drop for PollingTransport {
    fn drop(&mut self) {
        self.poller.abort();
    }
}
