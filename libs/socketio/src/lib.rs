//! Socket.IO client used as the relay signaling channel.
//!
//! ```no_run
//! # async fn run() -> socketio::Result<()> {
//! let channel = socketio::Channel::new("http://localhost:5000", Default::default())?;
//! channel.subscribe("viewer-joined", |payload| println!("{}", payload));
//! channel.connect().await?;
//! channel.publish("start-webrtc-stream", serde_json::json!({ "streamId": "s1" }))?;
//! # Ok(())
//! # }
//! ```

mod channel;
mod error;
mod options;

pub mod engineio;
pub mod packet;
pub mod transport;

#[cfg(test)]
mod tests;

pub use channel::{Channel, DisconnectReason, SubscriptionId};
pub use error::{Error, Result};
pub use options::Options;
pub use transport::{Connector, DefaultConnector, Transport, TransportKind};
