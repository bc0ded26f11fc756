pub mod capture;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod message;
pub mod metrics;
pub mod peer;
pub mod pool;
pub mod session;
pub mod signaling;

mod streamer;


pub use backend::AuthContext;
pub use capture::{MediaCapture, MediaConstraints, MediaStream, SharedMedia};
pub use config::Config;
pub use coordinator::{Parts, RelaySink, Snapshot};
pub use error::{Result, StreamError};
pub use event::StreamerEvent;
pub use session::SessionStatus;
pub use streamer::Streamer;
