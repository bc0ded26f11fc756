use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("connection timeout after {0:?}")]
    ConnectionTimeout(Duration),
    #[error("connection error: {0}")]
    ConnectionError(String),
    #[error("a stream session is already active")]
    SessionAlreadyActive,
    #[error("media acquisition denied: {0}")]
    MediaAcquisitionDenied(String),
    #[error("media acquisition failed: {0}")]
    MediaAcquisitionError(String),
    #[error("stream start rejected: {0}")]
    StreamStartRejected(String),
    #[error("relay disconnected: {0}")]
    RelayDisconnected(String),
    #[error("stream start aborted by stop")]
    StartAborted,
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("streamer closed")]
    Closed,
}

impl From<socketio::Error> for StreamError {
    fn from(err: socketio::Error) -> Self {
        match err {
            socketio::Error::ConnectionTimeout(timeout) => StreamError::ConnectionTimeout(timeout),
            socketio::Error::Connection(message) => StreamError::ConnectionError(message),
            socketio::Error::Closed => StreamError::ConnectionError("channel closed".to_string()),
            err => StreamError::ConnectionError(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
