use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connection timeout after {0:?}")]
    ConnectionTimeout(Duration),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("channel closed")]
    Closed,
    #[error(transparent)]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl Error {
    pub fn protocol<T>(t: T) -> Self
    where
        T: ToString,
    {
        Error::Protocol(t.to_string())
    }

    pub fn connection<T>(t: T) -> Self
    where
        T: ToString,
    {
        Error::Connection(t.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
