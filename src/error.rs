//! Error types for redisq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed connection string or missing required option.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A store round trip failed for a reason other than a Redis client error.
    #[error("transport error: {0}")]
    Transport(String),

    /// A stored payload could not be decoded, or an envelope could not be encoded.
    #[error("wire format error: {0}")]
    WireFormat(String),

    #[error("process error: {0}")]
    Process(String),

    /// The message handler failed. The message was rejected back onto the queue.
    #[error("handler failed: {0}")]
    Handler(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Store round-trip failures, whichever backend raised them.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Redis(_) | Error::Transport(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::WireFormat(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
