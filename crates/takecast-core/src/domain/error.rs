//! Error taxonomy shared by the whole engine.

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required input was missing or invalid at construction time.
    #[error("configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Malformed wire data: bad framing, bad JSON, bad protobuf, bad hex.
    #[error("protocol: {0}")]
    Protocol(String),

    /// Device-auth failure: incomplete chain or unsupported algorithm.
    #[error("auth: {0}")]
    Auth(String),

    /// An operation was attempted in a state that forbids it.
    #[error("state: {0}")]
    State(String),

    /// The receiver (or server) has been closed.
    #[error("receiver closed")]
    Closed,

    /// The governing context was cancelled.
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }
}
