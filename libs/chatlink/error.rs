use thiserror::Error;

/// Main error type for chatlink
#[derive(Error, Debug)]
pub enum LinkError {
    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Connection closed unexpectedly
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Envelope could not be serialized or parsed
    #[error("Envelope error: {0}")]
    Envelope(#[from] serde_json::Error),

    /// Send attempted with no live connection and queueing disabled
    #[error("Not connected")]
    NotConnected,

    /// Channel send error (driver task gone)
    #[error("Channel send error: {0}")]
    ChannelSend(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Connection id not present in the registry
    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    /// Registry refused a new connection at its limit
    #[error("Connection limit reached ({0})")]
    AtCapacity(usize),
}

/// Result type for chatlink operations
pub type Result<T> = std::result::Result<T, LinkError>;
