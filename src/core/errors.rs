use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    /// Connection-level failure. Feeds the reconnect policy.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection timeout: {0}")]
    ConnectionTimeout(String),

    /// Malformed inbound frame. Logged and dropped, never closes the connection.
    #[error("Protocol decode error: {0}")]
    ProtocolDecode(String),

    /// HTTP-level failure surfaced after the retry policy gave up.
    /// `status` is 0 when no HTTP response was ever received.
    #[error("Request failed ({status}): {message}")]
    RequestFailure {
        status: u16,
        body: String,
        message: String,
    },

    /// Caller- or shutdown-initiated cancellation.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Not connected")]
    NotConnected,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::core::config::ConfigError),
}

impl NetworkError {
    /// HTTP status carried by a request failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RequestFailure { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
