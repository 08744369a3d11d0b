use std::time::Duration;
use thiserror::Error;

/// Main error type for chatsocket
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SocketError {
    /// Socket-level failure (connect refused, I/O error, handshake rejected)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Connection closed by the peer or by a forced close
    #[error("Connection closed ({code}): {reason}")]
    ConnectionClosed { code: u16, reason: String },

    /// Malformed frame or server-side rejection at the protocol layer
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No reply arrived for a request before its deadline
    #[error("Request {id} timed out after {timeout:?}")]
    RequestTimeout { id: String, timeout: Duration },

    /// The caller cancelled a request before it settled
    #[error("Request {id} was cancelled")]
    Cancelled { id: String },

    /// `disconnect()` was called while the operation was outstanding
    #[error("Client disconnected")]
    Disconnected,

    /// Reconnection stopped after the configured retry budget
    #[error("Reconnection failed after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The client task is gone
    #[error("Channel send error: {0}")]
    ChannelSend(String),

    /// Payload could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SocketError {
    /// True for errors that only affect a single request
    pub fn is_request_scoped(&self) -> bool {
        matches!(
            self,
            SocketError::RequestTimeout { .. } | SocketError::Cancelled { .. }
        )
    }
}

/// Result type for chatsocket operations
pub type Result<T> = std::result::Result<T, SocketError>;
