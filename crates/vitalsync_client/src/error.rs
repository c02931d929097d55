//! Error types for the sync client.

use thiserror::Error;
use vitalsync_protocol::ProtocolError;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the sync client.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// Establishing the transport failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Not connected to a server.
    #[error("not connected to server")]
    NotConnected,

    /// The transport went away while sending.
    #[error("connection closed")]
    ConnectionClosed,

    /// Frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Reconnection gave up.
    #[error("gave up after {0} reconnect attempts")]
    MaxReconnectReached(u32),
}

impl ClientError {
    /// Returns true if reconnecting may help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Connect(_) | ClientError::ConnectionClosed)
    }
}
