//! Error types for the sync server.

use thiserror::Error;
use vitalsync_core::StoreError;
use vitalsync_protocol::ProtocolError;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Inbound frame could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Entity store rejected its configuration.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The outbound queue did not accept a frame in time.
    #[error("send timed out after {0:?}")]
    SendTimeout(std::time::Duration),

    /// The peer is gone.
    #[error("connection closed")]
    ConnectionClosed,

    /// The server refused a connection because it is full.
    #[error("connection limit reached: {0}")]
    ConnectionLimit(usize),

    /// The server is shutting down.
    #[error("server is shutting down")]
    ShuttingDown,

    /// WebSocket handshake or transport failure.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns true if the error ends the connection it happened on.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            ServerError::SendTimeout(_)
                | ServerError::ConnectionClosed
                | ServerError::ConnectionLimit(_)
                | ServerError::ShuttingDown
                | ServerError::WebSocket(_)
                | ServerError::Io(_)
        )
    }

    /// Returns true if the error is the peer's fault and can be ignored.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ServerError::Protocol(err) if err.is_ignorable())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ServerError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ServerError::WebSocket(err.to_string())
    }
}
