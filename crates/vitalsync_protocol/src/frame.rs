//! Transport frames exchanged over a duplex connection.

/// Close code for a normal, intentional close.
pub const NORMAL_CLOSE: u16 = 1000;

/// Close code used when the server is at capacity.
pub const TRY_AGAIN_LATER: u16 = 1013;

/// One unit on the wire, independent of the socket implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A JSON text message.
    Text(String),
    /// The peer is closing the connection.
    Close {
        /// WebSocket-style close code.
        code: u16,
        /// Human-readable reason.
        reason: String,
    },
}

impl Frame {
    /// Creates a normal close frame.
    pub fn close_normal(reason: impl Into<String>) -> Self {
        Frame::Close {
            code: NORMAL_CLOSE,
            reason: reason.into(),
        }
    }

    /// Returns true for a close frame with the normal close code.
    pub fn is_clean_close(&self) -> bool {
        matches!(self, Frame::Close { code, .. } if *code == NORMAL_CLOSE)
    }

    /// Size of the frame payload in bytes. Close frames count as zero.
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Close { .. } => 0,
        }
    }

    /// Returns true if the frame carries no payload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
