//! Error types for the wire protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding protocol messages.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// The frame is not valid JSON or does not match the message schema.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The frame is a JSON object without a string `type` field.
    #[error("frame has no message type")]
    MissingType,

    /// The frame names a message type this side does not understand.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// An update mode name that is not `full`, `delta` or `hybrid`.
    #[error("invalid update mode: {0}")]
    InvalidMode(String),

    /// Serialization failed.
    #[error("encode error: {0}")]
    Encode(String),
}

impl ProtocolError {
    /// Creates a malformed-frame error from any displayable cause.
    pub fn malformed(cause: impl std::fmt::Display) -> Self {
        Self::Malformed(cause.to_string())
    }

    /// Returns true if the frame should simply be ignored by the receiver.
    ///
    /// Every decode failure is non-fatal to the connection; only encode
    /// failures indicate a local bug.
    pub fn is_ignorable(&self) -> bool {
        !matches!(self, ProtocolError::Encode(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_are_ignorable() {
        assert!(ProtocolError::malformed("eof").is_ignorable());
        assert!(ProtocolError::MissingType.is_ignorable());
        assert!(ProtocolError::UnknownType("ping".into()).is_ignorable());
        assert!(!ProtocolError::Encode("nan".into()).is_ignorable());
    }

    #[test]
    fn error_display() {
        let err = ProtocolError::UnknownType("ping".into());
        assert_eq!(err.to_string(), "unknown message type: ping");
    }
}
