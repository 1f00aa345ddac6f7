//! Error types for the protocol layer.

/// Errors that can occur while encoding or decoding circuit messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, an unknown `type` tag,
    /// or missing fields.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message parsed but is not acceptable here (for example a
    /// binary frame on a text-only socket).
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
