//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while encoding or decoding wire data.
///
/// Every decode error is fatal to a connection: once a frame has been
/// misparsed the byte stream cannot be trusted any further.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    #[error("unknown entry type: {0:#04x}")]
    UnknownEntryType(u8),

    #[error("truncated input: need {needed} more bytes")]
    TruncatedInput { needed: usize },

    #[error("malformed varint: more than 32 bits of payload")]
    MalformedVarint,

    #[error("length too large: {len} bytes (max {max})")]
    LengthTooLarge { len: usize, max: usize },

    #[error("array too long: {0} elements (max 255)")]
    ArrayTooLong(usize),

    #[error("invalid UTF-8 in string value")]
    InvalidUtf8,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns whether this error only means "not enough bytes yet".
    ///
    /// The streaming decoder uses this to wait for more data instead of
    /// failing the connection.
    pub fn is_truncation(&self) -> bool {
        matches!(self, ProtocolError::TruncatedInput { .. })
    }
}
