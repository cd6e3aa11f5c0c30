//! Client error types.

use ntsync_protocol::{EntryType, ProtocolVersion};
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ntsync_protocol::ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("already disconnected")]
    AlreadyDisconnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("operation timed out")]
    Timeout,

    #[error("server does not support protocol 3.0 (server speaks {server_version})")]
    ProtocolUnsupported { server_version: ProtocolVersion },

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("type mismatch for {key}: expected {expected}, found {actual}")]
    TypeMismatch {
        key: String,
        expected: EntryType,
        actual: EntryType,
    },
}

impl ClientError {
    /// Returns whether a fresh connection attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Timeout | ClientError::ConnectionClosed
        )
    }
}
