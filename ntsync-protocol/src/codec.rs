//! Streaming encoder and decoder for protocol messages.

use crate::error::ProtocolError;
use crate::message::Message;
use crate::MAX_VALUE_LEN;
use bytes::{Buf, Bytes, BytesMut};

/// Largest frame the decoder will buffer: a name and a value at their
/// limits, plus headers.
pub const MAX_FRAME_LEN: usize = 2 * MAX_VALUE_LEN + 1024;

/// Encodes messages into wire bytes.
pub struct Encoder;

impl Encoder {
    /// Encodes a single message.
    pub fn encode_message(message: &Message) -> Result<BytesMut, ProtocolError> {
        message.to_bytes()
    }

    /// Encodes several messages back to back into one buffer.
    pub fn encode_batch<'a>(
        messages: impl IntoIterator<Item = &'a Message>,
    ) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::new();
        for message in messages {
            message.encode(&mut buf)?;
        }
        Ok(buf)
    }
}

/// Buffers bytes read from a stream and yields complete messages.
///
/// Messages carry no outer length, so a partial frame is detected by
/// attempting a parse: a truncation error means "wait for more bytes",
/// anything else is a real decode error.
///
/// A truncated parse also reports how many bytes are still missing, so the
/// next parse is deferred until at least that much has arrived.
pub struct Decoder {
    buffer: BytesMut,
    /// Buffered length the pending frame needs before it is worth parsing.
    wanted: usize,
    max_frame_len: usize,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            wanted: 0,
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    /// Sets the largest frame the decoder accepts.
    pub fn with_max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max;
        self
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Appends bytes to the internal buffer.
    pub fn extend_bytes(&mut self, data: Bytes) {
        self.buffer.extend_from_slice(&data);
    }

    /// Attempts to decode the next message from the buffer.
    ///
    /// Returns `Ok(None)` if the buffer holds no complete message yet.
    pub fn decode_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        if self.buffer.is_empty() || self.buffer.len() < self.wanted {
            return Ok(None);
        }

        let total = self.buffer.len();
        let mut cursor: &[u8] = &self.buffer;
        match Message::decode(&mut cursor) {
            Ok(message) => {
                let consumed = total - cursor.len();
                self.buffer.advance(consumed);
                self.wanted = 0;
                Ok(Some(message))
            }
            Err(ProtocolError::TruncatedInput { needed }) => {
                let wanted = total.saturating_add(needed);
                if wanted > self.max_frame_len {
                    return Err(ProtocolError::LengthTooLarge {
                        len: wanted,
                        max: self.max_frame_len,
                    });
                }
                self.wanted = wanted;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Checks that the stream ended on a message boundary.
    ///
    /// Call this at end of input: leftover bytes mean the peer hung up in
    /// the middle of a frame, which is reported as the truncation error.
    pub fn finish(&self) -> Result<(), ProtocolError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let mut cursor: &[u8] = &self.buffer;
        Message::decode(&mut cursor).map(|_| ())
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.wanted = 0;
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
