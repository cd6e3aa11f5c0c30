//! Unsigned LEB128 varints.
//!
//! Every variable-length payload on the wire (names, strings, raw blobs) is
//! prefixed by one of these. Seven value bits per byte, least significant
//! group first, high bit set on every byte except the last.

use crate::error::ProtocolError;
use bytes::BufMut;

/// Maximum encoded size of a `u32` varint.
pub const MAX_VARINT_LEN: usize = 5;

/// Returns the number of bytes `encode` produces for `value`.
pub fn encoded_len(value: u32) -> usize {
    match value {
        0..=0x7f => 1,
        0x80..=0x3fff => 2,
        0x4000..=0x1f_ffff => 3,
        0x20_0000..=0x0fff_ffff => 4,
        _ => 5,
    }
}

/// Appends the minimal encoding of `value` to `buf`.
pub fn put(buf: &mut impl BufMut, mut value: u32) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Encodes `value` into a fresh byte vector.
pub fn encode(value: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(value));
    put(&mut out, value);
    out
}

/// Decodes a varint from the start of `src`.
///
/// Returns the value and the number of bytes it occupied. Non-minimal
/// encodings are accepted; anything wider than 32 bits is rejected.
pub fn decode(src: &[u8]) -> Result<(u32, usize), ProtocolError> {
    let mut value: u32 = 0;

    for (i, &byte) in src.iter().take(MAX_VARINT_LEN).enumerate() {
        let bits = u32::from(byte & 0x7f);
        if i == MAX_VARINT_LEN - 1 && (bits > 0x0f || byte & 0x80 != 0) {
            return Err(ProtocolError::MalformedVarint);
        }

        value |= bits << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }

    Err(ProtocolError::TruncatedInput { needed: 1 })
}

/// Decodes a varint without consuming it, returning the value together with
/// the exact prefix bytes it was read from.
pub fn peek(src: &[u8]) -> Result<(u32, &[u8]), ProtocolError> {
    let (value, len) = decode(src)?;
    Ok((value, &src[..len]))
}

/// Decodes a varint and advances `buf` past it.
pub fn get(buf: &mut &[u8]) -> Result<u32, ProtocolError> {
    let (value, len) = decode(buf)?;
    *buf = &buf[len..];
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_encodings() {
        assert_eq!(encode(0), vec![0x00]);
        assert_eq!(encode(1), vec![0x01]);
        assert_eq!(encode(127), vec![0x7f]);
        assert_eq!(encode(128), vec![0x80, 0x01]);
        assert_eq!(encode(300), vec![0xac, 0x02]);
        assert_eq!(encode(624_485), vec![0xe5, 0x8e, 0x26]);
        assert_eq!(encode(u32::MAX), vec![0xff, 0xff, 0xff, 0xff, 0x0f]);
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let (value, len) = decode(&[0xac, 0x02, 0xff, 0xff]).unwrap();
        assert_eq!(value, 300);
        assert_eq!(len, 2);
    }

    #[test]
    fn test_truncated() {
        assert!(matches!(
            decode(&[]),
            Err(ProtocolError::TruncatedInput { needed: 1 })
        ));
        assert!(matches!(
            decode(&[0x80, 0x80]),
            Err(ProtocolError::TruncatedInput { .. })
        ));
    }

    #[test]
    fn test_overlong_rejected() {
        // Sixth byte would be needed
        assert!(matches!(
            decode(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]),
            Err(ProtocolError::MalformedVarint)
        ));
        // Fifth byte carries bits above 32
        assert!(matches!(
            decode(&[0xff, 0xff, 0xff, 0xff, 0x1f]),
            Err(ProtocolError::MalformedVarint)
        ));
    }

    #[test]
    fn test_non_minimal_accepted() {
        let (value, len) = decode(&[0x81, 0x00]).unwrap();
        assert_eq!(value, 1);
        assert_eq!(len, 2);
    }

    #[test]
    fn test_peek_returns_prefix() {
        let data = [0x81, 0x00, b'x'];
        let (value, prefix) = peek(&data).unwrap();
        assert_eq!(value, 1);
        assert_eq!(prefix, &[0x81, 0x00]);
    }

    #[test]
    fn test_get_advances() {
        let data = [0x05, b'h', b'e'];
        let mut buf: &[u8] = &data;
        assert_eq!(get(&mut buf).unwrap(), 5);
        assert_eq!(buf, b"he");
    }

    proptest! {
        #[test]
        fn prop_roundtrip(value in any::<u32>()) {
            let encoded = encode(value);
            prop_assert_eq!(decode(&encoded).unwrap(), (value, encoded.len()));
        }

        #[test]
        fn prop_minimal_length(value in any::<u32>()) {
            let encoded = encode(value);
            prop_assert_eq!(encoded.len(), encoded_len(value));
            // Minimal: the last byte is never a zero continuation group,
            // unless the value itself is zero.
            if value != 0 {
                prop_assert_ne!(*encoded.last().unwrap(), 0);
            }
        }
    }
}
