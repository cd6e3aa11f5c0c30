//! Bounds-checked primitive readers and writers shared by the codecs.
//!
//! Multi-byte integers and doubles are little-endian.

use crate::error::ProtocolError;
use crate::varint;
use crate::MAX_VALUE_LEN;
use bytes::{Buf, BufMut, Bytes};

pub(crate) fn ensure(buf: &[u8], len: usize) -> Result<(), ProtocolError> {
    if buf.len() < len {
        return Err(ProtocolError::TruncatedInput {
            needed: len - buf.len(),
        });
    }
    Ok(())
}

pub(crate) fn get_u8(buf: &mut &[u8]) -> Result<u8, ProtocolError> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

pub(crate) fn get_u16(buf: &mut &[u8]) -> Result<u16, ProtocolError> {
    ensure(buf, 2)?;
    Ok(buf.get_u16_le())
}

pub(crate) fn get_f64(buf: &mut &[u8]) -> Result<f64, ProtocolError> {
    ensure(buf, 8)?;
    Ok(buf.get_f64_le())
}

pub(crate) fn get_array<const N: usize>(buf: &mut &[u8]) -> Result<[u8; N], ProtocolError> {
    ensure(buf, N)?;
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// Reads a varint length prefix, rejecting lengths above `MAX_VALUE_LEN`
/// before anything is buffered for them.
pub(crate) fn get_len(buf: &mut &[u8]) -> Result<usize, ProtocolError> {
    let len = varint::get(buf)? as usize;
    if len > MAX_VALUE_LEN {
        return Err(ProtocolError::LengthTooLarge {
            len,
            max: MAX_VALUE_LEN,
        });
    }
    Ok(len)
}

/// Reads a varint-prefixed byte string.
pub(crate) fn get_bytes(buf: &mut &[u8]) -> Result<Bytes, ProtocolError> {
    let len = get_len(buf)?;
    ensure(buf, len)?;
    let out = Bytes::copy_from_slice(&buf[..len]);
    buf.advance(len);
    Ok(out)
}

/// Reads a varint-prefixed UTF-8 string.
pub(crate) fn get_string(buf: &mut &[u8]) -> Result<String, ProtocolError> {
    let len = get_len(buf)?;
    ensure(buf, len)?;
    let s = std::str::from_utf8(&buf[..len]).map_err(|_| ProtocolError::InvalidUtf8)?;
    let out = s.to_owned();
    buf.advance(len);
    Ok(out)
}

pub(crate) fn put_bytes(buf: &mut impl BufMut, data: &[u8]) -> Result<(), ProtocolError> {
    if data.len() > MAX_VALUE_LEN {
        return Err(ProtocolError::LengthTooLarge {
            len: data.len(),
            max: MAX_VALUE_LEN,
        });
    }
    varint::put(buf, data.len() as u32);
    buf.put_slice(data);
    Ok(())
}

pub(crate) fn put_string(buf: &mut impl BufMut, s: &str) -> Result<(), ProtocolError> {
    put_bytes(buf, s.as_bytes())
}

/// Writes an array element count, which the protocol limits to one byte.
pub(crate) fn put_count(buf: &mut impl BufMut, len: usize) -> Result<(), ProtocolError> {
    let count = u8::try_from(len).map_err(|_| ProtocolError::ArrayTooLong(len))?;
    buf.put_u8(count);
    Ok(())
}
