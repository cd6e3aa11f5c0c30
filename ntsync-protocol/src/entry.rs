//! Entry values and the full Entry record.
//!
//! A full entry, as carried by an EntryAssign message:
//!
//! ```text
//! +--------------+---------+---------+----------+---------+-------------+
//! | name         | type    | id      | sequence | flags   | value       |
//! | varint + utf8| 1 byte  | 2 bytes | 2 bytes  | 1 byte  | per type    |
//! +--------------+---------+---------+----------+---------+-------------+
//! ```
//!
//! Value layouts by type:
//!
//! ```text
//! Boolean        1 byte (0x00 / 0x01)
//! Double         8 bytes IEEE-754
//! String         varint length + utf8
//! Raw            varint length + bytes
//! BooleanArray   1 byte count + count * 1 byte
//! DoubleArray    1 byte count + count * 8 bytes
//! StringArray    1 byte count + count * (varint length + utf8)
//! RpcDefinition  varint length + bytes
//! ```

use crate::error::ProtocolError;
use crate::update::EntryUpdate;
use crate::wire;
use crate::{INITIAL_SEQUENCE, UNASSIGNED_ID};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Type tag of an entry value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EntryType {
    Boolean = 0x00,
    Double = 0x01,
    String = 0x02,
    Raw = 0x03,
    BooleanArray = 0x10,
    DoubleArray = 0x11,
    StringArray = 0x12,
    RpcDefinition = 0x20,
}

impl EntryType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            EntryType::Boolean => "boolean",
            EntryType::Double => "double",
            EntryType::String => "string",
            EntryType::Raw => "raw",
            EntryType::BooleanArray => "boolean[]",
            EntryType::DoubleArray => "double[]",
            EntryType::StringArray => "string[]",
            EntryType::RpcDefinition => "rpc",
        }
    }
}

impl TryFrom<u8> for EntryType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(EntryType::Boolean),
            0x01 => Ok(EntryType::Double),
            0x02 => Ok(EntryType::String),
            0x03 => Ok(EntryType::Raw),
            0x10 => Ok(EntryType::BooleanArray),
            0x11 => Ok(EntryType::DoubleArray),
            0x12 => Ok(EntryType::StringArray),
            0x20 => Ok(EntryType::RpcDefinition),
            other => Err(ProtocolError::UnknownEntryType(other)),
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed entry value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EntryValue {
    Boolean(bool),
    Double(f64),
    String(String),
    Raw(Bytes),
    BooleanArray(Vec<bool>),
    DoubleArray(Vec<f64>),
    StringArray(Vec<String>),
    /// Opaque RPC definition blob. Stored, never interpreted.
    RpcDefinition(Bytes),
}

impl EntryValue {
    pub fn entry_type(&self) -> EntryType {
        match self {
            EntryValue::Boolean(_) => EntryType::Boolean,
            EntryValue::Double(_) => EntryType::Double,
            EntryValue::String(_) => EntryType::String,
            EntryValue::Raw(_) => EntryType::Raw,
            EntryValue::BooleanArray(_) => EntryType::BooleanArray,
            EntryValue::DoubleArray(_) => EntryType::DoubleArray,
            EntryValue::StringArray(_) => EntryType::StringArray,
            EntryValue::RpcDefinition(_) => EntryType::RpcDefinition,
        }
    }

    /// Appends the wire form of this value (no type tag) to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) -> Result<(), ProtocolError> {
        match self {
            EntryValue::Boolean(v) => buf.put_u8(u8::from(*v)),
            EntryValue::Double(v) => buf.put_f64_le(*v),
            EntryValue::String(v) => wire::put_string(buf, v)?,
            EntryValue::Raw(v) | EntryValue::RpcDefinition(v) => wire::put_bytes(buf, v)?,
            EntryValue::BooleanArray(v) => {
                wire::put_count(buf, v.len())?;
                for item in v {
                    buf.put_u8(u8::from(*item));
                }
            }
            EntryValue::DoubleArray(v) => {
                wire::put_count(buf, v.len())?;
                for item in v {
                    buf.put_f64_le(*item);
                }
            }
            EntryValue::StringArray(v) => {
                wire::put_count(buf, v.len())?;
                for item in v {
                    wire::put_string(buf, item)?;
                }
            }
        }
        Ok(())
    }

    /// Returns the wire form of this value.
    pub fn to_wire(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decodes a value of the given type and advances `buf` past it.
    pub fn decode(entry_type: EntryType, buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        let value = match entry_type {
            EntryType::Boolean => EntryValue::Boolean(wire::get_u8(buf)? != 0),
            EntryType::Double => EntryValue::Double(wire::get_f64(buf)?),
            EntryType::String => EntryValue::String(wire::get_string(buf)?),
            EntryType::Raw => EntryValue::Raw(wire::get_bytes(buf)?),
            EntryType::RpcDefinition => EntryValue::RpcDefinition(wire::get_bytes(buf)?),
            EntryType::BooleanArray => {
                let count = wire::get_u8(buf)? as usize;
                wire::ensure(buf, count)?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(wire::get_u8(buf)? != 0);
                }
                EntryValue::BooleanArray(items)
            }
            EntryType::DoubleArray => {
                let count = wire::get_u8(buf)? as usize;
                wire::ensure(buf, count * 8)?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(wire::get_f64(buf)?);
                }
                EntryValue::DoubleArray(items)
            }
            EntryType::StringArray => {
                let count = wire::get_u8(buf)? as usize;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(wire::get_string(buf)?);
                }
                EntryValue::StringArray(items)
            }
        };
        Ok(value)
    }

    /// Decodes a value and also returns the exact bytes it was read from.
    pub fn decode_with_raw(
        entry_type: EntryType,
        buf: &mut &[u8],
    ) -> Result<(Self, Bytes), ProtocolError> {
        let start = *buf;
        let value = Self::decode(entry_type, buf)?;
        let consumed = start.len() - buf.len();
        Ok((value, Bytes::copy_from_slice(&start[..consumed])))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EntryValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EntryValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            EntryValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> Option<&Bytes> {
        match self {
            EntryValue::Raw(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool_array(&self) -> Option<&[bool]> {
        match self {
            EntryValue::BooleanArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64_array(&self) -> Option<&[f64]> {
        match self {
            EntryValue::DoubleArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_string_array(&self) -> Option<&[String]> {
        match self {
            EntryValue::StringArray(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for EntryValue {
    fn from(v: bool) -> Self {
        EntryValue::Boolean(v)
    }
}

impl From<f64> for EntryValue {
    fn from(v: f64) -> Self {
        EntryValue::Double(v)
    }
}

impl From<&str> for EntryValue {
    fn from(v: &str) -> Self {
        EntryValue::String(v.to_owned())
    }
}

impl From<String> for EntryValue {
    fn from(v: String) -> Self {
        EntryValue::String(v)
    }
}

impl From<Bytes> for EntryValue {
    fn from(v: Bytes) -> Self {
        EntryValue::Raw(v)
    }
}

impl From<Vec<bool>> for EntryValue {
    fn from(v: Vec<bool>) -> Self {
        EntryValue::BooleanArray(v)
    }
}

impl From<Vec<f64>> for EntryValue {
    fn from(v: Vec<f64>) -> Self {
        EntryValue::DoubleArray(v)
    }
}

impl From<Vec<String>> for EntryValue {
    fn from(v: Vec<String>) -> Self {
        EntryValue::StringArray(v)
    }
}

/// Entry flags bitfield.
///
/// Only the persistent bit has a meaning; the remaining bits are reserved
/// and carried through untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EntryFlags(u8);

impl EntryFlags {
    /// Entry should survive server restarts.
    pub const PERSISTENT: u8 = 0x01;
    /// Reserved bits.
    pub const RESERVED: u8 = 0xFE;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with_persistent(mut self, persistent: bool) -> Self {
        if persistent {
            self.0 |= Self::PERSISTENT;
        } else {
            self.0 &= !Self::PERSISTENT;
        }
        self
    }

    pub fn is_persistent(&self) -> bool {
        self.0 & Self::PERSISTENT != 0
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }
}

/// One named, typed, versioned record of the replicated table.
///
/// The value is stored together with the bytes it was decoded from, so that
/// re-encoding a received entry reproduces the wire bytes exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub name: String,
    pub id: u16,
    pub sequence: u16,
    pub flags: EntryFlags,
    value: EntryValue,
    raw_value: Bytes,
}

impl Entry {
    /// Creates a client-originated entry. The id stays unassigned until the
    /// server echoes the entry back.
    pub fn new(name: impl Into<String>, value: EntryValue) -> Result<Self, ProtocolError> {
        let raw_value = value.to_wire()?;
        Ok(Self {
            name: name.into(),
            id: UNASSIGNED_ID,
            sequence: INITIAL_SEQUENCE,
            flags: EntryFlags::new(),
            value,
            raw_value,
        })
    }

    pub fn with_id(mut self, id: u16) -> Self {
        self.id = id;
        self
    }

    pub fn with_sequence(mut self, sequence: u16) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_flags(mut self, flags: EntryFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn entry_type(&self) -> EntryType {
        self.value.entry_type()
    }

    pub fn value(&self) -> &EntryValue {
        &self.value
    }

    /// Wire bytes of the value, exactly as received or encoded.
    pub fn raw_value(&self) -> &Bytes {
        &self.raw_value
    }

    pub fn is_persistent(&self) -> bool {
        self.flags.is_persistent()
    }

    /// Returns whether the server has assigned this entry an id.
    pub fn has_id(&self) -> bool {
        self.id != UNASSIGNED_ID
    }

    /// Replaces the value, keeping the entry type.
    pub fn replace_value(&mut self, value: EntryValue) -> Result<(), ProtocolError> {
        self.raw_value = value.to_wire()?;
        self.value = value;
        Ok(())
    }

    /// Takes value and sequence from an update. The caller has already
    /// checked that the update targets this entry with a matching type.
    pub fn apply_update(&mut self, update: EntryUpdate) {
        self.sequence = update.sequence;
        let (value, raw_value) = update.into_parts();
        self.value = value;
        self.raw_value = raw_value;
    }

    /// Decodes a full entry (header and value).
    pub fn decode(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        let name = wire::get_string(buf)?;
        let type_tag = wire::get_u8(buf)?;
        let id = wire::get_u16(buf)?;
        let sequence = wire::get_u16(buf)?;
        let flags = EntryFlags::from_bits(wire::get_u8(buf)?);
        Self::decode_body(type_tag, name, id, sequence, flags, buf)
    }

    /// Decodes the value part of an entry whose header has already been read.
    pub fn decode_body(
        type_tag: u8,
        name: String,
        id: u16,
        sequence: u16,
        flags: EntryFlags,
        buf: &mut &[u8],
    ) -> Result<Self, ProtocolError> {
        let entry_type = EntryType::try_from(type_tag)?;
        let (value, raw_value) = EntryValue::decode_with_raw(entry_type, buf)?;
        Ok(Self {
            name,
            id,
            sequence,
            flags,
            value,
            raw_value,
        })
    }

    /// Appends the full wire form of this entry to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) -> Result<(), ProtocolError> {
        wire::put_string(buf, &self.name)?;
        buf.put_u8(self.entry_type().as_u8());
        buf.put_u16_le(self.id);
        buf.put_u16_le(self.sequence);
        buf.put_u8(self.flags.bits());
        buf.put_slice(&self.raw_value);
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn roundtrip(entry: &Entry) -> Entry {
        let bytes = entry.to_bytes().unwrap();
        let mut buf: &[u8] = &bytes;
        let decoded = Entry::decode(&mut buf).unwrap();
        assert!(buf.is_empty());
        decoded
    }

    #[test]
    fn test_entry_type_tags() {
        for tag in [0x00, 0x01, 0x02, 0x03, 0x10, 0x11, 0x12, 0x20] {
            assert_eq!(EntryType::try_from(tag).unwrap().as_u8(), tag);
        }
        for tag in [0x04, 0x0f, 0x13, 0x21, 0xff] {
            assert!(matches!(
                EntryType::try_from(tag),
                Err(ProtocolError::UnknownEntryType(t)) if t == tag
            ));
        }
    }

    #[test]
    fn test_boolean_entry_bytes() {
        let entry = Entry::new("/a", EntryValue::Boolean(true))
            .unwrap()
            .with_id(0x0102)
            .with_sequence(7)
            .with_flags(EntryFlags::new().with_persistent(true));

        let bytes = entry.to_bytes().unwrap();
        assert_eq!(
            bytes.as_ref(),
            &[0x02, b'/', b'a', 0x00, 0x02, 0x01, 0x07, 0x00, 0x01, 0x01]
        );
    }

    #[test]
    fn test_double_is_little_endian() {
        let entry = Entry::new("d", EntryValue::Double(3.5)).unwrap();
        assert_eq!(entry.raw_value().as_ref(), &3.5f64.to_le_bytes());
    }

    #[test]
    fn test_roundtrip_every_type() {
        let values = vec![
            EntryValue::Boolean(false),
            EntryValue::Double(-1.25),
            EntryValue::String("hello".into()),
            EntryValue::Raw(Bytes::from_static(&[0, 1, 2, 255])),
            EntryValue::BooleanArray(vec![true, false, true]),
            EntryValue::DoubleArray(vec![1.0, 2.5, -0.0]),
            EntryValue::StringArray(vec!["x".into(), "".into(), "yz".into()]),
            EntryValue::RpcDefinition(Bytes::from_static(b"\x01def")),
        ];

        for value in values {
            let entry = Entry::new("/table/key", value).unwrap().with_id(3);
            assert_eq!(roundtrip(&entry), entry);
        }
    }

    #[test]
    fn test_unknown_type_in_entry() {
        let data = [0x01, b'k', 0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01];
        let mut buf: &[u8] = &data;
        assert!(matches!(
            Entry::decode(&mut buf),
            Err(ProtocolError::UnknownEntryType(0x05))
        ));
    }

    #[test]
    fn test_truncated_string_value() {
        // String entry declaring 10 bytes with only 3 present
        let mut data = vec![0x01, b'k', 0x02, 0x00, 0x00, 0x00, 0x00, 0x00];
        data.extend_from_slice(&[0x0a, b'a', b'b', b'c']);
        let mut buf: &[u8] = &data;
        assert!(matches!(
            Entry::decode(&mut buf),
            Err(ProtocolError::TruncatedInput { needed: 7 })
        ));
    }

    #[test]
    fn test_truncated_double_array() {
        let data = [0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xf0, 0x3f];
        let mut buf: &[u8] = &data;
        assert!(matches!(
            EntryValue::decode(EntryType::DoubleArray, &mut buf),
            Err(ProtocolError::TruncatedInput { .. })
        ));
    }

    #[test]
    fn test_raw_bytes_preserved_verbatim() {
        // Non-minimal varint prefix (0x83 0x00 == 3) and a non-canonical
        // boolean byte both survive a decode/encode cycle.
        let mut data = vec![0x01, b's', 0x02, 0x09, 0x00, 0x02, 0x00, 0x00];
        data.extend_from_slice(&[0x83, 0x00, b'a', b'b', b'c']);
        let mut buf: &[u8] = &data;
        let entry = Entry::decode(&mut buf).unwrap();
        assert_eq!(entry.value(), &EntryValue::String("abc".into()));
        assert_eq!(entry.to_bytes().unwrap().as_ref(), &data[..]);

        let data = [0x01, b'b', 0x00, 0x09, 0x00, 0x02, 0x00, 0x00, 0x05];
        let mut buf: &[u8] = &data;
        let entry = Entry::decode(&mut buf).unwrap();
        assert_eq!(entry.value(), &EntryValue::Boolean(true));
        assert_eq!(entry.to_bytes().unwrap().as_ref(), &data[..]);
    }

    #[test]
    fn test_array_too_long() {
        let value = EntryValue::BooleanArray(vec![true; 256]);
        assert!(matches!(
            Entry::new("big", value),
            Err(ProtocolError::ArrayTooLong(256))
        ));
    }

    #[test]
    fn test_new_entry_is_unassigned() {
        let entry = Entry::new("/x", 1.0.into()).unwrap();
        assert_eq!(entry.id, UNASSIGNED_ID);
        assert!(!entry.has_id());
        assert!(!entry.is_persistent());
        assert_eq!(entry.sequence, INITIAL_SEQUENCE);
    }

    #[test]
    fn test_flags_keep_reserved_bits() {
        let flags = EntryFlags::from_bits(0xFF);
        assert!(flags.is_persistent());
        let cleared = flags.with_persistent(false);
        assert_eq!(cleared.bits(), EntryFlags::RESERVED);
    }

    #[test]
    fn test_value_serializes_untagged() {
        let json = serde_json::to_string(&EntryValue::DoubleArray(vec![1.0, 2.0])).unwrap();
        assert_eq!(json, "[1.0,2.0]");
        let json = serde_json::to_string(&EntryType::BooleanArray).unwrap();
        assert_eq!(json, "\"boolean_array\"");
    }

    fn arb_value() -> impl Strategy<Value = EntryValue> {
        prop_oneof![
            any::<bool>().prop_map(EntryValue::Boolean),
            any::<f64>()
                .prop_filter("NaN never compares equal", |v| !v.is_nan())
                .prop_map(EntryValue::Double),
            ".{0,40}".prop_map(EntryValue::String),
            prop::collection::vec(any::<u8>(), 0..200)
                .prop_map(|v| EntryValue::Raw(Bytes::from(v))),
            prop::collection::vec(any::<bool>(), 0..255).prop_map(EntryValue::BooleanArray),
            prop::collection::vec(-1e9f64..1e9, 0..64).prop_map(EntryValue::DoubleArray),
            prop::collection::vec(".{0,12}", 0..20).prop_map(EntryValue::StringArray),
        ]
    }

    proptest! {
        #[test]
        fn prop_entry_roundtrip(
            name in "/[a-z/]{0,30}",
            id in any::<u16>(),
            sequence in any::<u16>(),
            flags in any::<u8>(),
            value in arb_value(),
        ) {
            let entry = Entry::new(name, value)
                .unwrap()
                .with_id(id)
                .with_sequence(sequence)
                .with_flags(EntryFlags::from_bits(flags));
            prop_assert_eq!(roundtrip(&entry), entry);
        }
    }
}
