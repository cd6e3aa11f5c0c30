//! Entry updates: a value change addressed by id instead of name.
//!
//! ```text
//! +---------+----------+---------+-------------+
//! | id      | sequence | type    | value       |
//! | 2 bytes | 2 bytes  | 1 byte  | per type    |
//! +---------+----------+---------+-------------+
//! ```

use crate::entry::{EntryType, EntryValue};
use crate::error::ProtocolError;
use crate::wire;
use bytes::{BufMut, Bytes};

/// A decoded EntryUpdate payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryUpdate {
    pub id: u16,
    pub sequence: u16,
    value: EntryValue,
    raw_value: Bytes,
}

impl EntryUpdate {
    pub fn new(id: u16, sequence: u16, value: EntryValue) -> Result<Self, ProtocolError> {
        let raw_value = value.to_wire()?;
        Ok(Self {
            id,
            sequence,
            value,
            raw_value,
        })
    }

    pub fn entry_type(&self) -> EntryType {
        self.value.entry_type()
    }

    pub fn value(&self) -> &EntryValue {
        &self.value
    }

    pub fn raw_value(&self) -> &Bytes {
        &self.raw_value
    }

    pub fn into_parts(self) -> (EntryValue, Bytes) {
        (self.value, self.raw_value)
    }

    pub fn decode(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        let id = wire::get_u16(buf)?;
        let sequence = wire::get_u16(buf)?;
        let entry_type = EntryType::try_from(wire::get_u8(buf)?)?;
        let (value, raw_value) = EntryValue::decode_with_raw(entry_type, buf)?;
        Ok(Self {
            id,
            sequence,
            value,
            raw_value,
        })
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u16_le(self.id);
        buf.put_u16_le(self.sequence);
        buf.put_u8(self.entry_type().as_u8());
        buf.put_slice(&self.raw_value);
    }
}
