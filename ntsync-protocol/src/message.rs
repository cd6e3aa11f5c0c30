//! Protocol messages.
//!
//! Every message is a one-byte type tag followed by a type-specific payload.
//! There is no outer length prefix, so a frame can only be skipped by
//! parsing it completely.

use crate::entry::{Entry, EntryFlags};
use crate::error::ProtocolError;
use crate::update::EntryUpdate;
use crate::wire;
use crate::PROTOCOL_VERSION;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Magic payload of a ClearAllEntries message.
pub const CLEAR_ALL_MAGIC: [u8; 4] = [0xD0, 0x6C, 0xB2, 0x7A];

/// ServerHello flag bit: the server has seen this client before.
pub const SERVER_HELLO_RECONNECT: u8 = 0x01;

/// Message type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    KeepAlive = 0x00,
    ClientHello = 0x01,
    ProtocolUnsupported = 0x02,
    ServerHelloComplete = 0x03,
    ServerHello = 0x04,
    ClientHelloComplete = 0x05,
    EntryAssign = 0x10,
    EntryUpdate = 0x11,
    EntryFlagUpdate = 0x12,
    EntryDelete = 0x13,
    ClearAllEntries = 0x14,
    RpcExec = 0x20,
    RpcResponse = 0x21,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(MessageType::KeepAlive),
            0x01 => Ok(MessageType::ClientHello),
            0x02 => Ok(MessageType::ProtocolUnsupported),
            0x03 => Ok(MessageType::ServerHelloComplete),
            0x04 => Ok(MessageType::ServerHello),
            0x05 => Ok(MessageType::ClientHelloComplete),
            0x10 => Ok(MessageType::EntryAssign),
            0x11 => Ok(MessageType::EntryUpdate),
            0x12 => Ok(MessageType::EntryFlagUpdate),
            0x13 => Ok(MessageType::EntryDelete),
            0x14 => Ok(MessageType::ClearAllEntries),
            0x20 => Ok(MessageType::RpcExec),
            0x21 => Ok(MessageType::RpcResponse),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::KeepAlive => "KeepAlive",
            MessageType::ClientHello => "ClientHello",
            MessageType::ProtocolUnsupported => "ProtocolUnsupported",
            MessageType::ServerHelloComplete => "ServerHelloComplete",
            MessageType::ServerHello => "ServerHello",
            MessageType::ClientHelloComplete => "ClientHelloComplete",
            MessageType::EntryAssign => "EntryAssign",
            MessageType::EntryUpdate => "EntryUpdate",
            MessageType::EntryFlagUpdate => "EntryFlagUpdate",
            MessageType::EntryDelete => "EntryDelete",
            MessageType::ClearAllEntries => "ClearAllEntries",
            MessageType::RpcExec => "RpcExec",
            MessageType::RpcResponse => "RpcResponse",
        };
        f.write_str(name)
    }
}

/// Protocol revision as exchanged in the hello messages: two literal bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    pub fn to_bytes(self) -> [u8; 2] {
        [self.major, self.minor]
    }

    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        Self::new(bytes[0], bytes[1])
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Body of an RPC execute or response frame.
///
/// Layout: id (2) + call uid (2) + varint length + opaque body. The body is
/// never interpreted; it is only framed so the stream stays in sync.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    pub id: u16,
    pub uid: u16,
    pub body: Bytes,
}

impl RpcCall {
    fn decode(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        let id = wire::get_u16(buf)?;
        let uid = wire::get_u16(buf)?;
        let body = wire::get_bytes(buf)?;
        Ok(Self { id, uid, body })
    }

    fn encode(&self, buf: &mut impl BufMut) -> Result<(), ProtocolError> {
        buf.put_u16_le(self.id);
        buf.put_u16_le(self.uid);
        wire::put_bytes(buf, &self.body)
    }
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    KeepAlive,
    ClientHello {
        version: ProtocolVersion,
        identity: String,
    },
    ProtocolUnsupported {
        version: ProtocolVersion,
    },
    ServerHelloComplete,
    ServerHello {
        flags: u8,
        identity: String,
    },
    ClientHelloComplete,
    EntryAssign(Entry),
    EntryUpdate(EntryUpdate),
    EntryFlagUpdate {
        id: u16,
        flags: EntryFlags,
    },
    EntryDelete {
        id: u16,
    },
    ClearAllEntries {
        magic: [u8; 4],
    },
    RpcExec(RpcCall),
    RpcResponse(RpcCall),
}

impl Message {
    /// Builds the ClientHello this implementation sends.
    pub fn client_hello(identity: impl Into<String>) -> Self {
        Message::ClientHello {
            version: PROTOCOL_VERSION,
            identity: identity.into(),
        }
    }

    /// Builds a ClearAllEntries carrying the required magic.
    pub fn clear_all() -> Self {
        Message::ClearAllEntries {
            magic: CLEAR_ALL_MAGIC,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Message::KeepAlive => MessageType::KeepAlive,
            Message::ClientHello { .. } => MessageType::ClientHello,
            Message::ProtocolUnsupported { .. } => MessageType::ProtocolUnsupported,
            Message::ServerHelloComplete => MessageType::ServerHelloComplete,
            Message::ServerHello { .. } => MessageType::ServerHello,
            Message::ClientHelloComplete => MessageType::ClientHelloComplete,
            Message::EntryAssign(_) => MessageType::EntryAssign,
            Message::EntryUpdate(_) => MessageType::EntryUpdate,
            Message::EntryFlagUpdate { .. } => MessageType::EntryFlagUpdate,
            Message::EntryDelete { .. } => MessageType::EntryDelete,
            Message::ClearAllEntries { .. } => MessageType::ClearAllEntries,
            Message::RpcExec(_) => MessageType::RpcExec,
            Message::RpcResponse(_) => MessageType::RpcResponse,
        }
    }

    /// Decodes one complete message (tag and payload) from `buf`.
    pub fn decode(buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        let tag = wire::get_u8(buf)?;
        Self::dispatch(tag, buf)
    }

    /// Decodes the payload that follows an already-read tag byte.
    pub fn dispatch(tag: u8, buf: &mut &[u8]) -> Result<Self, ProtocolError> {
        let message = match MessageType::try_from(tag)? {
            MessageType::KeepAlive => Message::KeepAlive,
            MessageType::ClientHello => {
                let version = ProtocolVersion::from_bytes(wire::get_array(buf)?);
                let identity = wire::get_string(buf)?;
                Message::ClientHello { version, identity }
            }
            MessageType::ProtocolUnsupported => Message::ProtocolUnsupported {
                version: ProtocolVersion::from_bytes(wire::get_array(buf)?),
            },
            MessageType::ServerHelloComplete => Message::ServerHelloComplete,
            MessageType::ServerHello => {
                let flags = wire::get_u8(buf)?;
                let identity = wire::get_string(buf)?;
                Message::ServerHello { flags, identity }
            }
            MessageType::ClientHelloComplete => Message::ClientHelloComplete,
            MessageType::EntryAssign => Message::EntryAssign(Entry::decode(buf)?),
            MessageType::EntryUpdate => Message::EntryUpdate(EntryUpdate::decode(buf)?),
            MessageType::EntryFlagUpdate => {
                let id = wire::get_u16(buf)?;
                let flags = EntryFlags::from_bits(wire::get_u8(buf)?);
                Message::EntryFlagUpdate { id, flags }
            }
            MessageType::EntryDelete => Message::EntryDelete {
                id: wire::get_u16(buf)?,
            },
            MessageType::ClearAllEntries => Message::ClearAllEntries {
                magic: wire::get_array(buf)?,
            },
            MessageType::RpcExec => Message::RpcExec(RpcCall::decode(buf)?),
            MessageType::RpcResponse => Message::RpcResponse(RpcCall::decode(buf)?),
        };
        Ok(message)
    }

    /// Appends the wire form of this message to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) -> Result<(), ProtocolError> {
        buf.put_u8(self.message_type() as u8);

        match self {
            Message::KeepAlive
            | Message::ServerHelloComplete
            | Message::ClientHelloComplete => {}
            Message::ClientHello { version, identity } => {
                buf.put_slice(&version.to_bytes());
                wire::put_string(buf, identity)?;
            }
            Message::ProtocolUnsupported { version } => buf.put_slice(&version.to_bytes()),
            Message::ServerHello { flags, identity } => {
                buf.put_u8(*flags);
                wire::put_string(buf, identity)?;
            }
            Message::EntryAssign(entry) => entry.encode(buf)?,
            Message::EntryUpdate(update) => update.encode(buf),
            Message::EntryFlagUpdate { id, flags } => {
                buf.put_u16_le(*id);
                buf.put_u8(flags.bits());
            }
            Message::EntryDelete { id } => buf.put_u16_le(*id),
            Message::ClearAllEntries { magic } => buf.put_slice(magic),
            Message::RpcExec(call) | Message::RpcResponse(call) => call.encode(buf)?,
        }
        Ok(())
    }

    /// Encodes this message into a fresh buffer.
    pub fn to_bytes(&self) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }
}
