//! # ntsync-protocol
//!
//! Wire protocol implementation for ntsync, a NetworkTables 3.0 client.
//!
//! This crate provides:
//! - Unsigned LEB128 varints for length prefixes
//! - Typed entry values and the full Entry record
//! - Entry updates addressed by id
//! - The thirteen message kinds and tag dispatch
//! - A streaming decoder for socket input

pub mod codec;
pub mod entry;
pub mod error;
pub mod message;
pub mod update;
pub mod varint;

mod wire;

pub use codec::{Decoder, Encoder, MAX_FRAME_LEN};
pub use entry::{Entry, EntryFlags, EntryType, EntryValue};
pub use error::ProtocolError;
pub use message::{Message, MessageType, ProtocolVersion, RpcCall, CLEAR_ALL_MAGIC};
pub use update::EntryUpdate;

/// Protocol revision implemented here.
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::new(3, 0);

/// Default server port.
pub const DEFAULT_PORT: u16 = 1735;

/// Identity sent in ClientHello unless configured otherwise.
pub const DEFAULT_IDENTITY: &str = "ntsync";

/// Entry id a client uses for an entry the server has not numbered yet.
pub const UNASSIGNED_ID: u16 = 0xFFFF;

/// Sequence number of a freshly created entry.
pub const INITIAL_SEQUENCE: u16 = 1;

/// Maximum length of any single string or byte value (16 MiB).
pub const MAX_VALUE_LEN: usize = 16 * 1024 * 1024;
