//! Connection handshake state machine.
//!
//! ```text
//! Connected --ClientHello sent--> HelloSent --EntryAssign--> Syncing
//!     HelloSent | Syncing --ServerHelloComplete / reply ClientHelloComplete--> InSync
//! any --error or close--> Disconnected
//! ```
//!
//! The state machine only decides transitions and replies. Applying entries
//! to the table and publishing the status belong to the connection engine.

use crate::error::ClientError;
use ntsync_protocol::message::SERVER_HELLO_RECONNECT;
use ntsync_protocol::Message;
use serde::Serialize;
use std::fmt;

/// Client connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Disconnected,
    Connected,
    HelloSent,
    Syncing,
    InSync,
}

impl ClientStatus {
    pub fn is_connected(&self) -> bool {
        !matches!(self, ClientStatus::Disconnected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClientStatus::Disconnected => "disconnected",
            ClientStatus::Connected => "connected",
            ClientStatus::HelloSent => "hello_sent",
            ClientStatus::Syncing => "syncing",
            ClientStatus::InSync => "in_sync",
        }
    }
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the server announced about itself in ServerHello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub identity: String,
    pub flags: u8,
}

impl ServerInfo {
    /// Returns whether the server reports having seen this client before.
    pub fn is_reconnect(&self) -> bool {
        self.flags & SERVER_HELLO_RECONNECT != 0
    }
}

/// Handshake progress for one connection.
#[derive(Debug)]
pub struct Handshake {
    identity: String,
    status: ClientStatus,
    server: Option<ServerInfo>,
}

impl Handshake {
    /// Creates the state machine for a freshly opened socket.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            status: ClientStatus::Connected,
            server: None,
        }
    }

    pub fn status(&self) -> ClientStatus {
        self.status
    }

    pub fn server(&self) -> Option<&ServerInfo> {
        self.server.as_ref()
    }

    /// Moves to HelloSent and returns the ClientHello to send.
    pub fn start(&mut self) -> Message {
        self.status = ClientStatus::HelloSent;
        Message::client_hello(self.identity.clone())
    }

    /// Feeds one inbound message through the state machine.
    ///
    /// Returns the reply the client must send, if any. An error means the
    /// connection cannot continue.
    pub fn on_message(&mut self, message: &Message) -> Result<Option<Message>, ClientError> {
        match message {
            Message::ServerHello { flags, identity } => {
                let info = ServerInfo {
                    identity: identity.clone(),
                    flags: *flags,
                };
                tracing::info!(
                    "Server identity: {} (reconnect={})",
                    info.identity,
                    info.is_reconnect()
                );
                self.server = Some(info);
                Ok(None)
            }
            Message::ProtocolUnsupported { version } => {
                tracing::warn!("Server rejected protocol, it speaks {}", version);
                Err(ClientError::ProtocolUnsupported {
                    server_version: *version,
                })
            }
            Message::EntryAssign(_) => {
                if self.status == ClientStatus::HelloSent {
                    self.status = ClientStatus::Syncing;
                }
                Ok(None)
            }
            Message::ServerHelloComplete => match self.status {
                ClientStatus::HelloSent | ClientStatus::Syncing => {
                    self.status = ClientStatus::InSync;
                    Ok(Some(Message::ClientHelloComplete))
                }
                other => {
                    tracing::debug!("Ignoring ServerHelloComplete in state {}", other);
                    Ok(None)
                }
            },
            Message::ClientHello { .. } | Message::ClientHelloComplete => {
                tracing::warn!(
                    "Ignoring client-only message {} from server",
                    message.message_type()
                );
                Ok(None)
            }
            _ => Ok(None),
        }
    }
}
