//! # ntsync-client
//!
//! Client library for NetworkTables 3.0 servers.
//!
//! This crate provides:
//! - The handshake state machine
//! - A thread-safe mirror of the server's entry table
//! - An async connection engine with keep-alives
//! - A high-level API for reading and pushing entries

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod table;

pub use client::Client;
pub use config::ConnectionConfig;
pub use connection::Connection;
pub use error::ClientError;
pub use handshake::{ClientStatus, ServerInfo};
pub use table::{EntrySnapshot, EntryTable, UpdateOutcome};
