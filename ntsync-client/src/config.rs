//! Connection configuration.

use ntsync_protocol::{DEFAULT_IDENTITY, DEFAULT_PORT};
use std::time::Duration;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Default capacity of the outbound message queue.
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 256;

/// Keep-alive timer resolution; also the smallest usable interval.
pub const MIN_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(1);

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Identity sent in ClientHello.
    pub identity: String,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Idle time after which a KeepAlive is sent.
    pub keep_alive_interval: Duration,
    /// Bound of the outbound queue; `send` waits when it is full.
    pub send_queue_capacity: usize,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            identity: DEFAULT_IDENTITY.to_string(),
            connect_timeout: Duration::from_secs(10),
            keep_alive_interval: Duration::from_secs(1),
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Builds a configuration from defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval.max(MIN_KEEP_ALIVE_INTERVAL);
        self
    }

    pub fn with_send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity.max(1);
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    /// Returns the `host:port` string used to connect.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Applies environment variable overrides to the configuration.
    ///
    /// Unparseable values are ignored and leave the current setting alone.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("NTSYNC_HOST") {
            if !host.is_empty() {
                self.host = host;
            }
        }

        if let Ok(port) = std::env::var("NTSYNC_PORT") {
            if let Ok(parsed) = port.parse() {
                self.port = parsed;
            }
        }

        if let Ok(identity) = std::env::var("NTSYNC_IDENTITY") {
            self.identity = identity;
        }

        if let Ok(secs) = std::env::var("NTSYNC_KEEPALIVE_SECS") {
            if let Ok(parsed) = secs.parse() {
                self.keep_alive_interval =
                    Duration::from_secs(parsed).max(MIN_KEEP_ALIVE_INTERVAL);
            }
        }

        if let Ok(secs) = std::env::var("NTSYNC_CONNECT_TIMEOUT_SECS") {
            if let Ok(parsed) = secs.parse() {
                self.connect_timeout = Duration::from_secs(parsed);
            }
        }
    }
}
