//! High-level client API.

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::ClientError;
use crate::handshake::ClientStatus;
use crate::table::EntrySnapshot;
use bytes::Bytes;
use ntsync_protocol::{Entry, EntryType, EntryUpdate, EntryValue, Message};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// High-level client mirroring one server's entry table.
pub struct Client {
    conn: Arc<Connection>,
}

impl Client {
    /// Connects to `host:port` with default settings.
    pub async fn connect(host: &str, port: u16) -> Result<Self, ClientError> {
        Self::connect_with(ConnectionConfig::new(host, port)).await
    }

    /// Connects using the given configuration.
    pub async fn connect_with(config: ConnectionConfig) -> Result<Self, ClientError> {
        let conn = Connection::connect(config).await?;
        Ok(Self {
            conn: Arc::new(conn),
        })
    }

    /// Runs a client over an already open stream.
    pub async fn from_stream<S>(stream: S, config: ConnectionConfig) -> Result<Self, ClientError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let conn = Connection::with_stream(stream, config).await?;
        Ok(Self {
            conn: Arc::new(conn),
        })
    }

    pub fn status(&self) -> ClientStatus {
        self.conn.status()
    }

    pub fn is_connected(&self) -> bool {
        self.conn.status().is_connected()
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    /// Waits until the initial table sync has completed.
    pub async fn wait_until_synced(&self, timeout: Duration) -> Result<(), ClientError> {
        self.conn.wait_until_synced(timeout).await
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.conn.close().await
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get_value(&self, key: &str) -> Result<EntryValue, ClientError> {
        self.conn
            .table()
            .get(key)
            .ok_or_else(|| ClientError::KeyNotFound(key.to_string()))
    }

    fn get_typed<T>(
        &self,
        key: &str,
        expected: EntryType,
        extract: impl FnOnce(EntryValue) -> Option<T>,
    ) -> Result<T, ClientError> {
        let value = self.get_value(key)?;
        let actual = value.entry_type();
        extract(value).ok_or_else(|| ClientError::TypeMismatch {
            key: key.to_string(),
            expected,
            actual,
        })
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, ClientError> {
        self.get_typed(key, EntryType::Boolean, |v| v.as_bool())
    }

    pub fn get_double(&self, key: &str) -> Result<f64, ClientError> {
        self.get_typed(key, EntryType::Double, |v| v.as_f64())
    }

    pub fn get_string(&self, key: &str) -> Result<String, ClientError> {
        self.get_typed(key, EntryType::String, |v| match v {
            EntryValue::String(s) => Some(s),
            _ => None,
        })
    }

    pub fn get_raw(&self, key: &str) -> Result<Bytes, ClientError> {
        self.get_typed(key, EntryType::Raw, |v| match v {
            EntryValue::Raw(b) => Some(b),
            _ => None,
        })
    }

    pub fn get_bool_array(&self, key: &str) -> Result<Vec<bool>, ClientError> {
        self.get_typed(key, EntryType::BooleanArray, |v| match v {
            EntryValue::BooleanArray(items) => Some(items),
            _ => None,
        })
    }

    pub fn get_double_array(&self, key: &str) -> Result<Vec<f64>, ClientError> {
        self.get_typed(key, EntryType::DoubleArray, |v| match v {
            EntryValue::DoubleArray(items) => Some(items),
            _ => None,
        })
    }

    pub fn get_string_array(&self, key: &str) -> Result<Vec<String>, ClientError> {
        self.get_typed(key, EntryType::StringArray, |v| match v {
            EntryValue::StringArray(items) => Some(items),
            _ => None,
        })
    }

    /// Returns the sorted keys starting with `prefix`.
    pub fn keys(&self, prefix: &str) -> Vec<String> {
        self.conn.table().keys_with_prefix(prefix)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.conn.table().contains(key)
    }

    /// Returns sorted snapshots of the entries under `prefix`.
    pub fn snapshot(&self, prefix: &str) -> Vec<EntrySnapshot> {
        self.conn.table().snapshot_with_prefix(prefix)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    fn ensure_connected(&self) -> Result<(), ClientError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    /// Creates `key` or, if it exists, sets its value.
    pub async fn put(&self, key: &str, value: impl Into<EntryValue>) -> Result<(), ClientError> {
        self.ensure_connected()?;
        let value = value.into();

        if !self.conn.table().contains(key) {
            let entry = Entry::new(key, value.clone())?;
            if self.conn.table().insert_local(entry.clone()) {
                tracing::debug!("Announcing new entry {}", key);
                return self.conn.send(Message::EntryAssign(entry)).await;
            }
        }
        self.set(key, value).await
    }

    /// Sets the value of an existing key. The type must not change.
    pub async fn set(&self, key: &str, value: impl Into<EntryValue>) -> Result<(), ClientError> {
        self.ensure_connected()?;
        let entry = self.conn.table().set_local(key, value.into())?;

        let message = if entry.has_id() {
            Message::EntryUpdate(EntryUpdate::new(
                entry.id,
                entry.sequence,
                entry.value().clone(),
            )?)
        } else {
            // Not numbered by the server yet; repeat the assignment
            Message::EntryAssign(entry)
        };
        self.conn.send(message).await
    }

    /// Marks `key` persistent or temporary.
    pub async fn set_persistent(&self, key: &str, persistent: bool) -> Result<(), ClientError> {
        self.ensure_connected()?;
        let table = self.conn.table();
        let current = table
            .get_entry(key)
            .ok_or_else(|| ClientError::KeyNotFound(key.to_string()))?;
        let entry = table.set_flags_local(key, current.flags.with_persistent(persistent))?;

        let message = if entry.has_id() {
            Message::EntryFlagUpdate {
                id: entry.id,
                flags: entry.flags,
            }
        } else {
            Message::EntryAssign(entry)
        };
        self.conn.send(message).await
    }

    /// Deletes `key` locally and on the server.
    pub async fn delete(&self, key: &str) -> Result<(), ClientError> {
        self.ensure_connected()?;
        let entry = self
            .conn
            .table()
            .remove(key)
            .ok_or_else(|| ClientError::KeyNotFound(key.to_string()))?;

        if entry.has_id() {
            self.conn.send(Message::EntryDelete { id: entry.id }).await
        } else {
            Ok(())
        }
    }

    /// Removes every entry locally and on the server.
    pub async fn clear_all(&self) -> Result<(), ClientError> {
        self.ensure_connected()?;
        let removed = self.conn.table().clear_all();
        tracing::info!("Clearing all entries ({} local)", removed);
        self.conn.send(Message::clear_all()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntsync_protocol::{EntryFlags, Encoder, UNASSIGNED_ID};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    const WAIT: Duration = Duration::from_secs(5);

    fn frame(message: Message) -> Vec<u8> {
        Encoder::encode_message(&message).unwrap().to_vec()
    }

    fn assign(name: &str, id: u16, sequence: u16, value: EntryValue) -> Vec<u8> {
        frame(Message::EntryAssign(
            Entry::new(name, value)
                .unwrap()
                .with_id(id)
                .with_sequence(sequence),
        ))
    }

    async fn expect_frame(server: &mut DuplexStream, message: Message) {
        let expected = frame(message);
        let mut buf = vec![0u8; expected.len()];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, expected);
    }

    async fn wait_for_key(client: &Client, key: &str) {
        while !client.contains_key(key) {
            tokio::task::yield_now().await;
        }
    }

    async fn synced_client() -> (Client, DuplexStream) {
        let (client_io, mut server) = tokio::io::duplex(4096);
        let config = ConnectionConfig::default().with_identity("TESTCLIENT");
        let client = Client::from_stream(client_io, config).await.unwrap();

        expect_frame(&mut server, Message::client_hello("TESTCLIENT")).await;
        let mut bytes = assign("/a", 1, 1, EntryValue::Boolean(true));
        bytes.extend(assign("/b", 2, 1, EntryValue::Double(3.5)));
        bytes.extend(frame(Message::ServerHelloComplete));
        server.write_all(&bytes).await.unwrap();

        client.wait_until_synced(WAIT).await.unwrap();
        expect_frame(&mut server, Message::ClientHelloComplete).await;
        (client, server)
    }

    #[tokio::test]
    async fn test_sync_then_typed_reads() {
        let (client, _server) = synced_client().await;

        assert_eq!(client.status(), ClientStatus::InSync);
        assert!(client.get_bool("/a").unwrap());
        assert_eq!(client.get_double("/b").unwrap(), 3.5);
        assert_eq!(
            client.get_value("/b").unwrap(),
            EntryValue::Double(3.5)
        );

        assert!(matches!(
            client.get_double("/a"),
            Err(ClientError::TypeMismatch {
                expected: EntryType::Double,
                actual: EntryType::Boolean,
                ..
            })
        ));
        assert!(matches!(
            client.get_string("/missing"),
            Err(ClientError::KeyNotFound(key)) if key == "/missing"
        ));

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_every_getter() {
        let (client, mut server) = synced_client().await;

        let mut bytes = assign("/s", 3, 1, EntryValue::String("hi".into()));
        bytes.extend(assign("/r", 4, 1, EntryValue::Raw(Bytes::from_static(&[1, 2]))));
        bytes.extend(assign("/ba", 5, 1, EntryValue::BooleanArray(vec![true, false])));
        bytes.extend(assign("/da", 6, 1, EntryValue::DoubleArray(vec![1.5])));
        bytes.extend(assign(
            "/sa",
            7,
            1,
            EntryValue::StringArray(vec!["x".into(), "y".into()]),
        ));
        server.write_all(&bytes).await.unwrap();
        wait_for_key(&client, "/sa").await;

        assert_eq!(client.get_string("/s").unwrap(), "hi");
        assert_eq!(client.get_raw("/r").unwrap().as_ref(), &[1, 2]);
        assert_eq!(client.get_bool_array("/ba").unwrap(), vec![true, false]);
        assert_eq!(client.get_double_array("/da").unwrap(), vec![1.5]);
        assert_eq!(client.get_string_array("/sa").unwrap(), vec!["x", "y"]);
        assert!(client.get_bool_array("/da").is_err());

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_server_delete_removes_key() {
        let (client, mut server) = synced_client().await;
        assert!(client.contains_key("/a"));

        let mut bytes = frame(Message::EntryDelete { id: 1 });
        bytes.extend(assign("/marker", 9, 1, EntryValue::Boolean(true)));
        server.write_all(&bytes).await.unwrap();
        wait_for_key(&client, "/marker").await;

        assert!(!client.contains_key("/a"));
        assert_eq!(client.keys(""), vec!["/b", "/marker"]);
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_by_prefix() {
        let (client, _server) = synced_client().await;

        let snapshot = client.snapshot("/");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].name, "/a");
        assert_eq!(snapshot[0].entry_type, EntryType::Boolean);
        assert_eq!(snapshot[1].value, EntryValue::Double(3.5));
        assert!(client.snapshot("/z").is_empty());

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_put_new_key_then_update_after_echo() {
        let (client, mut server) = synced_client().await;

        client.put("/mine", 1.0).await.unwrap();
        expect_frame(
            &mut server,
            Message::EntryAssign(Entry::new("/mine", EntryValue::Double(1.0)).unwrap()),
        )
        .await;
        assert_eq!(
            client.connection().table().get_entry("/mine").unwrap().id,
            UNASSIGNED_ID
        );

        // Server numbers the entry and echoes it back
        let mut bytes = assign("/mine", 7, 1, EntryValue::Double(1.0));
        bytes.extend(assign("/marker", 8, 1, EntryValue::Boolean(true)));
        server.write_all(&bytes).await.unwrap();
        wait_for_key(&client, "/marker").await;

        client.put("/mine", 2.0).await.unwrap();
        expect_frame(
            &mut server,
            Message::EntryUpdate(EntryUpdate::new(7, 2, EntryValue::Double(2.0)).unwrap()),
        )
        .await;
        assert_eq!(client.get_double("/mine").unwrap(), 2.0);

        assert!(matches!(
            client.put("/mine", true).await,
            Err(ClientError::TypeMismatch { .. })
        ));
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_set_requires_existing_key() {
        let (client, _server) = synced_client().await;
        assert!(matches!(
            client.set("/nope", 1.0).await,
            Err(ClientError::KeyNotFound(_))
        ));
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_set_persistent_and_delete() {
        let (client, mut server) = synced_client().await;

        client.set_persistent("/b", true).await.unwrap();
        expect_frame(
            &mut server,
            Message::EntryFlagUpdate {
                id: 2,
                flags: EntryFlags::new().with_persistent(true),
            },
        )
        .await;

        client.delete("/a").await.unwrap();
        expect_frame(&mut server, Message::EntryDelete { id: 1 }).await;
        assert!(!client.contains_key("/a"));

        // Deleting a never-numbered entry stays local
        client.put("/local", "x").await.unwrap();
        expect_frame(
            &mut server,
            Message::EntryAssign(Entry::new("/local", EntryValue::String("x".into())).unwrap()),
        )
        .await;
        client.delete("/local").await.unwrap();

        client.clear_all().await.unwrap();
        expect_frame(&mut server, Message::clear_all()).await;
        assert!(client.keys("").is_empty());

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_writes_after_close_fail() {
        let (client, _server) = synced_client().await;
        client.close().await.unwrap();

        assert!(!client.is_connected());
        assert!(matches!(
            client.put("/x", 1.0).await,
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(
            client.close().await,
            Err(ClientError::AlreadyDisconnected)
        ));
        // The mirror stays readable after close
        assert!(client.get_bool("/a").unwrap());
    }

    #[tokio::test]
    async fn test_connect_over_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let expected = frame(Message::client_hello("ntsync"));
            let mut buf = vec![0u8; expected.len()];
            socket.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, expected);

            socket
                .write_all(&frame(Message::ServerHelloComplete))
                .await
                .unwrap();
            let mut reply = [0u8; 1];
            socket.read_exact(&mut reply).await.unwrap();
            assert_eq!(reply, [0x05]);
        });

        let client = Client::connect("127.0.0.1", port).await.unwrap();
        client.wait_until_synced(WAIT).await.unwrap();
        server.await.unwrap();
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = Client::connect("127.0.0.1", port).await;
        assert!(matches!(result, Err(ClientError::Io(_))));
    }
}
