//! Connection engine.
//!
//! One connection runs three tasks over a split socket:
//! - the read loop decodes frames and applies them in wire order,
//! - the write loop drains the outbound queue in FIFO order,
//! - the keep-alive loop queues a KeepAlive when the link has been idle.
//!
//! All of them watch the shared status and exit once it reaches
//! Disconnected, which is terminal. No await inside a loop outlives that
//! transition, so `close` returns even when the peer has stopped reading.

use crate::config::{ConnectionConfig, MIN_KEEP_ALIVE_INTERVAL};
use crate::error::ClientError;
use crate::handshake::{ClientStatus, Handshake, ServerInfo};
use crate::table::{EntryTable, UpdateOutcome};
use ntsync_protocol::{Decoder, Encoder, Message, CLEAR_ALL_MAGIC};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// How long a deliberate close spends writing out already queued messages.
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// State shared between the connection handle and its tasks.
struct Shared {
    status: watch::Sender<ClientStatus>,
    table: EntryTable,
    /// First fatal error, kept until a caller takes it.
    error: Mutex<Option<ClientError>>,
    server: Mutex<Option<ServerInfo>>,
    last_sent: Mutex<Instant>,
}

impl Shared {
    fn status(&self) -> ClientStatus {
        *self.status.borrow()
    }

    /// Publishes a new status unless the connection is already down.
    fn set_status(&self, next: ClientStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == ClientStatus::Disconnected || *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            tracing::info!("Connection status: {}", next);
        }
    }

    /// Marks the connection Disconnected. Returns `false` if it already was.
    fn disconnect(&self) -> bool {
        self.status.send_if_modified(|current| {
            if *current == ClientStatus::Disconnected {
                return false;
            }
            *current = ClientStatus::Disconnected;
            true
        })
    }

    /// Records a fatal error and takes the connection down.
    ///
    /// Errors raised after the connection is already down (for example by
    /// tasks unwinding after `close`) are dropped.
    fn fail(&self, err: ClientError) {
        let mut slot = self.error.lock();
        if self.disconnect() {
            tracing::warn!("Connection failed: {}", err);
            *slot = Some(err);
        } else {
            tracing::debug!("Ignoring error after disconnect: {}", err);
        }
    }
}

/// A connection to a NetworkTables server.
pub struct Connection {
    config: ConnectionConfig,
    shared: Arc<Shared>,
    outbound: mpsc::Sender<Message>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// Connects to the configured server and starts the handshake.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, ClientError> {
        let addr = config.address();
        tracing::debug!("Connecting to {}...", addr);

        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                tracing::debug!("Connection timeout");
                ClientError::Timeout
            })?
            .map_err(|e| {
                tracing::debug!("Connection failed: {}", e);
                ClientError::Io(e)
            })?;

        stream.set_nodelay(true).ok();
        tracing::info!("Connected to {}", addr);

        Self::with_stream(stream, config).await
    }

    /// Runs the connection over an already open stream.
    ///
    /// The ClientHello is written and flushed before this returns, and the
    /// status is HelloSent.
    pub async fn with_stream<S>(
        mut stream: S,
        config: ConnectionConfig,
    ) -> Result<Self, ClientError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let mut handshake = Handshake::new(config.identity.clone());
        let hello = Encoder::encode_message(&handshake.start())?;

        let write_hello = async {
            stream.write_all(&hello).await?;
            stream.flush().await?;
            Ok::<(), std::io::Error>(())
        };
        tokio::time::timeout(config.connect_timeout, write_hello)
            .await
            .map_err(|_| ClientError::Timeout)??;
        tracing::debug!("Sent ClientHello ({} bytes)", hello.len());

        let (status, _) = watch::channel(ClientStatus::Connected);
        let shared = Arc::new(Shared {
            status,
            table: EntryTable::new(),
            error: Mutex::new(None),
            server: Mutex::new(None),
            last_sent: Mutex::new(Instant::now()),
        });
        let (outbound, outbound_rx) = mpsc::channel(config.send_queue_capacity.max(1));
        shared.set_status(handshake.status());

        let (reader, writer) = tokio::io::split(stream);

        let tasks = vec![
            tokio::spawn(write_loop(writer, outbound_rx, shared.clone())),
            tokio::spawn(read_loop(
                reader,
                handshake,
                shared.clone(),
                outbound.clone(),
                config.read_buffer_size,
            )),
            tokio::spawn(keep_alive_loop(
                shared.clone(),
                outbound.clone(),
                config.keep_alive_interval,
            )),
        ];

        Ok(Self {
            config,
            shared,
            outbound,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn status(&self) -> ClientStatus {
        self.shared.status()
    }

    /// Returns a receiver that observes every status change.
    pub fn subscribe_status(&self) -> watch::Receiver<ClientStatus> {
        self.shared.status.subscribe()
    }

    /// Waits until the status reaches `target`.
    ///
    /// If the connection goes down first, the surfaced fatal error is
    /// returned (or `ConnectionClosed` if it was closed deliberately).
    pub async fn wait_for_status(
        &self,
        target: ClientStatus,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        let mut rx = self.subscribe_status();
        let reached = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| *s == target || *s == ClientStatus::Disconnected),
        )
        .await
        .map_err(|_| ClientError::Timeout)?
        .map(|s| *s)
        .map_err(|_| ClientError::ConnectionClosed)?;

        if reached == target {
            Ok(())
        } else {
            Err(self.take_error().unwrap_or(ClientError::ConnectionClosed))
        }
    }

    /// Waits until the initial table sync has completed.
    pub async fn wait_until_synced(&self, timeout: Duration) -> Result<(), ClientError> {
        self.wait_for_status(ClientStatus::InSync, timeout).await
    }

    /// Returns the identity announced by the server, if any.
    pub fn server_identity(&self) -> Option<String> {
        self.shared.server.lock().as_ref().map(|s| s.identity.clone())
    }

    /// Returns what the server announced in ServerHello, if anything.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.shared.server.lock().clone()
    }

    /// Takes the fatal error that brought the connection down, if any.
    pub fn take_error(&self) -> Option<ClientError> {
        self.shared.error.lock().take()
    }

    pub fn table(&self) -> &EntryTable {
        &self.shared.table
    }

    /// Queues a message for the write loop.
    pub async fn send(&self, message: Message) -> Result<(), ClientError> {
        if self.status() == ClientStatus::Disconnected {
            return Err(ClientError::NotConnected);
        }
        tracing::debug!("Queueing {}", message.message_type());
        self.outbound
            .send(message)
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    /// Closes the connection and waits for its tasks to finish.
    ///
    /// Messages already queued are written out first, for at most
    /// `CLOSE_DRAIN_TIMEOUT`.
    pub async fn close(&self) -> Result<(), ClientError> {
        if !self.shared.disconnect() {
            return Err(ClientError::AlreadyDisconnected);
        }
        tracing::info!("Closing connection");

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("Connection task failed: {}", e);
            }
        }

        tracing::debug!("Connection closed");
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Tasks observe the status change and exit on their own
        self.shared.disconnect();
    }
}

/// Resolves once the status reaches Disconnected.
async fn disconnected(status: &mut watch::Receiver<ClientStatus>) {
    let _ = status
        .wait_for(|s| *s == ClientStatus::Disconnected)
        .await;
}

async fn read_loop<R>(
    mut reader: R,
    mut handshake: Handshake,
    shared: Arc<Shared>,
    outbound: mpsc::Sender<Message>,
    buffer_size: usize,
) where
    R: AsyncRead + Unpin,
{
    tracing::debug!("read_loop started");
    let mut status = shared.status.subscribe();
    let mut decoder = Decoder::new();
    let mut buf = vec![0u8; buffer_size];

    let result: Result<(), ClientError> = async {
        loop {
            let n = tokio::select! {
                biased;
                _ = disconnected(&mut status) => return Ok(()),
                read = reader.read(&mut buf) => read?,
            };

            if n == 0 {
                tracing::debug!("read_loop: connection closed by peer");
                decoder.finish()?;
                return Err(ClientError::ConnectionClosed);
            }

            decoder.extend(&buf[..n]);
            while let Some(message) = decoder.decode_message()? {
                tokio::select! {
                    biased;
                    handled = handle_message(message, &mut handshake, &shared, &outbound) => handled?,
                    _ = disconnected(&mut status) => return Ok(()),
                }
            }
        }
    }
    .await;

    if let Err(e) = result {
        shared.fail(e);
    }
    tracing::debug!("read_loop finished");
}

/// Applies one inbound message: handshake first, then the entry table.
async fn handle_message(
    message: Message,
    handshake: &mut Handshake,
    shared: &Shared,
    outbound: &mpsc::Sender<Message>,
) -> Result<(), ClientError> {
    tracing::debug!("Received {}", message.message_type());

    if let Some(reply) = handshake.on_message(&message)? {
        outbound
            .send(reply)
            .await
            .map_err(|_| ClientError::ConnectionClosed)?;
    }
    if matches!(message, Message::ServerHello { .. }) {
        *shared.server.lock() = handshake.server().cloned();
    }
    shared.set_status(handshake.status());

    let table = &shared.table;
    match message {
        Message::EntryAssign(entry) => {
            tracing::debug!("Assign {} (id={}, seq={})", entry.name, entry.id, entry.sequence);
            table.upsert_from_assign(entry);
        }
        Message::EntryUpdate(update) => {
            let id = update.id;
            match table.apply_update(update) {
                UpdateOutcome::Applied => {}
                UpdateOutcome::UnknownId => {
                    tracing::debug!("Dropping update for unknown id {}", id);
                }
                UpdateOutcome::TypeMismatch { expected, actual } => {
                    tracing::warn!(
                        "Dropping update for id {}: type {} does not match {}",
                        id,
                        actual,
                        expected
                    );
                }
                UpdateOutcome::Stale { current, received } => {
                    tracing::debug!(
                        "Dropping stale update for id {} (seq {} behind {})",
                        id,
                        received,
                        current
                    );
                }
            }
        }
        Message::EntryFlagUpdate { id, flags } => {
            if !table.apply_flags(id, flags) {
                tracing::debug!("Dropping flag update for unknown id {}", id);
            }
        }
        Message::EntryDelete { id } => match table.apply_delete(id) {
            Some(name) => tracing::debug!("Deleted {}", name),
            None => tracing::debug!("Dropping delete for unknown id {}", id),
        },
        Message::ClearAllEntries { magic } => {
            if magic == CLEAR_ALL_MAGIC {
                let removed = table.clear_all();
                tracing::info!("Server cleared all entries ({} removed)", removed);
            } else {
                tracing::warn!("Ignoring ClearAllEntries with bad magic {:02x?}", magic);
            }
        }
        Message::RpcExec(call) | Message::RpcResponse(call) => {
            tracing::debug!(
                "Ignoring RPC frame for id {} (uid {}, {} bytes)",
                call.id,
                call.uid,
                call.body.len()
            );
        }
        _ => {}
    }
    Ok(())
}

async fn write_loop<W>(mut writer: W, mut outbound: mpsc::Receiver<Message>, shared: Arc<Shared>)
where
    W: AsyncWrite + Unpin,
{
    tracing::debug!("write_loop started");
    let mut status = shared.status.subscribe();

    // Ok(true): went down between messages, so the queue can still be drained
    let result: Result<bool, ClientError> = async {
        loop {
            let message = tokio::select! {
                biased;
                _ = disconnected(&mut status) => return Ok(true),
                message = outbound.recv() => match message {
                    Some(message) => message,
                    None => return Ok(false),
                },
            };

            tokio::select! {
                biased;
                written = write_message(&mut writer, &message, &shared) => written?,
                _ = disconnected(&mut status) => {
                    tracing::debug!("Abandoning {} mid-write", message.message_type());
                    return Ok(false);
                }
            }
        }
    }
    .await;

    match result {
        Ok(true) => drain(&mut writer, &mut outbound, &shared).await,
        Ok(false) => {}
        Err(e) => shared.fail(e),
    }
    if let Err(e) = writer.shutdown().await {
        tracing::debug!("Socket shutdown failed: {}", e);
    }
    tracing::debug!("write_loop finished");
}

async fn write_message<W>(writer: &mut W, message: &Message, shared: &Shared) -> Result<(), ClientError>
where
    W: AsyncWrite + Unpin,
{
    let encoded = Encoder::encode_message(message)?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    *shared.last_sent.lock() = Instant::now();
    tracing::debug!("Sent {} ({} bytes)", message.message_type(), encoded.len());
    Ok(())
}

/// Writes out whatever was queued before the connection went down.
async fn drain<W>(writer: &mut W, outbound: &mut mpsc::Receiver<Message>, shared: &Shared)
where
    W: AsyncWrite + Unpin,
{
    outbound.close();
    let flush_queued = async {
        let mut count = 0usize;
        while let Ok(message) = outbound.try_recv() {
            write_message(writer, &message, shared).await?;
            count += 1;
        }
        Ok::<usize, ClientError>(count)
    };

    match tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, flush_queued).await {
        Ok(Ok(0)) => {}
        Ok(Ok(count)) => tracing::debug!("Flushed {} queued messages", count),
        Ok(Err(e)) => tracing::debug!("Dropping queued messages: {}", e),
        Err(_) => tracing::debug!("Timed out flushing queued messages"),
    }
}

async fn keep_alive_loop(
    shared: Arc<Shared>,
    outbound: mpsc::Sender<Message>,
    interval: Duration,
) {
    let interval = interval.max(MIN_KEEP_ALIVE_INTERVAL);
    let mut status = shared.status.subscribe();
    let mut ticker = tokio::time::interval(MIN_KEEP_ALIVE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = disconnected(&mut status) => break,
            _ = ticker.tick() => {
                if shared.status() != ClientStatus::InSync {
                    continue;
                }
                let idle = shared.last_sent.lock().elapsed();
                if idle >= interval {
                    tracing::debug!("Idle for {:?}, sending KeepAlive", idle);
                    // A full queue already has traffic pending
                    if let Err(mpsc::error::TrySendError::Closed(_)) =
                        outbound.try_send(Message::KeepAlive)
                    {
                        break;
                    }
                }
            }
        }
    }
    tracing::debug!("keep_alive_loop finished");
}
