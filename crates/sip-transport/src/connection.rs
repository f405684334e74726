//! Live connection tracking for the stream channels (TCP/TLS).
//!
//! The table maps remote endpoints to their writer queues, tracks last
//! activity for pruning, and de-duplicates in-flight connect attempts. One
//! mutex guards both the connection map and the pending-connect set; it is
//! never held across I/O.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::framer::StreamFramer;
use crate::transport::TransportEvent;

/// Capacity of each connection's writer queue
const WRITER_QUEUE_CAPACITY: usize = 32;

/// How a stream connection came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// Accepted by our listener
    Listener,
    /// Opened by us
    Caller,
}

/// One live stream connection
struct ConnectionEntry {
    writer: mpsc::Sender<Bytes>,
    last_activity: Arc<Mutex<Instant>>,
    #[allow(dead_code)]
    role: ConnectionRole,
    peer_cert: Option<Vec<u8>>,
    read_task: Option<JoinHandle<()>>,
}

impl ConnectionEntry {
    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_activity.lock())
    }
}

#[derive(Default)]
struct TableInner {
    connections: HashMap<SocketAddr, ConnectionEntry>,
    /// Destinations with an outstanding connect attempt, plus messages
    /// queued while it completes
    pending: HashMap<SocketAddr, Vec<Bytes>>,
}

/// Endpoint-keyed table of live connections and in-flight connects
pub struct ConnectionTable {
    inner: Mutex<TableInner>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TableInner::default()),
        }
    }

    /// Whether a live connection to `peer` exists
    pub fn is_connected(&self, peer: SocketAddr) -> bool {
        self.inner.lock().connections.contains_key(&peer)
    }

    /// Writer queue for `peer`, if connected
    pub fn writer(&self, peer: SocketAddr) -> Option<mpsc::Sender<Bytes>> {
        self.inner.lock().connections.get(&peer).map(|e| e.writer.clone())
    }

    /// Peer certificate captured at handshake time (TLS only)
    pub fn peer_certificate(&self, peer: SocketAddr) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .connections
            .get(&peer)
            .and_then(|e| e.peer_cert.clone())
    }

    /// Register an outgoing connect attempt for `dest`.
    ///
    /// Returns `true` when the caller owns the new attempt; `false` when one
    /// is already outstanding, in which case `message` was queued onto it.
    pub fn begin_connect(&self, dest: SocketAddr, message: Bytes) -> bool {
        let mut inner = self.inner.lock();
        match inner.pending.get_mut(&dest) {
            Some(queue) => {
                queue.push(message);
                false
            }
            None => {
                inner.pending.insert(dest, vec![message]);
                true
            }
        }
    }

    /// Take the messages queued while connecting to `dest`, ending the
    /// pending state
    pub fn take_pending(&self, dest: SocketAddr) -> Vec<Bytes> {
        self.inner.lock().pending.remove(&dest).unwrap_or_default()
    }

    /// Remove `peer` from the table, returning whether it was present.
    ///
    /// Aborts the connection's read task; the writer queue closes when the
    /// entry drops, which ends the writer task and closes the socket. Never
    /// call this from the read task itself (aborting the calling task cuts
    /// it off at its next await); that path uses [`remove_self`].
    ///
    /// [`remove_self`]: ConnectionTable::remove_self
    pub fn remove(&self, peer: SocketAddr) -> bool {
        let entry = self.inner.lock().connections.remove(&peer);
        match entry {
            Some(entry) => {
                if let Some(handle) = entry.read_task {
                    handle.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Removal performed by a connection's own read task as it exits: drops
    /// the entry without aborting the (already finishing) reader.
    pub fn remove_self(&self, peer: SocketAddr) -> bool {
        self.inner.lock().connections.remove(&peer).is_some()
    }

    /// Peers idle longer than `max_idle`
    pub fn idle_peers(&self, max_idle: Duration) -> Vec<SocketAddr> {
        let now = Instant::now();
        self.inner
            .lock()
            .connections
            .iter()
            .filter(|(_, e)| e.idle_for(now) > max_idle)
            .map(|(peer, _)| *peer)
            .collect()
    }

    /// All currently connected peers
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.inner.lock().connections.keys().copied().collect()
    }

    /// Drop every connection, aborting their read tasks
    pub fn clear(&self) {
        let entries: Vec<_> = {
            let mut inner = self.inner.lock();
            inner.pending.clear();
            inner.connections.drain().collect()
        };
        for (_, entry) in entries {
            if let Some(handle) = entry.read_task {
                handle.abort();
            }
        }
    }

    fn insert(&self, peer: SocketAddr, entry: ConnectionEntry) {
        self.inner.lock().connections.insert(peer, entry);
    }

    fn set_read_task(&self, peer: SocketAddr, handle: JoinHandle<()>) {
        let mut inner = self.inner.lock();
        match inner.connections.get_mut(&peer) {
            Some(entry) => entry.read_task = Some(handle),
            // The connection died before the handle landed; stop the reader.
            None => handle.abort(),
        }
    }
}

/// Shared context handed to the per-connection tasks
#[derive(Clone)]
pub(crate) struct StreamContext {
    pub table: Arc<ConnectionTable>,
    pub events_tx: mpsc::Sender<TransportEvent>,
    pub local_addr: SocketAddr,
    pub max_message_size: usize,
}

/// Install a freshly established stream connection into the table and spawn
/// its reader and writer tasks.
///
/// The reader feeds the SIP framer and emits one `MessageReceived` per
/// complete message, in arrival order. Either task removes the connection on
/// failure and emits `ConnectionClosed` exactly once (removal is the tie
/// break).
pub(crate) fn install_stream<S>(
    stream: S,
    peer: SocketAddr,
    role: ConnectionRole,
    peer_cert: Option<Vec<u8>>,
    ctx: StreamContext,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (writer_tx, mut writer_rx) = mpsc::channel::<Bytes>(WRITER_QUEUE_CAPACITY);
    let last_activity = Arc::new(Mutex::new(Instant::now()));

    ctx.table.insert(
        peer,
        ConnectionEntry {
            writer: writer_tx,
            last_activity: last_activity.clone(),
            role,
            peer_cert,
            read_task: None,
        },
    );
    debug!(%peer, ?role, "Stream connection installed");

    // Writer task: drains the queue. The queue closes when the table entry
    // drops, which ends this task and releases the write half.
    let writer_ctx = ctx.clone();
    let writer_activity = last_activity.clone();
    tokio::spawn(async move {
        while let Some(bytes) = writer_rx.recv().await {
            if let Err(e) = writer.write_all(&bytes).await {
                warn!(%peer, error = %e, "Stream write failed, closing connection");
                if writer_ctx.table.remove(peer) {
                    let _ = writer_ctx
                        .events_tx
                        .send(TransportEvent::ConnectionClosed { peer })
                        .await;
                }
                return;
            }
            *writer_activity.lock() = Instant::now();
            trace!(%peer, len = bytes.len(), "Stream write complete");
        }
        let _ = writer.shutdown().await;
    });

    // Reader task: blocks on the socket, frames SIP messages, surfaces them
    // in arrival order.
    let read_ctx = ctx.clone();
    let handle = tokio::spawn(async move {
        let mut framer = StreamFramer::new(read_ctx.max_message_size);
        let mut buf = vec![0u8; 8192];
        let closed_reason = loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break "peer closed",
                Ok(n) => n,
                Err(e) => {
                    debug!(%peer, error = %e, "Stream read failed");
                    break "read error";
                }
            };
            *last_activity.lock() = Instant::now();
            framer.extend(&buf[..n]);
            loop {
                match framer.next_message() {
                    Ok(Some(message)) => {
                        let event = TransportEvent::MessageReceived {
                            bytes: message,
                            source: peer,
                            destination: read_ctx.local_addr,
                        };
                        if read_ctx.events_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(%peer, error = %e, "Stream framing failed, closing connection");
                        // Poisoned stream; drop the connection.
                        if read_ctx.table.remove_self(peer) {
                            let _ = read_ctx
                                .events_tx
                                .send(TransportEvent::ConnectionClosed { peer })
                                .await;
                        }
                        return;
                    }
                }
            }
        };
        debug!(%peer, reason = closed_reason, "Stream connection ended");
        if read_ctx.table.remove_self(peer) {
            let _ = read_ctx
                .events_tx
                .send(TransportEvent::ConnectionClosed { peer })
                .await;
        }
    });
    ctx.table.set_read_task(peer, handle);
}

/// Periodic prune of idle connections.
pub(crate) fn spawn_prune_task(
    table: Arc<ConnectionTable>,
    events_tx: mpsc::Sender<TransportEvent>,
    initial_delay: Duration,
    interval: Duration,
    max_idle: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(initial_delay).await;
        loop {
            for peer in table.idle_peers(max_idle) {
                debug!(%peer, "Pruning idle connection");
                if table.remove(peer) {
                    let _ = events_tx.send(TransportEvent::ConnectionClosed { peer }).await;
                }
            }
            tokio::time::sleep(interval).await;
        }
    })
}
