//! TCP SIP channel.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ChannelConfig, STREAM_LISTEN_BACKLOG};
use crate::connection::{
    install_stream, spawn_prune_task, ConnectionRole, ConnectionTable, StreamContext,
};
use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent};

/// TCP transport for SIP messages.
///
/// Owns a listener task plus one reader/writer task pair per live
/// connection. Outgoing sends reuse a live connection when one exists,
/// otherwise start a connect attempt; attempts are de-duplicated per
/// destination and messages sent while connecting are queued onto the
/// attempt.
#[derive(Clone)]
pub struct TcpTransport {
    inner: Arc<StreamInner>,
}

pub(crate) struct StreamInner {
    pub local_addr: SocketAddr,
    pub table: Arc<ConnectionTable>,
    pub events_tx: mpsc::Sender<TransportEvent>,
    pub config: ChannelConfig,
    pub closed: AtomicBool,
    pub tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamInner {
    pub(crate) fn stream_context(&self) -> StreamContext {
        StreamContext {
            table: self.table.clone(),
            events_tx: self.events_tx.clone(),
            local_addr: self.local_addr,
            max_message_size: self.config.max_message_size,
        }
    }

    /// Reject sends to our own listening address
    pub(crate) fn check_self_connect(&self, destination: SocketAddr) -> Result<()> {
        let local = self.local_addr;
        let same_port = destination.port() == local.port();
        let self_directed = destination == local
            || (same_port && local.ip().is_unspecified() && destination.ip().is_loopback());
        if self_directed {
            Err(Error::SelfConnect(destination))
        } else {
            Ok(())
        }
    }

    pub(crate) async fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
        self.table.clear();
        let _ = self.events_tx.send(TransportEvent::Closed).await;
        true
    }
}

/// Bind a listening TCP socket with the SIP backlog via socket2
pub(crate) fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(STREAM_LISTEN_BACKLOG)?;
    Ok(TcpListener::from_std(socket.into())?)
}

/// Open an outgoing TCP connection from a random ephemeral local port
pub(crate) async fn connect_from_ephemeral(destination: SocketAddr) -> Result<TcpStream> {
    let (socket, local) = if destination.is_ipv4() {
        (TcpSocket::new_v4()?, "0.0.0.0:0".parse().unwrap())
    } else {
        (TcpSocket::new_v6()?, "[::]:0".parse().unwrap())
    };
    socket.bind(local)?;
    let stream = socket.connect(destination).await?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

impl TcpTransport {
    /// Bind a TCP channel to `addr`: starts the accept loop and the idle
    /// connection prune task
    pub async fn bind(
        addr: SocketAddr,
        config: ChannelConfig,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let (events_tx, events_rx) = mpsc::channel(config.channel_capacity);
        let listener = bind_listener(addr)?;
        let local_addr = listener.local_addr()?;
        info!("SIP TCP channel listening on {}", local_addr);

        let inner = Arc::new(StreamInner {
            local_addr,
            table: Arc::new(ConnectionTable::new()),
            events_tx: events_tx.clone(),
            config,
            closed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        });

        let accept_inner = inner.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        debug!(%peer, "Accepted TCP connection");
                        install_stream(
                            stream,
                            peer,
                            ConnectionRole::Listener,
                            None,
                            accept_inner.stream_context(),
                        );
                    }
                    Err(e) => {
                        if accept_inner.closed.load(Ordering::Relaxed) {
                            break;
                        }
                        warn!(error = %e, "TCP accept failed");
                    }
                }
            }
        });
        let prune_task = spawn_prune_task(
            inner.table.clone(),
            events_tx,
            inner.config.prune_initial_delay,
            inner.config.prune_interval,
            inner.config.prune_idle,
        );
        inner.tasks.lock().extend([accept_task, prune_task]);

        Ok((TcpTransport { inner }, events_rx))
    }

    /// Queue `bytes` for `destination`, connecting first when needed
    async fn send_or_connect(&self, bytes: Bytes, destination: SocketAddr) -> Result<()> {
        let inner = &self.inner;
        if let Some(writer) = inner.table.writer(destination) {
            if writer.send(bytes).await.is_ok() {
                return Ok(());
            }
            // The connection raced closed under us; fall through and treat
            // this like a fresh destination.
            inner.table.remove(destination);
            return Err(Error::ConnectFailed(destination));
        }

        if !inner.table.begin_connect(destination, bytes) {
            // Another send already owns the connect attempt; our message is
            // queued onto it.
            return Ok(());
        }

        let connect_inner = inner.clone();
        tokio::spawn(async move {
            match connect_from_ephemeral(destination).await {
                Ok(stream) => {
                    install_stream(
                        stream,
                        destination,
                        ConnectionRole::Caller,
                        None,
                        connect_inner.stream_context(),
                    );
                    flush_pending(&connect_inner, destination).await;
                }
                Err(e) => {
                    warn!(%destination, error = %e, "TCP connect failed");
                    let _ = connect_inner.table.take_pending(destination);
                    let _ = connect_inner
                        .events_tx
                        .send(TransportEvent::ConnectionFailed { destination })
                        .await;
                }
            }
        });
        Ok(())
    }
}

/// Push the messages queued during a connect attempt through the new
/// connection's writer
pub(crate) async fn flush_pending(inner: &StreamInner, destination: SocketAddr) {
    let queued = inner.table.take_pending(destination);
    if let Some(writer) = inner.table.writer(destination) {
        for message in queued {
            if writer.send(message).await.is_err() {
                break;
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    async fn send(&self, bytes: Bytes, destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        self.inner.check_self_connect(destination)?;
        self.send_or_connect(bytes, destination).await
    }

    fn is_reliable(&self) -> bool {
        true
    }

    fn is_connected(&self, peer: SocketAddr) -> bool {
        self.inner.table.is_connected(peer)
    }

    async fn close(&self) -> Result<()> {
        if self.inner.shutdown().await {
            info!("SIP TCP channel {} closed", self.inner.local_addr);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TcpTransport({})", self.inner.local_addr)
    }
}
