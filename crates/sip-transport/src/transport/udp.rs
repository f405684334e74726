//! UDP SIP channel.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use parking_lot::Mutex;

use crate::config::{ChannelConfig, MAX_UDP_PAYLOAD};
use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent};

/// Predicate consulted per datagram source; sources it rejects are
/// dropped before any processing
pub type SourceAcceptor = Arc<dyn Fn(SocketAddr) -> bool + Send + Sync>;

/// UDP transport for SIP messages.
///
/// One datagram socket; a dedicated receive task surfaces each non-empty
/// datagram as one `MessageReceived` event.
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpInner>,
}

struct UdpInner {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    closed: AtomicBool,
    events_tx: mpsc::Sender<TransportEvent>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
    accept_source: Option<SourceAcceptor>,
}

impl UdpTransport {
    /// Bind a UDP channel to `addr` and start its receive task
    pub async fn bind(
        addr: SocketAddr,
        config: ChannelConfig,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        Self::bind_filtered(addr, config, None).await
    }

    /// Bind with a source-acceptance predicate
    pub async fn bind_filtered(
        addr: SocketAddr,
        config: ChannelConfig,
        accept_source: Option<SourceAcceptor>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let (events_tx, events_rx) = mpsc::channel(config.channel_capacity);

        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let local_addr = socket.local_addr()?;
        info!("SIP UDP channel bound to {}", local_addr);

        let transport = UdpTransport {
            inner: Arc::new(UdpInner {
                socket,
                local_addr,
                closed: AtomicBool::new(false),
                events_tx: events_tx.clone(),
                receive_task: Mutex::new(None),
                accept_source,
            }),
        };
        transport.spawn_receive_loop();

        Ok((transport, events_rx))
    }

    fn spawn_receive_loop(&self) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            // Large enough for the biggest datagram the kernel will hand us.
            let mut buf = vec![0u8; 65535];
            while !inner.closed.load(Ordering::Relaxed) {
                let (len, source) = match inner.socket.recv_from(&mut buf).await {
                    Ok(pair) => pair,
                    Err(e) => {
                        if inner.closed.load(Ordering::Relaxed) {
                            break;
                        }
                        // Windows surfaces ICMP port-unreachable as a
                        // connection reset on the next receive; keep going.
                        if e.kind() == std::io::ErrorKind::ConnectionReset {
                            trace!("Ignoring connection reset on UDP receive");
                            continue;
                        }
                        warn!(error = %e, "UDP receive failed");
                        continue;
                    }
                };
                if len == 0 {
                    trace!(%source, "Dropping zero-length datagram");
                    continue;
                }
                if let Some(accept) = &inner.accept_source {
                    if !accept(source) {
                        trace!(%source, "Source rejected by accept predicate");
                        continue;
                    }
                }
                debug!(%source, len, "Received datagram");
                let event = TransportEvent::MessageReceived {
                    bytes: Bytes::copy_from_slice(&buf[..len]),
                    source,
                    destination: inner.local_addr,
                };
                if inner.events_tx.send(event).await.is_err() {
                    break;
                }
            }
            let _ = inner.events_tx.send(TransportEvent::Closed).await;
            debug!("UDP receive loop terminated");
        });
        *self.inner.receive_task.lock() = Some(handle);
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    async fn send(&self, bytes: Bytes, destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        if bytes.len() > MAX_UDP_PAYLOAD {
            return Err(Error::MessageTooLarge {
                size: bytes.len(),
                max: MAX_UDP_PAYLOAD,
            });
        }
        trace!(%destination, len = bytes.len(), "Sending datagram");
        self.inner.socket.send_to(&bytes, destination).await?;
        Ok(())
    }

    fn is_reliable(&self) -> bool {
        false
    }

    fn is_connected(&self, _peer: SocketAddr) -> bool {
        // Datagram channels are connectionless; any peer is reachable.
        true
    }

    async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(handle) = self.inner.receive_task.lock().take() {
            handle.abort();
        }
        let _ = self.inner.events_tx.send(TransportEvent::Closed).await;
        info!("SIP UDP channel {} closed", self.inner.local_addr);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UdpTransport({})", self.inner.local_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn bind_pair() -> (UdpTransport, mpsc::Receiver<TransportEvent>) {
        UdpTransport::bind("127.0.0.1:0".parse().unwrap(), ChannelConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_send_receive() {
        let (a, _a_rx) = bind_pair().await;
        let (b, mut b_rx) = bind_pair().await;
        let dest = b.local_addr().unwrap();

        a.send(Bytes::from_static(b"OPTIONS sip:x SIP/2.0\r\n\r\n"), dest)
            .await
            .unwrap();

        match b_rx.recv().await.unwrap() {
            TransportEvent::MessageReceived { bytes, source, destination } => {
                assert!(bytes.starts_with(b"OPTIONS"));
                assert_eq!(source, a.local_addr().unwrap());
                assert_eq!(destination, dest);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversize_send_rejected() {
        let (a, _rx) = bind_pair().await;
        let oversized = Bytes::from(vec![b'x'; MAX_UDP_PAYLOAD + 1]);
        match a.send(oversized, a.local_addr().unwrap()).await {
            Err(Error::MessageTooLarge { size, max }) => {
                assert_eq!(size, MAX_UDP_PAYLOAD + 1);
                assert_eq!(max, MAX_UDP_PAYLOAD);
            }
            other => panic!("expected MessageTooLarge, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (a, mut rx) = bind_pair().await;
        a.close().await.unwrap();
        a.close().await.unwrap();
        assert!(a.is_closed());
        assert!(a
            .send(Bytes::from_static(b"x"), a.local_addr().unwrap())
            .await
            .is_err());
        // The Closed event is delivered.
        loop {
            match rx.recv().await {
                Some(TransportEvent::Closed) => break,
                Some(_) => continue,
                None => panic!("channel ended without Closed event"),
            }
        }
    }

    #[tokio::test]
    async fn test_udp_always_connected() {
        let (a, _rx) = bind_pair().await;
        assert!(a.is_connected("203.0.113.9:5060".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_source_predicate_filters_datagrams() {
        let (a, _a_rx) = bind_pair().await;
        let (b, mut b_rx) = UdpTransport::bind_filtered(
            "127.0.0.1:0".parse().unwrap(),
            ChannelConfig::default(),
            Some(Arc::new(|_source: SocketAddr| false)),
        )
        .await
        .unwrap();
        let dest = b.local_addr().unwrap();

        a.send(Bytes::from_static(b"OPTIONS sip:x SIP/2.0\r\n\r\n"), dest)
            .await
            .unwrap();
        let outcome =
            tokio::time::timeout(std::time::Duration::from_millis(300), b_rx.recv()).await;
        assert!(outcome.is_err(), "rejected source must not surface messages");
    }
}
