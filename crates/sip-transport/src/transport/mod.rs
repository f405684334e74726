//! Channel abstraction shared by the UDP, TCP and TLS transports.

pub mod tcp;
pub mod tls;
pub mod udp;

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::error::Result;

/// Events surfaced by a channel to its consumer.
///
/// One `MessageReceived` is emitted per complete SIP message; the dispatcher
/// parses the bytes. Events from one peer are always delivered in arrival
/// order.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A complete SIP message arrived
    MessageReceived {
        /// Raw message bytes (one datagram, or one framed stream message)
        bytes: Bytes,
        /// Peer the message came from
        source: SocketAddr,
        /// Local address it arrived on
        destination: SocketAddr,
    },

    /// An outgoing connection attempt failed
    ConnectionFailed {
        /// The destination that could not be reached
        destination: SocketAddr,
    },

    /// A live stream connection closed (peer disconnect, error, or prune)
    ConnectionClosed {
        /// The remote endpoint of the closed connection
        peer: SocketAddr,
    },

    /// The channel itself shut down
    Closed,
}

/// Polymorphic SIP channel: UDP, TCP or TLS.
///
/// Channels own their sockets and their receive tasks. `send` must not block
/// the caller on network I/O under nominal conditions; stream channels queue
/// writes to a per-connection writer task.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Local address the channel is bound to
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Send one SIP message to `destination`
    async fn send(&self, bytes: Bytes, destination: SocketAddr) -> Result<()>;

    /// Whether this transport retransmits for us (TCP/TLS yes, UDP no)
    fn is_reliable(&self) -> bool;

    /// Whether the transport is encrypted (TLS only)
    fn is_secure(&self) -> bool {
        false
    }

    /// Whether a live connection to `peer` exists. Always `true` for UDP.
    fn is_connected(&self, peer: SocketAddr) -> bool;

    /// DER-encoded certificate presented by `peer`, when the transport is
    /// TLS and the handshake completed
    fn peer_certificate(&self, _peer: SocketAddr) -> Option<Vec<u8>> {
        None
    }

    /// Shut the channel down. Idempotent; unblocks receive tasks and emits
    /// a final `Closed` event.
    async fn close(&self) -> Result<()>;

    /// Whether `close` has been called
    fn is_closed(&self) -> bool;
}
