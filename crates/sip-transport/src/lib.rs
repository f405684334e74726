//! SIP transport layer for the voxstack stack.
//!
//! This crate provides the channel abstraction the signaling core runs on:
//! UDP, TCP and TLS transports behind one [`Transport`] trait, stream framing
//! by header terminator plus Content-Length, live connection tracking with
//! idle pruning, and an event channel surfacing complete SIP messages in
//! arrival order.

pub mod config;
pub mod connection;
pub mod error;
pub mod framer;
pub mod transport;

pub use config::{ChannelConfig, MAX_SIP_MESSAGE_SIZE, MAX_UDP_PAYLOAD};
pub use connection::{ConnectionRole, ConnectionTable};
pub use error::{Error, Result};
pub use framer::StreamFramer;
pub use transport::tcp::TcpTransport;
pub use transport::tls::{CertificateAcceptor, TlsSettings, TlsTransport};
pub use transport::udp::{SourceAcceptor, UdpTransport};
pub use transport::{Transport, TransportEvent};

/// Bind a UDP channel with default configuration
pub async fn bind_udp(
    addr: std::net::SocketAddr,
) -> Result<(UdpTransport, tokio::sync::mpsc::Receiver<TransportEvent>)> {
    UdpTransport::bind(addr, ChannelConfig::default()).await
}

/// Bind a TCP channel with default configuration
pub async fn bind_tcp(
    addr: std::net::SocketAddr,
) -> Result<(TcpTransport, tokio::sync::mpsc::Receiver<TransportEvent>)> {
    TcpTransport::bind(addr, ChannelConfig::default()).await
}

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        bind_tcp, bind_udp, ChannelConfig, Error, Result, StreamFramer, TcpTransport,
        TlsSettings, TlsTransport, Transport, TransportEvent, UdpTransport,
    };
}
