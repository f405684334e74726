use std::net::SocketAddr;

use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the SIP transport layer.
///
/// Only the logic errors (`MessageTooLarge`, `SelfConnect`, `TransportClosed`)
/// surface to senders; transport-level read/write failures are handled inside
/// the channel by closing the affected connection.
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying socket I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Datagram exceeds the maximum UDP payload
    #[error("Message too large for UDP: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Attempted to connect to one of our own listening addresses
    #[error("Refusing to connect to local address {0}")]
    SelfConnect(SocketAddr),

    /// Outgoing connection attempt failed
    #[error("Connection to {0} failed")]
    ConnectFailed(SocketAddr),

    /// The transport has been closed
    #[error("Transport closed")]
    TransportClosed,

    /// TLS configuration or handshake failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// A stream peer sent more bytes than the framer allows without
    /// completing a message
    #[error("Stream framing overflow: {size} bytes without a complete message")]
    FramerOverflow { size: usize },

    /// Event channel closed or full
    #[error("Event channel error: {0}")]
    Channel(String),
}
