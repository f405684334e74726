//! DSCP / QoS marking for media sockets.
//!
//! The 6-bit DSCP value occupies the top six bits of the IPv4 TOS byte or
//! the IPv6 Traffic Class, so the configured value is shifted left by two
//! when written to the socket.

use std::io;

use socket2::SockRef;
use tokio::net::UdpSocket;
use tracing::debug;

/// Kind of traffic a media session carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Audio,
    Video,
    /// Real-time text (RFC 4103)
    Text,
    /// Instant messaging media
    Message,
    /// Signaling traffic
    Signaling,
}

/// Default DSCP per media type (configurable at the session level)
pub fn default_dscp(media_type: MediaType) -> u8 {
    match media_type {
        MediaType::Audio => 0x0B,
        MediaType::Video => 0x0F,
        MediaType::Text | MediaType::Message => 0x07,
        MediaType::Signaling => 0x03,
    }
}

/// Write `dscp` into the socket's TOS byte / traffic class.
///
/// `dscp` is the 6-bit code point (0..=63).
pub fn mark_socket(socket: &UdpSocket, dscp: u8) -> io::Result<()> {
    let value = ((dscp & 0x3F) as u32) << 2;
    let sock = SockRef::from(socket);
    let result = if socket.local_addr()?.is_ipv4() {
        sock.set_tos(value)
    } else {
        sock.set_tclass_v6(value)
    };
    if result.is_ok() {
        debug!(dscp, "Marked media socket");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_code_points() {
        assert_eq!(default_dscp(MediaType::Audio), 0x0B);
        assert_eq!(default_dscp(MediaType::Video), 0x0F);
        assert_eq!(default_dscp(MediaType::Text), 0x07);
        assert_eq!(default_dscp(MediaType::Message), 0x07);
        assert_eq!(default_dscp(MediaType::Signaling), 0x03);
    }

    #[tokio::test]
    async fn test_mark_ipv4_socket() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        // TOS writes are permitted for unprivileged processes.
        mark_socket(&socket, default_dscp(MediaType::Audio)).unwrap();
        let tos = SockRef::from(&socket).tos().unwrap();
        assert_eq!(tos, (0x0B << 2) as u32);
    }
}
