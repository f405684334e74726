//! # voxstack-rtp-core
//!
//! RTP/RTCP media transport for the voxstack stack: bit-exact RTP and RTCP
//! codecs, SDES- and DTLS-keyed SRTP protection, send/receive statistics
//! with jitter and MOS estimation, DSCP marking, and the [`RtpSession`]
//! media channel tying them together over a pair of UDP sockets.

pub mod dtls;
pub mod error;
pub mod packet;
pub mod qos;
pub mod session;
pub mod srtp;
pub mod stats;

pub use error::{Error, Result};
pub use packet::rtcp::{RtcpCompoundPacket, RtcpPacket};
pub use packet::{RtpHeader, RtpPacket};
pub use session::{RtpSession, RtpSessionConfig, RtpSessionEvent};
pub use srtp::{SrtpContext, SrtpCryptoKey, SrtpCryptoSuite, SrtpTransformer};

/// RTP synchronization source identifier
pub type RtpSsrc = u32;

/// RTP sequence number
pub type RtpSequenceNumber = u16;

/// RTP timestamp in sample-rate units
pub type RtpTimestamp = u32;

/// RTP contributing source identifier
pub type RtpCsrc = u32;

/// RTP protocol version (RFC 3550)
pub const RTP_VERSION: u8 = 2;

/// Fixed RTP header length in bytes
pub const RTP_MIN_HEADER_SIZE: usize = 12;
