//! Send-side statistics: packet/octet counters and the RTP timestamp
//! snapshot RTCP sender reports are stamped with.

use crate::packet::RtpPacket;
use crate::RtpTimestamp;

/// Counters for one outgoing stream
#[derive(Debug, Default, Clone)]
pub struct SendStats {
    packets_sent: u32,
    octets_sent: u32,
    last_rtp_timestamp: RtpTimestamp,
}

impl SendStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sent packet
    pub fn on_packet(&mut self, packet: &RtpPacket) {
        self.packets_sent = self.packets_sent.wrapping_add(1);
        self.octets_sent = self.octets_sent.wrapping_add(packet.payload.len() as u32);
        self.last_rtp_timestamp = packet.header.timestamp;
    }

    /// Packets sent (32-bit, as carried in sender reports)
    pub fn packets_sent(&self) -> u32 {
        self.packets_sent
    }

    /// Payload octets sent (32-bit, as carried in sender reports)
    pub fn octets_sent(&self) -> u32 {
        self.octets_sent
    }

    /// RTP timestamp of the most recent packet
    pub fn last_rtp_timestamp(&self) -> RtpTimestamp {
        self.last_rtp_timestamp
    }
}
