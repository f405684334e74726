//! RTCP packet types and the compound packet codec (RFC 3550 §6).

pub mod bye;
pub mod ntp;
pub mod receiver_report;
pub mod report_block;
pub mod sdes;
pub mod sender_report;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::Error;
use crate::Result;

pub use bye::RtcpGoodbye;
pub use ntp::NtpTimestamp;
pub use receiver_report::RtcpReceiverReport;
pub use report_block::RtcpReportBlock;
pub use sdes::{RtcpSdes, RtcpSdesChunk, RtcpSdesItem, SdesItemType};
pub use sender_report::RtcpSenderReport;

/// RTCP version (same as RTP, always 2)
pub const RTCP_VERSION: u8 = 2;

/// RTCP packet types as defined in RFC 3550
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RtcpPacketType {
    /// Sender Report (SR)
    SenderReport = 200,

    /// Receiver Report (RR)
    ReceiverReport = 201,

    /// Source Description (SDES)
    SourceDescription = 202,

    /// Goodbye (BYE)
    Goodbye = 203,

    /// Application-Defined (APP)
    ApplicationDefined = 204,
}

impl TryFrom<u8> for RtcpPacketType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            200 => Ok(RtcpPacketType::SenderReport),
            201 => Ok(RtcpPacketType::ReceiverReport),
            202 => Ok(RtcpPacketType::SourceDescription),
            203 => Ok(RtcpPacketType::Goodbye),
            204 => Ok(RtcpPacketType::ApplicationDefined),
            _ => Err(Error::RtcpError(format!("Unknown RTCP packet type: {}", value))),
        }
    }
}

/// Any supported RTCP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    SenderReport(RtcpSenderReport),
    ReceiverReport(RtcpReceiverReport),
    SourceDescription(RtcpSdes),
    Goodbye(RtcpGoodbye),
}

impl RtcpPacket {
    /// The count field for the packet header (RC or SC)
    fn count(&self) -> u8 {
        match self {
            RtcpPacket::SenderReport(sr) => sr.report_blocks.len() as u8,
            RtcpPacket::ReceiverReport(rr) => rr.report_blocks.len() as u8,
            RtcpPacket::SourceDescription(sdes) => sdes.chunks.len() as u8,
            RtcpPacket::Goodbye(bye) => bye.ssrcs.len() as u8,
        }
    }

    /// Body size (excluding the 4-byte header)
    fn body_size(&self) -> usize {
        match self {
            RtcpPacket::SenderReport(sr) => sr.size(),
            RtcpPacket::ReceiverReport(rr) => rr.size(),
            RtcpPacket::SourceDescription(sdes) => sdes.size(),
            RtcpPacket::Goodbye(bye) => bye.size(),
        }
    }

    fn packet_type(&self) -> RtcpPacketType {
        match self {
            RtcpPacket::SenderReport(_) => RtcpPacketType::SenderReport,
            RtcpPacket::ReceiverReport(_) => RtcpPacketType::ReceiverReport,
            RtcpPacket::SourceDescription(_) => RtcpPacketType::SourceDescription,
            RtcpPacket::Goodbye(_) => RtcpPacketType::Goodbye,
        }
    }

    /// Whether this packet may open a compound packet
    pub fn is_report(&self) -> bool {
        matches!(
            self,
            RtcpPacket::SenderReport(_) | RtcpPacket::ReceiverReport(_)
        )
    }

    /// Serialize header plus body into `buf`
    pub fn serialize(&self, buf: &mut BytesMut) -> Result<()> {
        let body_size = self.body_size();
        if body_size % 4 != 0 {
            return Err(Error::RtcpError(format!(
                "RTCP body not 32-bit aligned: {} bytes",
                body_size
            )));
        }
        if self.count() > 31 {
            return Err(Error::RtcpError("RTCP count field exceeds 5 bits".to_string()));
        }

        buf.put_u8((RTCP_VERSION << 6) | self.count());
        buf.put_u8(self.packet_type() as u8);
        // Length in 32-bit words, minus one for the header word.
        buf.put_u16((body_size / 4) as u16);
        match self {
            RtcpPacket::SenderReport(sr) => sr.serialize(buf),
            RtcpPacket::ReceiverReport(rr) => rr.serialize(buf),
            RtcpPacket::SourceDescription(sdes) => sdes.serialize(buf),
            RtcpPacket::Goodbye(bye) => bye.serialize(buf),
        }
    }
}

/// A compound RTCP packet: several RTCP packets back to back in one
/// datagram. Transmitted compounds start with an SR or RR.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RtcpCompoundPacket {
    /// Contained packets, in wire order
    pub packets: Vec<RtcpPacket>,
}

impl RtcpCompoundPacket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a compound packet with its opening report
    pub fn with_report(report: RtcpPacket) -> Self {
        Self {
            packets: vec![report],
        }
    }

    /// Append a packet
    pub fn push(&mut self, packet: RtcpPacket) {
        self.packets.push(packet);
    }

    /// First sender report, if any
    pub fn sender_report(&self) -> Option<&RtcpSenderReport> {
        self.packets.iter().find_map(|p| match p {
            RtcpPacket::SenderReport(sr) => Some(sr),
            _ => None,
        })
    }

    /// First source description, if any
    pub fn sdes(&self) -> Option<&RtcpSdes> {
        self.packets.iter().find_map(|p| match p {
            RtcpPacket::SourceDescription(sdes) => Some(sdes),
            _ => None,
        })
    }

    /// Whether the compound obeys the SR/RR-first transmission rule
    pub fn starts_with_report(&self) -> bool {
        self.packets.first().is_some_and(|p| p.is_report())
    }

    /// Parse a compound packet from one datagram.
    ///
    /// Advances packet by packet using the length field; parsing stops
    /// without error at the first unknown packet type.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut packets = Vec::new();
        let mut offset = 0usize;

        while data.len() - offset >= 4 {
            let header = &data[offset..];
            let version = header[0] >> 6;
            if version != RTCP_VERSION {
                return Err(Error::InvalidVersion(version));
            }
            let count = header[0] & 0x1F;
            let packet_type = header[1];
            let length_words = u16::from_be_bytes([header[2], header[3]]) as usize;
            let total = (length_words + 1) * 4;
            if data.len() - offset < total {
                return Err(Error::BufferTooSmall {
                    required: total,
                    available: data.len() - offset,
                });
            }

            let mut body = &data[offset + 4..offset + total];
            let packet = match RtcpPacketType::try_from(packet_type) {
                Ok(RtcpPacketType::SenderReport) => {
                    RtcpPacket::SenderReport(RtcpSenderReport::parse(&mut body, count)?)
                }
                Ok(RtcpPacketType::ReceiverReport) => {
                    RtcpPacket::ReceiverReport(RtcpReceiverReport::parse(&mut body, count)?)
                }
                Ok(RtcpPacketType::SourceDescription) => {
                    RtcpPacket::SourceDescription(RtcpSdes::parse(&mut body, count)?)
                }
                Ok(RtcpPacketType::Goodbye) => {
                    RtcpPacket::Goodbye(RtcpGoodbye::parse(&mut body, count)?)
                }
                // Unknown or unsupported type ends the walk.
                _ => break,
            };
            packets.push(packet);
            offset += total;
        }

        if packets.is_empty() {
            return Err(Error::RtcpError("no RTCP packets in datagram".to_string()));
        }
        Ok(Self { packets })
    }

    /// Serialize all packets back to back
    pub fn serialize(&self) -> Result<Bytes> {
        let size: usize = self.packets.iter().map(|p| 4 + p.body_size()).sum();
        let mut buf = BytesMut::with_capacity(size);
        for packet in &self.packets {
            packet.serialize(&mut buf)?;
        }
        Ok(buf.freeze())
    }
}
