use bytes::{Buf, BufMut, BytesMut};

use super::report_block::RtcpReportBlock;
use crate::error::Error;
use crate::{Result, RtpSsrc};

/// RTCP Receiver Report (RR) packet
/// Defined in RFC 3550 Section 6.4.2
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpReceiverReport {
    /// SSRC of this receiver
    pub ssrc: RtpSsrc,

    /// Report blocks
    pub report_blocks: Vec<RtcpReportBlock>,
}

impl RtcpReceiverReport {
    /// Create a new receiver report
    pub fn new(ssrc: RtpSsrc) -> Self {
        Self {
            ssrc,
            report_blocks: Vec::new(),
        }
    }

    /// Add a report block
    pub fn add_report_block(&mut self, block: RtcpReportBlock) {
        self.report_blocks.push(block);
    }

    /// Body size in bytes (excluding the RTCP header)
    pub fn size(&self) -> usize {
        4 + self.report_blocks.len() * RtcpReportBlock::SIZE
    }

    /// Serialize the body (SSRC, report blocks)
    pub fn serialize(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u32(self.ssrc);
        for block in &self.report_blocks {
            block.serialize(buf)?;
        }
        Ok(())
    }

    /// Parse the body given the header's report count
    pub fn parse(buf: &mut impl Buf, report_count: u8) -> Result<Self> {
        if buf.remaining() < 4 {
            return Err(Error::BufferTooSmall {
                required: 4,
                available: buf.remaining(),
            });
        }
        let ssrc = buf.get_u32();
        let mut report_blocks = Vec::with_capacity(report_count as usize);
        for _ in 0..report_count {
            report_blocks.push(RtcpReportBlock::parse(buf)?);
        }
        Ok(Self {
            ssrc,
            report_blocks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut rr = RtcpReceiverReport::new(0x44556677);
        rr.add_report_block(RtcpReportBlock::new(0x12345678));
        rr.add_report_block(RtcpReportBlock::new(0x9abcdef0));

        let mut buf = BytesMut::new();
        rr.serialize(&mut buf).unwrap();
        assert_eq!(buf.len(), rr.size());

        let parsed = RtcpReceiverReport::parse(&mut buf.freeze(), 2).unwrap();
        assert_eq!(parsed, rr);
    }

    #[test]
    fn test_empty_rr() {
        let rr = RtcpReceiverReport::new(7);
        let mut buf = BytesMut::new();
        rr.serialize(&mut buf).unwrap();
        assert_eq!(buf.len(), 4);
    }
}
