//! RTP packet encoding and decoding (RFC 3550 §5.1).

pub mod rtcp;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Error;
use crate::{Result, RtpCsrc, RtpSequenceNumber, RtpSsrc, RtpTimestamp, RTP_MIN_HEADER_SIZE, RTP_VERSION};

/// RTP packet header
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       sequence number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           synchronization source (SSRC) identifier            |
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// |            contributing source (CSRC) identifiers             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    /// Protocol version, always 2
    pub version: u8,

    /// Padding flag: the payload ends with a padding trailer
    pub padding: bool,

    /// Extension flag: a header extension follows the CSRC list
    pub extension: bool,

    /// Number of CSRC identifiers (taken from the list length on
    /// serialization)
    pub cc: u8,

    /// Marker bit
    pub marker: bool,

    /// Payload type (7 bits)
    pub payload_type: u8,

    /// Sequence number
    pub sequence_number: RtpSequenceNumber,

    /// Timestamp in sample-rate units
    pub timestamp: RtpTimestamp,

    /// Synchronization source
    pub ssrc: RtpSsrc,

    /// Contributing sources
    pub csrc: Vec<RtpCsrc>,

    /// Header extension: (profile-defined id, extension words)
    pub extension_data: Option<(u16, Bytes)>,
}

impl RtpHeader {
    /// Create a header with the given identity fields
    pub fn new(
        payload_type: u8,
        sequence_number: RtpSequenceNumber,
        timestamp: RtpTimestamp,
        ssrc: RtpSsrc,
    ) -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            cc: 0,
            marker: false,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc: Vec::new(),
            extension_data: None,
        }
    }

    /// Serialized header length in bytes
    pub fn size(&self) -> usize {
        RTP_MIN_HEADER_SIZE
            + self.csrc.len() * 4
            + self
                .extension_data
                .as_ref()
                .map(|(_, data)| 4 + data.len())
                .unwrap_or(0)
    }

    /// Parse a header from the start of `buf`
    pub fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < RTP_MIN_HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                required: RTP_MIN_HEADER_SIZE,
                available: buf.remaining(),
            });
        }

        let first = buf.get_u8();
        let version = first >> 6;
        if version != RTP_VERSION {
            return Err(Error::InvalidVersion(version));
        }
        let padding = (first & 0x20) != 0;
        let extension = (first & 0x10) != 0;
        let cc = first & 0x0F;

        let second = buf.get_u8();
        let marker = (second & 0x80) != 0;
        let payload_type = second & 0x7F;

        let sequence_number = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        if buf.remaining() < cc as usize * 4 {
            return Err(Error::BufferTooSmall {
                required: cc as usize * 4,
                available: buf.remaining(),
            });
        }
        let mut csrc = Vec::with_capacity(cc as usize);
        for _ in 0..cc {
            csrc.push(buf.get_u32());
        }

        let extension_data = if extension {
            if buf.remaining() < 4 {
                return Err(Error::BufferTooSmall {
                    required: 4,
                    available: buf.remaining(),
                });
            }
            let profile_id = buf.get_u16();
            // Length is in 32-bit words, excluding the 4-byte extension header.
            let words = buf.get_u16() as usize;
            if buf.remaining() < words * 4 {
                return Err(Error::BufferTooSmall {
                    required: words * 4,
                    available: buf.remaining(),
                });
            }
            let data = buf.copy_to_bytes(words * 4);
            Some((profile_id, data))
        } else {
            None
        };

        Ok(Self {
            version,
            padding,
            extension,
            cc,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            extension_data,
        })
    }

    /// Serialize the header into `buf`
    pub fn serialize(&self, buf: &mut BytesMut) -> Result<()> {
        let cc = self.csrc.len() as u8;
        if cc > 15 {
            return Err(Error::InvalidPacket(format!("too many CSRCs: {}", cc)));
        }

        let mut first = (RTP_VERSION << 6) | (cc & 0x0F);
        if self.padding {
            first |= 0x20;
        }
        if self.extension_data.is_some() {
            first |= 0x10;
        }
        buf.put_u8(first);

        let mut second = self.payload_type & 0x7F;
        if self.marker {
            second |= 0x80;
        }
        buf.put_u8(second);

        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);

        for csrc in &self.csrc {
            buf.put_u32(*csrc);
        }

        if let Some((profile_id, data)) = &self.extension_data {
            if data.len() % 4 != 0 {
                return Err(Error::InvalidPacket(
                    "extension data must be a whole number of 32-bit words".to_string(),
                ));
            }
            buf.put_u16(*profile_id);
            buf.put_u16((data.len() / 4) as u16);
            buf.put_slice(data);
        }
        Ok(())
    }
}

/// A complete RTP packet: header plus payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// Packet header
    pub header: RtpHeader,

    /// Payload bytes (without padding)
    pub payload: Bytes,
}

impl RtpPacket {
    /// Create a packet from header fields and payload
    pub fn new(header: RtpHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Convenience constructor for an audio/video packet with no CSRCs
    pub fn new_with_payload(
        payload_type: u8,
        sequence_number: RtpSequenceNumber,
        timestamp: RtpTimestamp,
        ssrc: RtpSsrc,
        payload: Bytes,
    ) -> Self {
        Self {
            header: RtpHeader::new(payload_type, sequence_number, timestamp, ssrc),
            payload,
        }
    }

    /// Total serialized length in bytes
    pub fn size(&self) -> usize {
        self.header.size() + self.payload.len()
    }

    /// Parse a packet, stripping any padding trailer
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        let header = RtpHeader::parse(&mut buf)?;

        let mut payload_len = buf.remaining();
        if header.padding {
            if payload_len == 0 {
                return Err(Error::InvalidPacket("padding flag without payload".to_string()));
            }
            // Last padding byte holds the padding length, itself included.
            let pad = data[data.len() - 1] as usize;
            if pad == 0 || pad > payload_len {
                return Err(Error::InvalidPacket(format!("invalid padding length {}", pad)));
            }
            payload_len -= pad;
        }

        let payload = Bytes::copy_from_slice(&buf[..payload_len]);
        Ok(Self { header, payload })
    }

    /// Serialize to wire form
    pub fn serialize(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.size());
        self.header.serialize(&mut buf)?;
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_minimal() {
        let packet = RtpPacket::new_with_payload(
            0,
            0x0001,
            160,
            0x12345678,
            Bytes::from_static(&[0xAA; 20]),
        );
        let wire = packet.serialize().unwrap();
        assert_eq!(wire.len(), 12 + 20);
        let parsed = RtpPacket::parse(&wire).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_round_trip_with_csrcs_and_marker() {
        let mut header = RtpHeader::new(96, 1000, 48000, 0xdeadbeef);
        header.marker = true;
        header.csrc = vec![0x11111111, 0x22222222];
        let packet = RtpPacket::new(header, Bytes::from_static(b"payload"));

        let wire = packet.serialize().unwrap();
        assert_eq!(wire.len(), 12 + 2 * 4 + 7);
        let parsed = RtpPacket::parse(&wire).unwrap();
        assert!(parsed.header.marker);
        assert_eq!(parsed.header.csrc, vec![0x11111111, 0x22222222]);
        assert_eq!(&parsed.payload[..], b"payload");
    }

    #[test]
    fn test_round_trip_with_extension() {
        let mut header = RtpHeader::new(96, 7, 90000, 0xcafebabe);
        header.extension_data = Some((0xBEDE, Bytes::from_static(&[1, 2, 3, 4])));
        let packet = RtpPacket::new(header, Bytes::from_static(b"x"));
        let wire = packet.serialize().unwrap();
        let parsed = RtpPacket::parse(&wire).unwrap();
        assert_eq!(
            parsed.header.extension_data,
            Some((0xBEDE, Bytes::from_static(&[1, 2, 3, 4])))
        );
    }

    #[test]
    fn test_padding_stripped() {
        // Hand-built packet with P set and 4 bytes of padding.
        let mut wire = BytesMut::new();
        wire.put_u8((2 << 6) | 0x20);
        wire.put_u8(0);
        wire.put_u16(1);
        wire.put_u32(160);
        wire.put_u32(0x12345678);
        wire.put_slice(b"data");
        wire.put_slice(&[0, 0, 0, 4]);

        let parsed = RtpPacket::parse(&wire).unwrap();
        assert!(parsed.header.padding);
        assert_eq!(&parsed.payload[..], b"data");
    }

    #[test]
    fn test_wrong_version_rejected() {
        let mut wire = BytesMut::new();
        wire.put_u8(1 << 6);
        wire.put_slice(&[0; 11]);
        assert!(matches!(
            RtpPacket::parse(&wire),
            Err(Error::InvalidVersion(1))
        ));
    }

    #[test]
    fn test_truncated_rejected() {
        let packet =
            RtpPacket::new_with_payload(0, 1, 160, 0x12345678, Bytes::from_static(b"abc"));
        let wire = packet.serialize().unwrap();
        assert!(RtpPacket::parse(&wire[..8]).is_err());
    }

    #[test]
    fn test_invalid_padding_rejected() {
        let mut wire = BytesMut::new();
        wire.put_u8((2 << 6) | 0x20);
        wire.put_u8(0);
        wire.put_u16(1);
        wire.put_u32(160);
        wire.put_u32(0x12345678);
        wire.put_slice(&[9]); // padding length 9 > remaining
        assert!(RtpPacket::parse(&wire).is_err());
    }
}
