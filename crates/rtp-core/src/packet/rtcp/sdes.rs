//! RTCP Source Description (SDES) packet (RFC 3550 §6.5).
//!
//! An SDES packet is a list of chunks, one per source. Each chunk is the
//! SSRC, a sequence of (type, length, text) items, a null terminator, and
//! zero padding up to the next 32-bit boundary. When the item list ends
//! exactly on a boundary the terminator still goes out, followed by three
//! more padding zeros.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::Error;
use crate::{Result, RtpSsrc};

/// SDES item types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SdesItemType {
    /// Canonical end-point identifier (mandatory)
    Cname = 1,
    /// User name
    Name = 2,
    /// Email address
    Email = 3,
    /// Phone number
    Phone = 4,
    /// Geographic location
    Location = 5,
    /// Application or tool name
    Tool = 6,
    /// Notice/status
    Note = 7,
    /// Private extension
    Private = 8,
}

/// One SDES item: a typed UTF-8 string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpSdesItem {
    /// Item type (see [`SdesItemType`])
    pub item_type: u8,
    /// Item text, at most 255 bytes
    pub text: String,
}

impl RtcpSdesItem {
    /// Create a CNAME item
    pub fn cname(text: impl Into<String>) -> Self {
        Self {
            item_type: SdesItemType::Cname as u8,
            text: text.into(),
        }
    }

    /// Create a TOOL item
    pub fn tool(text: impl Into<String>) -> Self {
        Self {
            item_type: SdesItemType::Tool as u8,
            text: text.into(),
        }
    }
}

/// One SDES chunk: an SSRC and its items
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpSdesChunk {
    /// Source this chunk describes
    pub ssrc: RtpSsrc,
    /// Items, in order
    pub items: Vec<RtcpSdesItem>,
}

impl RtcpSdesChunk {
    pub fn new(ssrc: RtpSsrc) -> Self {
        Self {
            ssrc,
            items: Vec::new(),
        }
    }

    /// Serialized chunk size including terminator and padding
    pub fn size(&self) -> usize {
        let items: usize = self.items.iter().map(|i| 2 + i.text.len()).sum();
        // SSRC + items + terminator, rounded up to a 32-bit boundary.
        let unpadded = 4 + items + 1;
        (unpadded + 3) & !3
    }
}

/// RTCP Source Description packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpSdes {
    /// Chunks, one per described source
    pub chunks: Vec<RtcpSdesChunk>,
}

impl RtcpSdes {
    pub fn new() -> Self {
        Self { chunks: Vec::new() }
    }

    /// Convenience constructor for the common one-source CNAME packet
    pub fn with_cname(ssrc: RtpSsrc, cname: impl Into<String>) -> Self {
        let mut chunk = RtcpSdesChunk::new(ssrc);
        chunk.items.push(RtcpSdesItem::cname(cname));
        Self {
            chunks: vec![chunk],
        }
    }

    /// First CNAME item across all chunks, if any
    pub fn cname(&self) -> Option<&str> {
        self.chunks.iter().find_map(|chunk| {
            chunk
                .items
                .iter()
                .find(|item| item.item_type == SdesItemType::Cname as u8)
                .map(|item| item.text.as_str())
        })
    }

    /// Body size in bytes (excluding the RTCP header)
    pub fn size(&self) -> usize {
        self.chunks.iter().map(|c| c.size()).sum()
    }

    /// Serialize all chunks
    pub fn serialize(&self, buf: &mut BytesMut) -> Result<()> {
        for chunk in &self.chunks {
            if chunk.items.iter().any(|i| i.text.len() > 255) {
                return Err(Error::RtcpError("SDES item longer than 255 bytes".to_string()));
            }
            let start = buf.len();
            buf.put_u32(chunk.ssrc);
            for item in &chunk.items {
                buf.put_u8(item.item_type);
                buf.put_u8(item.text.len() as u8);
                buf.put_slice(item.text.as_bytes());
            }
            // Terminator, then pad to the 32-bit boundary.
            buf.put_u8(0);
            while (buf.len() - start) % 4 != 0 {
                buf.put_u8(0);
            }
        }
        Ok(())
    }

    /// Parse the body given the header's source count
    pub fn parse(buf: &mut impl Buf, source_count: u8) -> Result<Self> {
        let mut chunks = Vec::with_capacity(source_count as usize);
        for _ in 0..source_count {
            if buf.remaining() < 4 {
                return Err(Error::BufferTooSmall {
                    required: 4,
                    available: buf.remaining(),
                });
            }
            let ssrc = buf.get_u32();
            let mut chunk = RtcpSdesChunk::new(ssrc);
            let mut consumed = 4usize;
            loop {
                if buf.remaining() < 1 {
                    return Err(Error::RtcpError("unterminated SDES chunk".to_string()));
                }
                let item_type = buf.get_u8();
                consumed += 1;
                if item_type == 0 {
                    // Skip padding to the 32-bit boundary.
                    while consumed % 4 != 0 {
                        if buf.remaining() < 1 {
                            return Err(Error::RtcpError("truncated SDES padding".to_string()));
                        }
                        buf.get_u8();
                        consumed += 1;
                    }
                    break;
                }
                if buf.remaining() < 1 {
                    return Err(Error::RtcpError("truncated SDES item".to_string()));
                }
                let len = buf.get_u8() as usize;
                consumed += 1;
                if buf.remaining() < len {
                    return Err(Error::BufferTooSmall {
                        required: len,
                        available: buf.remaining(),
                    });
                }
                let raw = buf.copy_to_bytes(len);
                consumed += len;
                let text = String::from_utf8(raw.to_vec())
                    .map_err(|_| Error::RtcpError("SDES item is not UTF-8".to_string()))?;
                chunk.items.push(RtcpSdesItem { item_type, text });
            }
            chunks.push(chunk);
        }
        Ok(Self { chunks })
    }
}

impl Default for RtcpSdes {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cname_round_trip() {
        let sdes = RtcpSdes::with_cname(0x12345678, "alice@198.51.100.1");
        let mut buf = BytesMut::new();
        sdes.serialize(&mut buf).unwrap();
        assert_eq!(buf.len(), sdes.size());
        assert_eq!(buf.len() % 4, 0);

        let parsed = RtcpSdes::parse(&mut buf.freeze(), 1).unwrap();
        assert_eq!(parsed, sdes);
        assert_eq!(parsed.cname(), Some("alice@198.51.100.1"));
    }

    #[test]
    fn test_item_list_ending_on_boundary_gets_extra_terminator_word() {
        // SSRC(4) + item header(2) + text(10) = 16 bytes, exactly aligned;
        // the chunk still needs the terminator and grows a full extra word.
        let mut chunk = RtcpSdesChunk::new(1);
        chunk.items.push(RtcpSdesItem::cname("0123456789"));
        let sdes = RtcpSdes {
            chunks: vec![chunk],
        };

        let mut buf = BytesMut::new();
        sdes.serialize(&mut buf).unwrap();
        assert_eq!(buf.len(), 20);
        assert_eq!(&buf[16..], &[0, 0, 0, 0]);

        let parsed = RtcpSdes::parse(&mut buf.freeze(), 1).unwrap();
        assert_eq!(parsed, sdes);
    }

    #[test]
    fn test_multiple_chunks() {
        let mut first = RtcpSdesChunk::new(1);
        first.items.push(RtcpSdesItem::cname("a"));
        let mut second = RtcpSdesChunk::new(2);
        second.items.push(RtcpSdesItem::cname("bb"));
        second.items.push(RtcpSdesItem::tool("voxstack"));
        let sdes = RtcpSdes {
            chunks: vec![first, second],
        };

        let mut buf = BytesMut::new();
        sdes.serialize(&mut buf).unwrap();
        let parsed = RtcpSdes::parse(&mut buf.freeze(), 2).unwrap();
        assert_eq!(parsed, sdes);
    }

    #[test]
    fn test_unterminated_chunk_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(1);
        buf.put_u8(1); // CNAME item type, then nothing
        assert!(RtcpSdes::parse(&mut buf.freeze(), 1).is_err());
    }
}
