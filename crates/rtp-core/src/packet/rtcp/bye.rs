//! RTCP Goodbye (BYE) packet (RFC 3550 §6.6).

use bytes::{Buf, BufMut, BytesMut};

use crate::error::Error;
use crate::{Result, RtpSsrc};

/// RTCP BYE packet: the listed sources are leaving the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpGoodbye {
    /// Departing sources
    pub ssrcs: Vec<RtpSsrc>,

    /// Optional human-readable reason
    pub reason: Option<String>,
}

impl RtcpGoodbye {
    /// Create a BYE for one source
    pub fn new(ssrc: RtpSsrc) -> Self {
        Self {
            ssrcs: vec![ssrc],
            reason: None,
        }
    }

    /// Create a BYE for one source with a reason
    pub fn with_reason(ssrc: RtpSsrc, reason: impl Into<String>) -> Self {
        Self {
            ssrcs: vec![ssrc],
            reason: Some(reason.into()),
        }
    }

    /// Body size in bytes (excluding the RTCP header)
    pub fn size(&self) -> usize {
        let mut size = self.ssrcs.len() * 4;
        if let Some(reason) = &self.reason {
            // Length byte + text, padded to a 32-bit boundary.
            size += (1 + reason.len() + 3) & !3;
        }
        size
    }

    /// Serialize the body (SSRC list, optional reason)
    pub fn serialize(&self, buf: &mut BytesMut) -> Result<()> {
        if self.ssrcs.len() > 31 {
            return Err(Error::RtcpError("BYE lists more than 31 sources".to_string()));
        }
        for ssrc in &self.ssrcs {
            buf.put_u32(*ssrc);
        }
        if let Some(reason) = &self.reason {
            if reason.len() > 255 {
                return Err(Error::RtcpError("BYE reason longer than 255 bytes".to_string()));
            }
            buf.put_u8(reason.len() as u8);
            buf.put_slice(reason.as_bytes());
            let mut written = 1 + reason.len();
            while written % 4 != 0 {
                buf.put_u8(0);
                written += 1;
            }
        }
        Ok(())
    }

    /// Parse the body given the header's source count and total body length
    pub fn parse(buf: &mut impl Buf, source_count: u8) -> Result<Self> {
        if buf.remaining() < source_count as usize * 4 {
            return Err(Error::BufferTooSmall {
                required: source_count as usize * 4,
                available: buf.remaining(),
            });
        }
        let mut ssrcs = Vec::with_capacity(source_count as usize);
        for _ in 0..source_count {
            ssrcs.push(buf.get_u32());
        }

        let reason = if buf.remaining() > 0 {
            let len = buf.get_u8() as usize;
            if buf.remaining() < len {
                return Err(Error::BufferTooSmall {
                    required: len,
                    available: buf.remaining(),
                });
            }
            let raw = buf.copy_to_bytes(len);
            // Swallow the padding up to the boundary.
            let mut consumed = 1 + len;
            while consumed % 4 != 0 && buf.remaining() > 0 {
                buf.get_u8();
                consumed += 1;
            }
            Some(
                String::from_utf8(raw.to_vec())
                    .map_err(|_| Error::RtcpError("BYE reason is not UTF-8".to_string()))?,
            )
        } else {
            None
        };

        Ok(Self { ssrcs, reason })
    }
}
