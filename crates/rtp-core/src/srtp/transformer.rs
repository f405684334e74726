//! Per-SSRC SRTP context cache.
//!
//! One transformer per direction: the session serializes the outbound
//! transformer on its send path and the inbound one on its receive path.
//! Session keys are derived once from the master material; contexts differ
//! only in their per-SSRC rollover/replay state.

use std::collections::HashMap;

use bytes::Bytes;

use crate::srtp::context::{SrtpContext, SrtpSessionKeys};
use crate::srtp::{SrtpCryptoKey, SrtpCryptoSuite};
use crate::error::Error;
use crate::{Result, RtpSsrc};

/// Cache of SRTP contexts keyed by SSRC for one direction
pub struct SrtpTransformer {
    keys: SrtpSessionKeys,
    contexts: HashMap<RtpSsrc, SrtpContext>,
}

impl SrtpTransformer {
    /// Derive session keys from `master` (clearing it) and start with an
    /// empty context cache
    pub fn new(suite: SrtpCryptoSuite, master: SrtpCryptoKey) -> Result<Self> {
        Ok(Self {
            keys: SrtpSessionKeys::derive(suite, master)?,
            contexts: HashMap::new(),
        })
    }

    /// The negotiated suite
    pub fn suite(&self) -> SrtpCryptoSuite {
        self.keys.suite()
    }

    fn context_for(&mut self, ssrc: RtpSsrc) -> &mut SrtpContext {
        self.contexts
            .entry(ssrc)
            .or_insert_with(|| SrtpContext::new(ssrc, self.keys.clone()))
    }

    /// Protect an outgoing RTP packet
    pub fn transform_rtp(&mut self, packet: &[u8]) -> Result<Bytes> {
        let ssrc = rtp_ssrc(packet)?;
        self.context_for(ssrc).protect_rtp(packet)
    }

    /// Unprotect an incoming SRTP packet
    pub fn reverse_transform_rtp(&mut self, packet: &[u8]) -> Result<Bytes> {
        let ssrc = rtp_ssrc(packet)?;
        self.context_for(ssrc).unprotect_rtp(packet)
    }

    /// Protect an outgoing RTCP compound packet
    pub fn transform_rtcp(&mut self, packet: &[u8]) -> Result<Bytes> {
        let ssrc = rtcp_ssrc(packet)?;
        self.context_for(ssrc).protect_rtcp(packet)
    }

    /// Unprotect an incoming SRTCP packet
    pub fn reverse_transform_rtcp(&mut self, packet: &[u8]) -> Result<Bytes> {
        let ssrc = rtcp_ssrc(packet)?;
        self.context_for(ssrc).unprotect_rtcp(packet)
    }

    /// Number of SSRCs with live contexts
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }
}

fn rtp_ssrc(packet: &[u8]) -> Result<RtpSsrc> {
    if packet.len() < 12 {
        return Err(Error::BufferTooSmall {
            required: 12,
            available: packet.len(),
        });
    }
    Ok(u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]]))
}

fn rtcp_ssrc(packet: &[u8]) -> Result<RtpSsrc> {
    if packet.len() < 8 {
        return Err(Error::BufferTooSmall {
            required: 8,
            available: packet.len(),
        });
    }
    Ok(u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]))
}
