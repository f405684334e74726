//! Per-SSRC SRTP/SRTCP crypto context (RFC 3711 §3.2).
//!
//! One context per SSRC per direction. Carries the rollover counter, the
//! highest sequence seen, the 64-bit replay window, and the SRTCP indices.
//! The 48-bit SRTP packet index is ROC * 2^16 + SEQ; SRTCP uses an explicit
//! 31-bit counter carried in the packet with the E flag in the MSB.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use bytes::{BufMut, Bytes, BytesMut};
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::Error;
use crate::srtp::kdf::{derive_key, KdfLabel};
use crate::srtp::{
    SrtpAuthentication, SrtpCryptoKey, SrtpCryptoSuite, SrtpEncryption, SRTP_AUTH_KEY_LEN,
    SRTP_SALT_LEN,
};
use crate::{Result, RtpSsrc, RTP_MIN_HEADER_SIZE};

type Aes128Ctr = Ctr128BE<Aes128>;
type HmacSha1 = Hmac<Sha1>;

/// Session keys shared by every context of one keying (RFC 3711 derives
/// them from the master material independent of SSRC)
#[derive(Clone)]
pub struct SrtpSessionKeys {
    suite: SrtpCryptoSuite,
    rtp_enc_key: Vec<u8>,
    rtp_auth_key: Vec<u8>,
    rtp_salt: [u8; SRTP_SALT_LEN],
    rtcp_enc_key: Vec<u8>,
    rtcp_auth_key: Vec<u8>,
    rtcp_salt: [u8; SRTP_SALT_LEN],
}

impl SrtpSessionKeys {
    /// Derive the six session keys and clear the master material
    pub fn derive(suite: SrtpCryptoSuite, mut master: SrtpCryptoKey) -> Result<Self> {
        if !suite.is_supported() {
            return Err(Error::SrtpError(format!(
                "crypto suite not supported: {:?}/{:?}",
                suite.encryption, suite.authentication
            )));
        }
        let key = master.key();
        let salt = master.salt();

        let rtp_enc_key = derive_key(key, salt, KdfLabel::RtpEncryption, suite.key_len)?;
        let rtp_auth_key = derive_key(key, salt, KdfLabel::RtpAuthentication, SRTP_AUTH_KEY_LEN)?;
        let rtp_salt_vec = derive_key(key, salt, KdfLabel::RtpSalt, SRTP_SALT_LEN)?;
        let rtcp_enc_key = derive_key(key, salt, KdfLabel::RtcpEncryption, suite.key_len)?;
        let rtcp_auth_key =
            derive_key(key, salt, KdfLabel::RtcpAuthentication, SRTP_AUTH_KEY_LEN)?;
        let rtcp_salt_vec = derive_key(key, salt, KdfLabel::RtcpSalt, SRTP_SALT_LEN)?;

        // The master material has served its purpose.
        master.clear();

        let mut rtp_salt = [0u8; SRTP_SALT_LEN];
        rtp_salt.copy_from_slice(&rtp_salt_vec);
        let mut rtcp_salt = [0u8; SRTP_SALT_LEN];
        rtcp_salt.copy_from_slice(&rtcp_salt_vec);

        Ok(Self {
            suite,
            rtp_enc_key,
            rtp_auth_key,
            rtp_salt,
            rtcp_enc_key,
            rtcp_auth_key,
            rtcp_salt,
        })
    }

    pub fn suite(&self) -> SrtpCryptoSuite {
        self.suite
    }
}

/// 64-entry sliding replay window over packet indices
#[derive(Debug, Default, Clone)]
struct ReplayWindow {
    seen_any: bool,
    max_index: u64,
    mask: u64,
}

impl ReplayWindow {
    const SIZE: u64 = 64;

    /// Check without updating; the window only moves after authentication.
    fn check(&self, index: u64) -> Result<()> {
        if !self.seen_any || index > self.max_index {
            return Ok(());
        }
        let delta = self.max_index - index;
        if delta >= Self::SIZE {
            return Err(Error::ReplayedPacket(index));
        }
        if (self.mask >> delta) & 1 == 1 {
            return Err(Error::ReplayedPacket(index));
        }
        Ok(())
    }

    /// Admit an authenticated index.
    fn update(&mut self, index: u64) {
        if !self.seen_any {
            self.seen_any = true;
            self.max_index = index;
            self.mask = 1;
            return;
        }
        if index > self.max_index {
            let shift = index - self.max_index;
            self.mask = if shift >= Self::SIZE {
                0
            } else {
                self.mask << shift
            };
            self.mask |= 1;
            self.max_index = index;
        } else {
            self.mask |= 1 << (self.max_index - index);
        }
    }
}

/// SRTP/SRTCP crypto context for one SSRC in one direction
pub struct SrtpContext {
    ssrc: RtpSsrc,
    keys: SrtpSessionKeys,

    // Send side.
    send_roc: u32,
    last_sent_seq: Option<u16>,
    srtcp_index: u32,

    // Receive side. The highest-sequence tracking initializes from the
    // first observed SEQ (RFC 3711 §3.3.1) rather than assuming zero.
    recv_initialized: bool,
    recv_roc: u32,
    highest_recv_seq: u16,
    replay: ReplayWindow,
    srtcp_replay: ReplayWindow,
}

impl SrtpContext {
    /// Create a context for `ssrc` from already-derived session keys
    pub fn new(ssrc: RtpSsrc, keys: SrtpSessionKeys) -> Self {
        Self {
            ssrc,
            keys,
            send_roc: 0,
            last_sent_seq: None,
            srtcp_index: 0,
            recv_initialized: false,
            recv_roc: 0,
            highest_recv_seq: 0,
            replay: ReplayWindow::default(),
            srtcp_replay: ReplayWindow::default(),
        }
    }

    /// Create a context directly from master keying material
    pub fn from_master(
        ssrc: RtpSsrc,
        suite: SrtpCryptoSuite,
        master: SrtpCryptoKey,
    ) -> Result<Self> {
        Ok(Self::new(ssrc, SrtpSessionKeys::derive(suite, master)?))
    }

    pub fn ssrc(&self) -> RtpSsrc {
        self.ssrc
    }

    /// Current send-side rollover counter
    pub fn rollover_counter(&self) -> u32 {
        self.send_roc
    }

    // ---- SRTP ----

    /// Protect one RTP packet: encrypt the payload, append the auth tag
    pub fn protect_rtp(&mut self, packet: &[u8]) -> Result<Bytes> {
        let header_len = rtp_header_len(packet)?;
        let seq = u16::from_be_bytes([packet[2], packet[3]]);

        // A wrap of the 16-bit sequence bumps the rollover counter.
        if let Some(last) = self.last_sent_seq {
            if seq < last && last - seq > 0x8000 {
                self.send_roc = self.send_roc.wrapping_add(1);
            }
        }
        self.last_sent_seq = Some(seq);
        let index = ((self.send_roc as u64) << 16) | seq as u64;

        let mut out = BytesMut::with_capacity(packet.len() + self.keys.suite.tag_len);
        out.extend_from_slice(packet);
        self.apply_rtp_cipher(&mut out[header_len..], packet, index)?;

        if self.keys.suite.authentication == SrtpAuthentication::HmacSha1 {
            let tag = self.rtp_tag(&out, self.send_roc)?;
            out.extend_from_slice(&tag);
        }
        Ok(out.freeze())
    }

    /// Reverse-transform one SRTP packet: replay check, authenticate,
    /// decrypt, then admit the index into the window
    pub fn unprotect_rtp(&mut self, packet: &[u8]) -> Result<Bytes> {
        let tag_len = self.keys.suite.tag_len;
        let header_len = rtp_header_len(packet)?;
        if packet.len() < header_len + tag_len {
            return Err(Error::BufferTooSmall {
                required: header_len + tag_len,
                available: packet.len(),
            });
        }
        let seq = u16::from_be_bytes([packet[2], packet[3]]);
        let (roc, index) = self.estimate_index(seq);

        self.replay.check(index)?;

        let (body, tag) = packet.split_at(packet.len() - tag_len);
        if self.keys.suite.authentication == SrtpAuthentication::HmacSha1 {
            self.verify_rtp_tag(body, roc, tag)?;
        }

        let mut out = BytesMut::with_capacity(body.len());
        out.extend_from_slice(body);
        self.apply_rtp_cipher(&mut out[header_len..], body, index)?;

        // Only now, with the packet authenticated, move the window.
        self.replay.update(index);
        if self.recv_initialized {
            if roc == self.recv_roc.wrapping_add(1) {
                self.recv_roc = roc;
                self.highest_recv_seq = seq;
            } else if roc == self.recv_roc && seq > self.highest_recv_seq {
                self.highest_recv_seq = seq;
            }
        } else {
            self.recv_initialized = true;
            self.recv_roc = roc;
            self.highest_recv_seq = seq;
        }
        Ok(out.freeze())
    }

    /// RFC 3711 Appendix A index estimation from the 16-bit sequence
    fn estimate_index(&self, seq: u16) -> (u32, u64) {
        if !self.recv_initialized {
            return (0, seq as u64);
        }
        let s_l = self.highest_recv_seq;
        let roc = self.recv_roc;
        let v = if s_l < 0x8000 {
            if seq > s_l && seq - s_l > 0x8000 {
                roc.wrapping_sub(1)
            } else {
                roc
            }
        } else if s_l - 0x8000 > seq {
            roc.wrapping_add(1)
        } else {
            roc
        };
        (v, ((v as u64) << 16) | seq as u64)
    }

    fn apply_rtp_cipher(&self, payload: &mut [u8], packet: &[u8], index: u64) -> Result<()> {
        match self.keys.suite.encryption {
            SrtpEncryption::Null => Ok(()),
            SrtpEncryption::AesCm => {
                let iv = aes_cm_iv(&self.keys.rtp_salt, self.ssrc, index);
                apply_ctr(&self.keys.rtp_enc_key, &iv, payload)
            }
            SrtpEncryption::AesF8 => {
                let roc = (index >> 16) as u32;
                let iv = f8_rtp_iv(packet, roc);
                apply_f8(&self.keys.rtp_enc_key, &self.keys.rtp_salt, &iv, payload)
            }
            _ => Err(Error::SrtpError("unsupported encryption transform".to_string())),
        }
    }

    fn rtp_tag(&self, authenticated: &[u8], roc: u32) -> Result<Vec<u8>> {
        let mut mac = <HmacSha1 as KeyInit>::new_from_slice(&self.keys.rtp_auth_key)
            .map_err(|_| Error::SrtpError("invalid auth key".to_string()))?;
        mac.update(authenticated);
        mac.update(&roc.to_be_bytes());
        let full = mac.finalize().into_bytes();
        Ok(full[..self.keys.suite.tag_len].to_vec())
    }

    fn verify_rtp_tag(&self, body: &[u8], roc: u32, tag: &[u8]) -> Result<()> {
        let mut mac = <HmacSha1 as KeyInit>::new_from_slice(&self.keys.rtp_auth_key)
            .map_err(|_| Error::SrtpError("invalid auth key".to_string()))?;
        mac.update(body);
        mac.update(&roc.to_be_bytes());
        mac.verify_truncated_left(tag)
            .map_err(|_| Error::AuthenticationFailure)
    }

    // ---- SRTCP ----

    /// Protect one RTCP compound packet
    pub fn protect_rtcp(&mut self, packet: &[u8]) -> Result<Bytes> {
        if packet.len() < 8 {
            return Err(Error::BufferTooSmall {
                required: 8,
                available: packet.len(),
            });
        }
        let index = self.srtcp_index;
        self.srtcp_index = (self.srtcp_index + 1) & 0x7FFF_FFFF;

        let encrypted = self.keys.suite.encryption != SrtpEncryption::Null;
        let e_word = if encrypted {
            0x8000_0000 | index
        } else {
            index
        };

        let mut out = BytesMut::with_capacity(packet.len() + 4 + self.keys.suite.tag_len);
        out.extend_from_slice(packet);
        if encrypted {
            let ssrc = u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]);
            self.apply_rtcp_cipher(&mut out[8..], packet, ssrc, index, e_word)?;
        }
        out.put_u32(e_word);

        if self.keys.suite.authentication == SrtpAuthentication::HmacSha1 {
            let tag = self.rtcp_tag(&out)?;
            out.extend_from_slice(&tag);
        }
        Ok(out.freeze())
    }

    /// Reverse-transform one SRTCP packet
    pub fn unprotect_rtcp(&mut self, packet: &[u8]) -> Result<Bytes> {
        let tag_len = self.keys.suite.tag_len;
        if packet.len() < 8 + 4 + tag_len {
            return Err(Error::BufferTooSmall {
                required: 8 + 4 + tag_len,
                available: packet.len(),
            });
        }

        let (authenticated, tag) = packet.split_at(packet.len() - tag_len);
        let e_word_offset = authenticated.len() - 4;
        let e_word = u32::from_be_bytes([
            authenticated[e_word_offset],
            authenticated[e_word_offset + 1],
            authenticated[e_word_offset + 2],
            authenticated[e_word_offset + 3],
        ]);
        let encrypted = e_word & 0x8000_0000 != 0;
        let index = e_word & 0x7FFF_FFFF;

        self.srtcp_replay.check(index as u64)?;

        if self.keys.suite.authentication == SrtpAuthentication::HmacSha1 {
            let mut mac = <HmacSha1 as KeyInit>::new_from_slice(&self.keys.rtcp_auth_key)
                .map_err(|_| Error::SrtpError("invalid auth key".to_string()))?;
            mac.update(authenticated);
            mac.verify_truncated_left(tag)
                .map_err(|_| Error::AuthenticationFailure)?;
        }

        let body = &authenticated[..e_word_offset];
        let mut out = BytesMut::with_capacity(body.len());
        out.extend_from_slice(body);
        if encrypted {
            let ssrc = u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]);
            self.apply_rtcp_cipher(&mut out[8..], body, ssrc, index, e_word)?;
        }

        self.srtcp_replay.update(index as u64);
        Ok(out.freeze())
    }

    fn apply_rtcp_cipher(
        &self,
        payload: &mut [u8],
        packet: &[u8],
        ssrc: u32,
        index: u32,
        e_word: u32,
    ) -> Result<()> {
        match self.keys.suite.encryption {
            SrtpEncryption::Null => Ok(()),
            SrtpEncryption::AesCm => {
                let iv = aes_cm_iv(&self.keys.rtcp_salt, ssrc, index as u64);
                apply_ctr(&self.keys.rtcp_enc_key, &iv, payload)
            }
            SrtpEncryption::AesF8 => {
                let iv = f8_rtcp_iv(packet, e_word);
                apply_f8(&self.keys.rtcp_enc_key, &self.keys.rtcp_salt, &iv, payload)
            }
            _ => Err(Error::SrtpError("unsupported encryption transform".to_string())),
        }
    }

    fn rtcp_tag(&self, authenticated: &[u8]) -> Result<Vec<u8>> {
        let mut mac = <HmacSha1 as KeyInit>::new_from_slice(&self.keys.rtcp_auth_key)
            .map_err(|_| Error::SrtpError("invalid auth key".to_string()))?;
        mac.update(authenticated);
        let full = mac.finalize().into_bytes();
        Ok(full[..self.keys.suite.tag_len].to_vec())
    }
}

/// Length of the RTP header (fixed part, CSRCs, extension)
fn rtp_header_len(packet: &[u8]) -> Result<usize> {
    if packet.len() < RTP_MIN_HEADER_SIZE {
        return Err(Error::BufferTooSmall {
            required: RTP_MIN_HEADER_SIZE,
            available: packet.len(),
        });
    }
    let version = packet[0] >> 6;
    if version != 2 {
        return Err(Error::InvalidVersion(version));
    }
    let cc = (packet[0] & 0x0F) as usize;
    let mut len = RTP_MIN_HEADER_SIZE + cc * 4;
    if packet[0] & 0x10 != 0 {
        if packet.len() < len + 4 {
            return Err(Error::BufferTooSmall {
                required: len + 4,
                available: packet.len(),
            });
        }
        let words = u16::from_be_bytes([packet[len + 2], packet[len + 3]]) as usize;
        len += 4 + words * 4;
    }
    if packet.len() < len {
        return Err(Error::BufferTooSmall {
            required: len,
            available: packet.len(),
        });
    }
    Ok(len)
}

/// AES-CM IV (RFC 3711 §4.1.1): the 14-byte session salt over a zeroed
/// 16-byte block, SSRC XORed at bytes 4..8, the 48-bit index at bytes 8..14
fn aes_cm_iv(salt: &[u8; SRTP_SALT_LEN], ssrc: u32, index: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..SRTP_SALT_LEN].copy_from_slice(salt);
    for (i, b) in ssrc.to_be_bytes().iter().enumerate() {
        iv[4 + i] ^= b;
    }
    for (i, b) in index.to_be_bytes()[2..].iter().enumerate() {
        iv[8 + i] ^= b;
    }
    iv
}

/// AES-F8 IV for SRTP (RFC 3711 §4.1.2.2): a zero byte, then M|PT, SEQ,
/// timestamp, SSRC from the header, then the ROC
fn f8_rtp_iv(packet: &[u8], roc: u32) -> [u8; 16] {
    let mut iv = [0u8; 16];
    // packet[1] is M|PT; bytes 2..12 are SEQ, TS and SSRC.
    iv[1..12].copy_from_slice(&packet[1..12]);
    iv[12..16].copy_from_slice(&roc.to_be_bytes());
    iv
}

/// AES-F8 IV for SRTCP (RFC 3711 §4.1.2.3): four zero bytes, the E+index
/// word, then the first eight bytes of the RTCP packet
fn f8_rtcp_iv(packet: &[u8], e_word: u32) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[4..8].copy_from_slice(&e_word.to_be_bytes());
    iv[8..16].copy_from_slice(&packet[..8]);
    iv
}

fn apply_ctr(key: &[u8], iv: &[u8; 16], data: &mut [u8]) -> Result<()> {
    let mut cipher = Aes128Ctr::new_from_slices(key, iv)
        .map_err(|_| Error::SrtpError("invalid session key length".to_string()))?;
    cipher.apply_keystream(data);
    Ok(())
}

/// AES f8-mode keystream (RFC 3711 §4.1.2).
///
/// IV' = E(k XOR m, IV) with m = salt padded with 0x55; keystream block
/// S(j) = E(k, IV' XOR j XOR S(j-1)).
fn apply_f8(key: &[u8], salt: &[u8; SRTP_SALT_LEN], iv: &[u8; 16], data: &mut [u8]) -> Result<()> {
    let cipher =
        Aes128::new_from_slice(key).map_err(|_| Error::SrtpError("invalid key".to_string()))?;

    let mut masked_key = key.to_vec();
    for (i, b) in masked_key.iter_mut().enumerate() {
        let m = if i < SRTP_SALT_LEN { salt[i] } else { 0x55 };
        *b ^= m;
    }
    let masked =
        Aes128::new_from_slice(&masked_key).map_err(|_| Error::SrtpError("invalid key".to_string()))?;
    let mut iv2 = GenericArray::clone_from_slice(iv);
    masked.encrypt_block(&mut iv2);

    let mut prev = [0u8; 16];
    let mut offset = 0usize;
    let mut j: u128 = 0;
    while offset < data.len() {
        let mut block = [0u8; 16];
        let j_bytes = j.to_be_bytes();
        for i in 0..16 {
            block[i] = iv2[i] ^ prev[i] ^ j_bytes[i];
        }
        let mut ga = GenericArray::clone_from_slice(&block);
        cipher.encrypt_block(&mut ga);
        prev.copy_from_slice(&ga);

        let take = (data.len() - offset).min(16);
        for i in 0..take {
            data[offset + i] ^= prev[i];
        }
        offset += take;
        j += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::RtpPacket;

    fn zero_master() -> SrtpCryptoKey {
        SrtpCryptoKey::new(vec![0u8; 16], vec![0u8; 14]).unwrap()
    }

    fn sample_packet() -> Vec<u8> {
        RtpPacket::new_with_payload(
            0,
            0x0001,
            160,
            0x12345678,
            Bytes::from_static(&[0xAA; 20]),
        )
        .serialize()
        .unwrap()
        .to_vec()
    }

    fn context_pair(suite: SrtpCryptoSuite) -> (SrtpContext, SrtpContext) {
        let sender = SrtpContext::from_master(0x12345678, suite, zero_master()).unwrap();
        let receiver = SrtpContext::from_master(0x12345678, suite, zero_master()).unwrap();
        (sender, receiver)
    }

    #[test]
    fn test_aes_cm_round_trip() {
        let (mut sender, mut receiver) =
            context_pair(SrtpCryptoSuite::AES_CM_128_HMAC_SHA1_80);
        let plain = sample_packet();
        assert_eq!(plain.len(), 32);

        let protected = sender.protect_rtp(&plain).unwrap();
        // 12-byte clear header + 20-byte ciphertext + 10-byte tag.
        assert_eq!(protected.len(), 42);
        // Header stays in the clear; payload does not.
        assert_eq!(&protected[..12], &plain[..12]);
        assert_ne!(&protected[12..32], &plain[12..32]);

        let recovered = receiver.unprotect_rtp(&protected).unwrap();
        assert_eq!(&recovered[..], &plain[..]);
    }

    #[test]
    fn test_aes_f8_round_trip() {
        let (mut sender, mut receiver) =
            context_pair(SrtpCryptoSuite::AES_F8_128_HMAC_SHA1_80);
        let plain = sample_packet();
        let protected = sender.protect_rtp(&plain).unwrap();
        assert_ne!(&protected[12..32], &plain[12..32]);
        let recovered = receiver.unprotect_rtp(&protected).unwrap();
        assert_eq!(&recovered[..], &plain[..]);
    }

    #[test]
    fn test_null_suite_passthrough() {
        let (mut sender, mut receiver) = context_pair(SrtpCryptoSuite::NULL);
        let plain = sample_packet();
        let protected = sender.protect_rtp(&plain).unwrap();
        assert_eq!(&protected[..], &plain[..]);
        let recovered = receiver.unprotect_rtp(&protected).unwrap();
        assert_eq!(&recovered[..], &plain[..]);
    }

    #[test]
    fn test_replay_rejected() {
        let (mut sender, mut receiver) =
            context_pair(SrtpCryptoSuite::AES_CM_128_HMAC_SHA1_80);
        let protected = sender.protect_rtp(&sample_packet()).unwrap();

        receiver.unprotect_rtp(&protected).unwrap();
        match receiver.unprotect_rtp(&protected) {
            Err(Error::ReplayedPacket(index)) => assert_eq!(index, 1),
            other => panic!("expected replay rejection, got {:?}", other.map(|b| b.len())),
        }
    }

    #[test]
    fn test_in_window_gap_accepted_once() {
        let (mut sender, mut receiver) =
            context_pair(SrtpCryptoSuite::AES_CM_128_HMAC_SHA1_80);

        let mut packets = Vec::new();
        for seq in 1u16..=5 {
            let plain = RtpPacket::new_with_payload(
                0,
                seq,
                160 * seq as u32,
                0x12345678,
                Bytes::from_static(&[0xAA; 20]),
            )
            .serialize()
            .unwrap();
            packets.push(sender.protect_rtp(&plain).unwrap());
        }

        // Deliver 1, 2, 4, 5 then the late 3: the unset window bit admits it.
        receiver.unprotect_rtp(&packets[0]).unwrap();
        receiver.unprotect_rtp(&packets[1]).unwrap();
        receiver.unprotect_rtp(&packets[3]).unwrap();
        receiver.unprotect_rtp(&packets[4]).unwrap();
        receiver.unprotect_rtp(&packets[2]).unwrap();
        // A second delivery of the same straggler is a replay.
        assert!(receiver.unprotect_rtp(&packets[2]).is_err());
    }

    #[test]
    fn test_tampered_packet_rejected() {
        let (mut sender, mut receiver) =
            context_pair(SrtpCryptoSuite::AES_CM_128_HMAC_SHA1_80);
        let mut protected = sender.protect_rtp(&sample_packet()).unwrap().to_vec();
        protected[20] ^= 0x01;
        assert!(matches!(
            receiver.unprotect_rtp(&protected),
            Err(Error::AuthenticationFailure)
        ));
    }

    #[test]
    fn test_seq_wrap_increments_roc() {
        let (mut sender, mut receiver) =
            context_pair(SrtpCryptoSuite::AES_CM_128_HMAC_SHA1_80);

        for seq in [65534u16, 65535, 0, 1] {
            let plain = RtpPacket::new_with_payload(
                0,
                seq,
                160,
                0x12345678,
                Bytes::from_static(&[0xAA; 20]),
            )
            .serialize()
            .unwrap();
            let protected = sender.protect_rtp(&plain).unwrap();
            let recovered = receiver.unprotect_rtp(&protected).unwrap();
            assert_eq!(&recovered[..], &plain[..]);
        }
        assert_eq!(sender.rollover_counter(), 1);
        // The receiver tracked the 48-bit index across the wrap.
        assert_eq!(receiver.recv_roc, 1);
        assert_eq!(receiver.replay.max_index, (1u64 << 16) | 1);
    }

    #[test]
    fn test_receiver_initializes_tracking_from_first_seq() {
        let (mut sender, mut receiver) =
            context_pair(SrtpCryptoSuite::AES_CM_128_HMAC_SHA1_80);
        // Join late: first observed sequence is high.
        let plain = RtpPacket::new_with_payload(
            0,
            60000,
            160,
            0x12345678,
            Bytes::from_static(&[0xAA; 20]),
        )
        .serialize()
        .unwrap();
        // Align the sender's sequence history.
        let protected = {
            let mut first = RtpPacket::new_with_payload(
                0,
                59999,
                0,
                0x12345678,
                Bytes::from_static(&[0xAA; 20]),
            )
            .serialize()
            .unwrap()
            .to_vec();
            let _ = sender.protect_rtp(&first).unwrap();
            first.clear();
            sender.protect_rtp(&plain).unwrap()
        };
        receiver.unprotect_rtp(&protected).unwrap();
        assert_eq!(receiver.highest_recv_seq, 60000);
        assert_eq!(receiver.recv_roc, 0);
    }

    #[test]
    fn test_srtcp_round_trip_and_replay() {
        let (mut sender, mut receiver) =
            context_pair(SrtpCryptoSuite::AES_CM_128_HMAC_SHA1_80);

        // A minimal RTCP packet: header + SSRC.
        let mut rtcp = Vec::new();
        rtcp.extend_from_slice(&[0x80, 200, 0, 6]);
        rtcp.extend_from_slice(&0x12345678u32.to_be_bytes());
        rtcp.extend_from_slice(&[0u8; 20]);

        let protected = sender.protect_rtcp(&rtcp).unwrap();
        // Packet + E|index word + tag.
        assert_eq!(protected.len(), rtcp.len() + 4 + 10);
        // E flag set, index 0.
        let e_word = u32::from_be_bytes([
            protected[rtcp.len()],
            protected[rtcp.len() + 1],
            protected[rtcp.len() + 2],
            protected[rtcp.len() + 3],
        ]);
        assert_eq!(e_word, 0x8000_0000);

        let recovered = receiver.unprotect_rtcp(&protected).unwrap();
        assert_eq!(&recovered[..], &rtcp[..]);
        assert!(matches!(
            receiver.unprotect_rtcp(&protected),
            Err(Error::ReplayedPacket(0))
        ));

        // The next packet carries index 1.
        let protected2 = sender.protect_rtcp(&rtcp).unwrap();
        let e_word2 = u32::from_be_bytes([
            protected2[rtcp.len()],
            protected2[rtcp.len() + 1],
            protected2[rtcp.len() + 2],
            protected2[rtcp.len() + 3],
        ]);
        assert_eq!(e_word2 & 0x7FFF_FFFF, 1);
        receiver.unprotect_rtcp(&protected2).unwrap();
    }

    #[test]
    fn test_srtcp_tamper_rejected() {
        let (mut sender, mut receiver) =
            context_pair(SrtpCryptoSuite::AES_CM_128_HMAC_SHA1_80);
        let mut rtcp = vec![0x80, 200, 0, 1];
        rtcp.extend_from_slice(&0x12345678u32.to_be_bytes());
        let mut protected = sender.protect_rtcp(&rtcp).unwrap().to_vec();
        let index = protected.len() - 12;
        protected[index] ^= 0x40;
        assert!(receiver.unprotect_rtcp(&protected).is_err());
    }
}
