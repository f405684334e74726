//! SRTP key derivation (RFC 3711 §4.3).
//!
//! Session keys are AES-CM keystream prefixes: the 128-bit derivation IV is
//! the master salt left-aligned over 16 bytes, the label XORed into byte 7,
//! and the two low bytes left to the block counter.

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;

use crate::error::Error;
use crate::Result;

type Aes128Ctr = Ctr128BE<Aes128>;

/// Key derivation labels (RFC 3711 §4.3.1 and §4.3.2)
#[derive(Debug, Clone, Copy)]
#[repr(u8)]
pub enum KdfLabel {
    RtpEncryption = 0x00,
    RtpAuthentication = 0x01,
    RtpSalt = 0x02,
    RtcpEncryption = 0x03,
    RtcpAuthentication = 0x04,
    RtcpSalt = 0x05,
}

/// Derive `out_len` bytes of session key material for `label`
pub fn derive_key(
    master_key: &[u8],
    master_salt: &[u8],
    label: KdfLabel,
    out_len: usize,
) -> Result<Vec<u8>> {
    let mut iv = [0u8; 16];
    iv[..master_salt.len().min(14)].copy_from_slice(&master_salt[..master_salt.len().min(14)]);
    iv[7] ^= label as u8;

    let mut out = vec![0u8; out_len];
    let mut cipher = Aes128Ctr::new_from_slices(master_key, &iv)
        .map_err(|_| Error::SrtpError("invalid master key length".to_string()))?;
    cipher.apply_keystream(&mut out);
    Ok(out)
}
