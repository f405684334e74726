//! SRTP/SRTCP protection (RFC 3711).
//!
//! Keying material arrives from SDES crypto attributes or a DTLS-SRTP
//! handshake as a master key + master salt pair; session keys are derived
//! with the AES-CM PRF and the master material is cleared. Each SSRC and
//! direction gets its own [`SrtpContext`] carrying the rollover counter,
//! replay window and SRTCP indices; [`SrtpTransformer`] caches contexts per
//! SSRC.

pub mod context;
pub mod kdf;
pub mod transformer;

pub use context::{SrtpContext, SrtpSessionKeys};
pub use transformer::SrtpTransformer;

use crate::error::Error;
use crate::Result;

/// SRTP master key length for the AES-128 suites
pub const SRTP_AES_128_KEY_LEN: usize = 16;

/// SRTP master salt length
pub const SRTP_SALT_LEN: usize = 14;

/// HMAC-SHA1 session authentication key length
pub const SRTP_AUTH_KEY_LEN: usize = 20;

/// Encryption transforms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrtpEncryption {
    /// No encryption (test use only)
    Null,
    /// AES-128 counter mode (the default transform)
    AesCm,
    /// AES-128 in f8 mode
    AesF8,
    /// Twofish counter mode (recognized, not implemented)
    Twofish,
    /// Twofish in f8 mode (recognized, not implemented)
    TwofishF8,
}

/// Authentication transforms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrtpAuthentication {
    /// No authentication tag (test use only)
    Null,
    /// HMAC-SHA1 (tag length set by the suite)
    HmacSha1,
    /// Skein MAC (recognized, not implemented)
    Skein,
}

/// A complete SRTP protection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrtpCryptoSuite {
    /// Encryption transform
    pub encryption: SrtpEncryption,
    /// Authentication transform
    pub authentication: SrtpAuthentication,
    /// Master/session encryption key length in bytes
    pub key_len: usize,
    /// Master/session salt length in bytes
    pub salt_len: usize,
    /// Authentication tag length in bytes
    pub tag_len: usize,
}

impl SrtpCryptoSuite {
    /// AES_CM_128_HMAC_SHA1_80: the default SRTP protection
    pub const AES_CM_128_HMAC_SHA1_80: Self = Self {
        encryption: SrtpEncryption::AesCm,
        authentication: SrtpAuthentication::HmacSha1,
        key_len: SRTP_AES_128_KEY_LEN,
        salt_len: SRTP_SALT_LEN,
        tag_len: 10,
    };

    /// AES_CM_128_HMAC_SHA1_32: short-tag variant
    pub const AES_CM_128_HMAC_SHA1_32: Self = Self {
        encryption: SrtpEncryption::AesCm,
        authentication: SrtpAuthentication::HmacSha1,
        key_len: SRTP_AES_128_KEY_LEN,
        salt_len: SRTP_SALT_LEN,
        tag_len: 4,
    };

    /// AES_F8_128_HMAC_SHA1_80
    pub const AES_F8_128_HMAC_SHA1_80: Self = Self {
        encryption: SrtpEncryption::AesF8,
        authentication: SrtpAuthentication::HmacSha1,
        key_len: SRTP_AES_128_KEY_LEN,
        salt_len: SRTP_SALT_LEN,
        tag_len: 10,
    };

    /// Pass-through policy, legal only for testing
    pub const NULL: Self = Self {
        encryption: SrtpEncryption::Null,
        authentication: SrtpAuthentication::Null,
        key_len: SRTP_AES_128_KEY_LEN,
        salt_len: SRTP_SALT_LEN,
        tag_len: 0,
    };

    /// Look a suite up by its SDP crypto-attribute name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "AES_CM_128_HMAC_SHA1_80" => Some(Self::AES_CM_128_HMAC_SHA1_80),
            "AES_CM_128_HMAC_SHA1_32" => Some(Self::AES_CM_128_HMAC_SHA1_32),
            "AES_F8_128_HMAC_SHA1_80" => Some(Self::AES_F8_128_HMAC_SHA1_80),
            _ => None,
        }
    }

    /// Pick the session suite from offered and answered crypto-attribute
    /// suite names: the first answered suite wins, provided the offer
    /// included it and we can instantiate it.
    pub fn negotiate(offered: &[&str], answered: &[&str]) -> Option<Self> {
        let first = answered.first()?;
        if !offered.contains(first) {
            return None;
        }
        Self::from_name(first).filter(|suite| suite.is_supported())
    }

    /// Whether this suite can actually be instantiated
    pub fn is_supported(&self) -> bool {
        !matches!(
            self.encryption,
            SrtpEncryption::Twofish | SrtpEncryption::TwofishF8
        ) && !matches!(self.authentication, SrtpAuthentication::Skein)
    }

    /// Whether any protection is applied at all
    pub fn is_null(&self) -> bool {
        self.encryption == SrtpEncryption::Null
            && self.authentication == SrtpAuthentication::Null
    }
}

/// SRTP master keying material: master key plus master salt.
///
/// The material is consumed (and cleared) when session keys are derived.
#[derive(Clone)]
pub struct SrtpCryptoKey {
    key: Vec<u8>,
    salt: Vec<u8>,
}

impl SrtpCryptoKey {
    pub fn new(key: Vec<u8>, salt: Vec<u8>) -> Result<Self> {
        if key.len() != SRTP_AES_128_KEY_LEN {
            return Err(Error::SrtpError(format!(
                "master key must be {} bytes, got {}",
                SRTP_AES_128_KEY_LEN,
                key.len()
            )));
        }
        if salt.len() != SRTP_SALT_LEN {
            return Err(Error::SrtpError(format!(
                "master salt must be {} bytes, got {}",
                SRTP_SALT_LEN,
                salt.len()
            )));
        }
        Ok(Self { key, salt })
    }

    /// Split a 30-byte SDES key||salt concatenation (as carried in
    /// `a=crypto` inline parameters)
    pub fn from_concatenated(material: &[u8]) -> Result<Self> {
        if material.len() != SRTP_AES_128_KEY_LEN + SRTP_SALT_LEN {
            return Err(Error::SrtpError(format!(
                "concatenated key material must be {} bytes, got {}",
                SRTP_AES_128_KEY_LEN + SRTP_SALT_LEN,
                material.len()
            )));
        }
        Ok(Self {
            key: material[..SRTP_AES_128_KEY_LEN].to_vec(),
            salt: material[SRTP_AES_128_KEY_LEN..].to_vec(),
        })
    }

    pub(crate) fn key(&self) -> &[u8] {
        &self.key
    }

    pub(crate) fn salt(&self) -> &[u8] {
        &self.salt
    }

    /// Overwrite the master material. Called once session keys exist.
    pub(crate) fn clear(&mut self) {
        self.key.iter_mut().for_each(|b| *b = 0);
        self.salt.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for SrtpCryptoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs.
        write!(f, "SrtpCryptoKey({} key bytes)", self.key.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suite_lookup() {
        assert_eq!(
            SrtpCryptoSuite::from_name("AES_CM_128_HMAC_SHA1_80"),
            Some(SrtpCryptoSuite::AES_CM_128_HMAC_SHA1_80)
        );
        assert_eq!(SrtpCryptoSuite::from_name("AEAD_AES_128_GCM"), None);
    }

    #[test]
    fn test_suite_negotiation() {
        let offered = ["AES_CM_128_HMAC_SHA1_80", "AES_CM_128_HMAC_SHA1_32"];
        // First answered suite wins.
        assert_eq!(
            SrtpCryptoSuite::negotiate(
                &offered,
                &["AES_CM_128_HMAC_SHA1_32", "AES_CM_128_HMAC_SHA1_80"]
            ),
            Some(SrtpCryptoSuite::AES_CM_128_HMAC_SHA1_32)
        );
        // An answer the offer never contained is rejected.
        assert_eq!(
            SrtpCryptoSuite::negotiate(&offered, &["AES_F8_128_HMAC_SHA1_80"]),
            None
        );
        assert_eq!(SrtpCryptoSuite::negotiate(&offered, &[]), None);
    }

    #[test]
    fn test_key_length_validation() {
        assert!(SrtpCryptoKey::new(vec![0; 16], vec![0; 14]).is_ok());
        assert!(SrtpCryptoKey::new(vec![0; 15], vec![0; 14]).is_err());
        assert!(SrtpCryptoKey::new(vec![0; 16], vec![0; 13]).is_err());
    }

    #[test]
    fn test_concatenated_split() {
        let mut material = vec![1u8; 16];
        material.extend(vec![2u8; 14]);
        let key = SrtpCryptoKey::from_concatenated(&material).unwrap();
        assert_eq!(key.key(), &[1u8; 16][..]);
        assert_eq!(key.salt(), &[2u8; 14][..]);
    }

    #[test]
    fn test_unsupported_suites_flagged() {
        assert!(SrtpCryptoSuite::AES_CM_128_HMAC_SHA1_80.is_supported());
        let skein = SrtpCryptoSuite {
            authentication: SrtpAuthentication::Skein,
            ..SrtpCryptoSuite::AES_CM_128_HMAC_SHA1_80
        };
        assert!(!skein.is_supported());
    }

    #[test]
    fn test_debug_hides_key_material() {
        let key = SrtpCryptoKey::new(vec![0xAB; 16], vec![0xCD; 14]).unwrap();
        let debug = format!("{:?}", key);
        assert!(!debug.contains("AB"));
        assert!(!debug.contains("171"));
    }
}
