//! DTLS-SRTP integration surface.
//!
//! The handshake itself is an external collaborator: the media session
//! consumes any [`DtlsTransport`] implementation, hands it exclusive use of
//! the RTP socket until the handshake completes, and then routes media
//! through its protect/unprotect operations. What lives here is that trait
//! plus the process-wide self-signed certificate whose fingerprint goes
//! into SDP `a=fingerprint` attributes.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use tokio::net::UdpSocket;

use crate::Result;

/// A negotiated DTLS-SRTP protector.
///
/// `do_handshake` owns the RTP socket exclusively until it returns; only
/// then does the session start its receive tasks.
#[async_trait::async_trait]
pub trait DtlsTransport: Send + Sync {
    /// Run the DTLS handshake against `remote` over `socket`
    async fn do_handshake(&mut self, socket: Arc<UdpSocket>, remote: SocketAddr) -> Result<()>;

    /// Whether we act as the DTLS server (passive) side
    fn is_server(&self) -> bool;

    /// Protect an outgoing RTP packet
    fn protect_rtp(&mut self, packet: &[u8]) -> Result<Bytes>;

    /// Protect an outgoing RTCP compound packet
    fn protect_rtcp(&mut self, packet: &[u8]) -> Result<Bytes>;

    /// Unprotect an incoming SRTP packet
    fn unprotect_rtp(&mut self, packet: &[u8]) -> Result<Bytes>;

    /// Unprotect an incoming SRTCP packet
    fn unprotect_rtcp(&mut self, packet: &[u8]) -> Result<Bytes>;
}

/// Process-wide DTLS identity: a self-signed certificate generated once
/// and shared by every media session
pub struct CertificateIdentity {
    /// DER-encoded certificate
    pub certificate_der: Vec<u8>,
    /// DER-encoded private key (PKCS#8)
    pub private_key_der: Vec<u8>,
    /// SDP-formatted SHA-256 fingerprint ("sha-256 AB:CD:...")
    pub fingerprint: String,
}

static CERTIFICATE_IDENTITY: Lazy<CertificateIdentity> = Lazy::new(|| {
    // Init-once process state; generation failure here is unrecoverable.
    let cert = rcgen::generate_simple_self_signed(vec!["voxstack".to_string()])
        .expect("self-signed certificate generation");
    let certificate_der = cert
        .serialize_der()
        .expect("self-signed certificate serialization");
    let private_key_der = cert.serialize_private_key_der();
    let fingerprint = fingerprint(&certificate_der);
    CertificateIdentity {
        certificate_der,
        private_key_der,
        fingerprint,
    }
});

/// The lazily initialized process-wide certificate identity
pub fn certificate_identity() -> &'static CertificateIdentity {
    &CERTIFICATE_IDENTITY
}

/// SDP `a=fingerprint` value for a DER-encoded certificate
pub fn fingerprint(certificate_der: &[u8]) -> String {
    let digest = Sha256::digest(certificate_der);
    let hex: Vec<String> = digest.iter().map(|b| format!("{:02X}", b)).collect();
    format!("sha-256 {}", hex.join(":"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_stable() {
        let first = certificate_identity();
        let second = certificate_identity();
        assert_eq!(first.fingerprint, second.fingerprint);
        assert!(!first.certificate_der.is_empty());
        assert!(!first.private_key_der.is_empty());
    }

    #[test]
    fn test_fingerprint_format() {
        let value = fingerprint(b"example certificate bytes");
        assert!(value.starts_with("sha-256 "));
        // 32 hash bytes, colon separated.
        let hex = value.strip_prefix("sha-256 ").unwrap();
        assert_eq!(hex.split(':').count(), 32);
        assert!(hex.split(':').all(|p| p.len() == 2));
    }

    #[test]
    fn test_fingerprint_differs_by_input() {
        assert_ne!(fingerprint(b"a"), fingerprint(b"b"));
    }
}
