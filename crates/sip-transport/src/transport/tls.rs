//! TLS SIP channel.
//!
//! Same connection model as TCP plus a rustls handshake on both roles.
//! Certificate acceptance is predicate-driven: the application installs
//! accept callbacks that are consulted during handshake validation. With
//! mutual authentication enabled, a client that presents no certificate is
//! rejected during the handshake and the connection never becomes live.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::CryptoProvider;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use tokio_rustls::rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use tokio_rustls::rustls::{
    self, ClientConfig, DigitallySignedStruct, DistinguishedName, ServerConfig, SignatureScheme,
};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, info, warn};

use crate::config::ChannelConfig;
use crate::connection::{install_stream, spawn_prune_task, ConnectionRole, ConnectionTable};
use crate::error::{Error, Result};
use crate::transport::tcp::{
    bind_listener, connect_from_ephemeral, flush_pending, StreamInner,
};
use crate::transport::{Transport, TransportEvent};

/// Certificate acceptance predicate over the peer's DER-encoded end-entity
/// certificate
pub type CertificateAcceptor = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// TLS identity and validation policy for a channel
pub struct TlsSettings {
    /// Our certificate chain, leaf first
    pub certificate_chain: Vec<CertificateDer<'static>>,
    /// Our private key
    pub private_key: PrivateKeyDer<'static>,
    /// Require clients to present a certificate
    pub mutual_auth: bool,
    /// Predicate consulted for server certificates when we connect out.
    /// Connections are rejected when absent.
    pub accept_server_certificate: Option<CertificateAcceptor>,
    /// Predicate consulted for client certificates when mutual auth is on.
    /// Clients are rejected when absent.
    pub accept_client_certificate: Option<CertificateAcceptor>,
}

impl TlsSettings {
    pub fn new(
        certificate_chain: Vec<CertificateDer<'static>>,
        private_key: PrivateKeyDer<'static>,
    ) -> Self {
        Self {
            certificate_chain,
            private_key,
            mutual_auth: false,
            accept_server_certificate: None,
            accept_client_certificate: None,
        }
    }

    /// Load identity from PEM-encoded certificate chain and private key
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let certificate_chain = rustls_pemfile::certs(&mut &cert_pem[..])
            .collect::<std::io::Result<Vec<_>>>()?;
        let private_key = rustls_pemfile::private_key(&mut &key_pem[..])?
            .ok_or_else(|| Error::Tls("no private key found in PEM input".to_string()))?;
        Ok(Self::new(certificate_chain, private_key))
    }
}

impl fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSettings")
            .field("certificates", &self.certificate_chain.len())
            .field("mutual_auth", &self.mutual_auth)
            .finish()
    }
}

/// Server certificate verifier backed by an application predicate
struct PredicateServerVerifier {
    accept: Option<CertificateAcceptor>,
    provider: Arc<CryptoProvider>,
}

impl fmt::Debug for PredicateServerVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PredicateServerVerifier(accept={})", self.accept.is_some())
    }
}

impl ServerCertVerifier for PredicateServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match &self.accept {
            Some(accept) if accept(end_entity.as_ref()) => Ok(ServerCertVerified::assertion()),
            _ => Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::ApplicationVerificationFailure,
            )),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Client certificate verifier backed by an application predicate
struct PredicateClientVerifier {
    accept: Option<CertificateAcceptor>,
    provider: Arc<CryptoProvider>,
}

impl fmt::Debug for PredicateClientVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PredicateClientVerifier(accept={})", self.accept.is_some())
    }
}

impl ClientCertVerifier for PredicateClientVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        // Mutual auth: a client with no certificate is cut off during the
        // handshake.
        true
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        match &self.accept {
            Some(accept) if accept(end_entity.as_ref()) => Ok(ClientCertVerified::assertion()),
            _ => Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::ApplicationVerificationFailure,
            )),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// TLS transport for SIP messages
#[derive(Clone)]
pub struct TlsTransport {
    inner: Arc<StreamInner>,
    connector: TlsConnector,
}

impl TlsTransport {
    /// Bind a TLS channel to `addr` with the given identity and policy
    pub async fn bind(
        addr: SocketAddr,
        config: ChannelConfig,
        settings: TlsSettings,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let (events_tx, events_rx) = mpsc::channel(config.channel_capacity);
        let listener = bind_listener(addr)?;
        let local_addr = listener.local_addr()?;

        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());

        let server_builder = ServerConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(e.to_string()))?;
        let server_config = if settings.mutual_auth {
            server_builder.with_client_cert_verifier(Arc::new(PredicateClientVerifier {
                accept: settings.accept_client_certificate.clone(),
                provider: provider.clone(),
            }))
        } else {
            server_builder.with_no_client_auth()
        }
        .with_single_cert(
            settings.certificate_chain.clone(),
            settings.private_key.clone_key(),
        )
        .map_err(|e| Error::Tls(e.to_string()))?;
        let acceptor = TlsAcceptor::from(Arc::new(server_config));

        let client_config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(PredicateServerVerifier {
                accept: settings.accept_server_certificate.clone(),
                provider,
            }))
            .with_client_auth_cert(
                settings.certificate_chain.clone(),
                settings.private_key.clone_key(),
            )
            .map_err(|e| Error::Tls(e.to_string()))?;
        let connector = TlsConnector::from(Arc::new(client_config));

        info!("SIP TLS channel listening on {}", local_addr);

        let inner = Arc::new(StreamInner {
            local_addr,
            table: Arc::new(ConnectionTable::new()),
            events_tx: events_tx.clone(),
            config,
            closed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        });

        let accept_inner = inner.clone();
        let accept_tls = acceptor.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        if accept_inner.closed.load(Ordering::Relaxed) {
                            break;
                        }
                        warn!(error = %e, "TLS accept failed");
                        continue;
                    }
                };
                let _ = stream.set_nodelay(true);
                let acceptor = accept_tls.clone();
                let conn_inner = accept_inner.clone();
                tokio::spawn(async move {
                    match acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            let peer_cert = tls_stream
                                .get_ref()
                                .1
                                .peer_certificates()
                                .and_then(|certs| certs.first())
                                .map(|c| c.as_ref().to_vec());
                            debug!(%peer, "TLS handshake complete (server role)");
                            install_stream(
                                tls_stream,
                                peer,
                                ConnectionRole::Listener,
                                peer_cert,
                                conn_inner.stream_context(),
                            );
                        }
                        Err(e) => {
                            debug!(%peer, error = %e, "TLS handshake failed, dropping connection");
                        }
                    }
                });
            }
        });
        let prune_task = spawn_prune_task(
            inner.table.clone(),
            events_tx,
            inner.config.prune_initial_delay,
            inner.config.prune_interval,
            inner.config.prune_idle,
        );
        inner.tasks.lock().extend([accept_task, prune_task]);

        Ok((TlsTransport { inner, connector }, events_rx))
    }

    /// Send to `destination`, validating the server certificate against
    /// `server_name` instead of the destination IP
    pub async fn send_to_named(
        &self,
        bytes: Bytes,
        destination: SocketAddr,
        server_name: &str,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        self.inner.check_self_connect(destination)?;
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|e| Error::Tls(format!("invalid server name: {}", e)))?;
        self.send_or_connect(bytes, destination, name).await
    }

    async fn send_or_connect(
        &self,
        bytes: Bytes,
        destination: SocketAddr,
        server_name: ServerName<'static>,
    ) -> Result<()> {
        let inner = &self.inner;
        if let Some(writer) = inner.table.writer(destination) {
            if writer.send(bytes).await.is_ok() {
                return Ok(());
            }
            inner.table.remove(destination);
            return Err(Error::ConnectFailed(destination));
        }

        if !inner.table.begin_connect(destination, bytes) {
            return Ok(());
        }

        let connect_inner = inner.clone();
        let connector = self.connector.clone();
        tokio::spawn(async move {
            let attempt = async {
                let tcp = connect_from_ephemeral(destination).await?;
                connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| Error::Tls(e.to_string()))
            };
            match attempt.await {
                Ok(tls_stream) => {
                    let peer_cert = tls_stream
                        .get_ref()
                        .1
                        .peer_certificates()
                        .and_then(|certs| certs.first())
                        .map(|c| c.as_ref().to_vec());
                    debug!(%destination, "TLS handshake complete (client role)");
                    install_stream(
                        tls_stream,
                        destination,
                        ConnectionRole::Caller,
                        peer_cert,
                        connect_inner.stream_context(),
                    );
                    flush_pending(&connect_inner, destination).await;
                }
                Err(e) => {
                    warn!(%destination, error = %e, "TLS connect failed");
                    let _ = connect_inner.table.take_pending(destination);
                    let _ = connect_inner
                        .events_tx
                        .send(TransportEvent::ConnectionFailed { destination })
                        .await;
                }
            }
        });
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport for TlsTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    async fn send(&self, bytes: Bytes, destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        self.inner.check_self_connect(destination)?;
        let name = ServerName::IpAddress(destination.ip().into());
        self.send_or_connect(bytes, destination, name).await
    }

    fn is_reliable(&self) -> bool {
        true
    }

    fn is_secure(&self) -> bool {
        true
    }

    fn is_connected(&self, peer: SocketAddr) -> bool {
        self.inner.table.is_connected(peer)
    }

    fn peer_certificate(&self, peer: SocketAddr) -> Option<Vec<u8>> {
        self.inner.table.peer_certificate(peer)
    }

    async fn close(&self) -> Result<()> {
        if self.inner.shutdown().await {
            info!("SIP TLS channel {} closed", self.inner.local_addr);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for TlsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TlsTransport({})", self.inner.local_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept_any() -> CertificateAcceptor {
        Arc::new(|_der: &[u8]| true)
    }

    fn self_signed(name: &str) -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
        let cert = rcgen::generate_simple_self_signed(vec![name.to_string()]).unwrap();
        let der = CertificateDer::from(cert.serialize_der().unwrap());
        let key = PrivateKeyDer::from(tokio_rustls::rustls::pki_types::PrivatePkcs8KeyDer::from(
            cert.serialize_private_key_der(),
        ));
        (vec![der], key)
    }

    fn settings(name: &str) -> TlsSettings {
        let (chain, key) = self_signed(name);
        let mut settings = TlsSettings::new(chain, key);
        settings.accept_server_certificate = Some(accept_any());
        settings.accept_client_certificate = Some(accept_any());
        settings
    }

    fn sip_message() -> Vec<u8> {
        b"OPTIONS sip:b@example.com SIP/2.0\r\nCall-ID: tls1\r\nCSeq: 1 OPTIONS\r\nContent-Length: 0\r\n\r\n"
            .to_vec()
    }

    async fn bind_channel(
        settings: TlsSettings,
    ) -> (TlsTransport, mpsc::Receiver<TransportEvent>) {
        TlsTransport::bind(
            "127.0.0.1:0".parse().unwrap(),
            ChannelConfig::default(),
            settings,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_tls_send_receive() {
        let (server, mut server_rx) = bind_channel(settings("server.test")).await;
        let (client, _client_rx) = bind_channel(settings("client.test")).await;
        let dest = server.local_addr().unwrap();

        let msg = sip_message();
        client.send(Bytes::from(msg.clone()), dest).await.unwrap();

        match server_rx.recv().await.unwrap() {
            TransportEvent::MessageReceived { bytes, .. } => assert_eq!(&bytes[..], &msg[..]),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(server.is_secure());
    }

    #[tokio::test]
    async fn test_peer_certificate_exposed() {
        let (server_chain, server_key) = self_signed("server.test");
        let server_der = server_chain[0].as_ref().to_vec();
        let mut server_settings = TlsSettings::new(server_chain, server_key);
        server_settings.accept_server_certificate = Some(accept_any());

        let (server, mut server_rx) = bind_channel(server_settings).await;
        let (client, _client_rx) = bind_channel(settings("client.test")).await;
        let dest = server.local_addr().unwrap();

        client.send(Bytes::from(sip_message()), dest).await.unwrap();
        // Wait for the message to confirm the connection is live.
        server_rx.recv().await.unwrap();

        assert_eq!(client.peer_certificate(dest), Some(server_der));
    }

    #[tokio::test]
    async fn test_mutual_auth_round_trip() {
        let mut server_settings = settings("server.test");
        server_settings.mutual_auth = true;
        let (server, mut server_rx) = bind_channel(server_settings).await;
        let (client, _client_rx) = bind_channel(settings("client.test")).await;
        let dest = server.local_addr().unwrap();

        client.send(Bytes::from(sip_message()), dest).await.unwrap();
        match server_rx.recv().await.unwrap() {
            TransportEvent::MessageReceived { source, .. } => {
                // The client certificate is available to upper layers.
                assert!(server.peer_certificate(source).is_some());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejecting_predicate_blocks_connection() {
        let (server, _server_rx) = bind_channel(settings("server.test")).await;
        let (client_chain, client_key) = self_signed("client.test");
        let mut client_settings = TlsSettings::new(client_chain, client_key);
        client_settings.accept_server_certificate = Some(Arc::new(|_| false));
        let (client, mut client_rx) = bind_channel(client_settings).await;
        let dest = server.local_addr().unwrap();

        client.send(Bytes::from(sip_message()), dest).await.unwrap();
        loop {
            match client_rx.recv().await.unwrap() {
                TransportEvent::ConnectionFailed { destination } => {
                    assert_eq!(destination, dest);
                    break;
                }
                _ => continue,
            }
        }
    }
}
