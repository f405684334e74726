//! The media channel: a pair of UDP sockets (RTP + RTCP), per-direction
//! SRTP protection, receive statistics, and periodic compound RTCP
//! emission.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::dtls::DtlsTransport;
use crate::error::Error;
use crate::packet::rtcp::{
    NtpTimestamp, RtcpCompoundPacket, RtcpGoodbye, RtcpPacket, RtcpSdes, RtcpSenderReport,
};
use crate::packet::RtpPacket;
use crate::qos::{default_dscp, mark_socket, MediaType};
use crate::srtp::{SrtpCryptoKey, SrtpCryptoSuite, SrtpTransformer};
use crate::stats::{ReceiveStats, ReceiveStatsSnapshot, SendStats};
use crate::{Result, RtpSsrc, RtpTimestamp};

/// Default RTCP report interval
pub const DEFAULT_RTCP_INTERVAL: Duration = Duration::from_secs(5);

/// How the media path is protected
pub enum SessionEncryption {
    /// Plain RTP
    None,
    /// SDES-SRTP: keys exchanged in SDP crypto attributes
    Sdes {
        suite: SrtpCryptoSuite,
        /// Key we encrypt with (our inline parameter)
        local_key: SrtpCryptoKey,
        /// Key the peer encrypts with
        remote_key: SrtpCryptoKey,
    },
    /// DTLS-SRTP: the protector finishes its handshake before media flows
    Dtls(Box<dyn DtlsTransport>),
}

impl std::fmt::Debug for SessionEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEncryption::None => write!(f, "None"),
            SessionEncryption::Sdes { suite, .. } => write!(f, "Sdes({:?})", suite.encryption),
            SessionEncryption::Dtls(_) => write!(f, "Dtls"),
        }
    }
}

/// Derive the RTCP endpoint for a media description (RFC 3605): use the
/// `rtcp` attribute's port and optional address when present, otherwise
/// RTP port + 1
pub fn rtcp_endpoint(
    rtp: SocketAddr,
    rtcp_attribute_port: Option<u16>,
    rtcp_attribute_addr: Option<IpAddr>,
) -> SocketAddr {
    match rtcp_attribute_port {
        Some(port) => SocketAddr::new(rtcp_attribute_addr.unwrap_or_else(|| rtp.ip()), port),
        None => SocketAddr::new(rtp.ip(), rtp.port().wrapping_add(1)),
    }
}

/// Parameters for one media session, already negotiated
#[derive(Debug)]
pub struct RtpSessionConfig {
    /// Local RTP socket address
    pub local_rtp_addr: SocketAddr,
    /// Local RTCP socket address; RTP port + 1 when absent
    pub local_rtcp_addr: Option<SocketAddr>,
    /// Peer RTP endpoint
    pub remote_rtp_addr: SocketAddr,
    /// Peer RTCP endpoint; RTP port + 1 when absent
    pub remote_rtcp_addr: Option<SocketAddr>,
    /// Traffic kind, used for DSCP marking and MOS applicability
    pub media_type: MediaType,
    /// RTP payload type for outgoing packets
    pub payload_type: u8,
    /// Sample clock rate (audio default 8000)
    pub clock_rate: u32,
    /// Nominal packet rate, used to size payload timestamps (audio default
    /// 50, i.e. 20 ms packets; 0 disables the derived increment)
    pub packets_per_second: u32,
    /// Our SSRC; random when absent
    pub ssrc: Option<RtpSsrc>,
    /// Canonical name carried in SDES
    pub cname: String,
    /// Whether periodic RTCP reports are emitted
    pub rtcp_enabled: bool,
    /// RTCP report interval
    pub rtcp_interval: Duration,
    /// DSCP override; per-media-type default when absent
    pub dscp: Option<u8>,
    /// Media protection
    pub encryption: SessionEncryption,
}

impl RtpSessionConfig {
    /// Audio session defaults for the given addresses
    pub fn audio(local_rtp: SocketAddr, remote_rtp: SocketAddr, cname: impl Into<String>) -> Self {
        Self {
            local_rtp_addr: local_rtp,
            local_rtcp_addr: None,
            remote_rtp_addr: remote_rtp,
            remote_rtcp_addr: None,
            media_type: MediaType::Audio,
            payload_type: 0,
            clock_rate: 8000,
            packets_per_second: 50,
            ssrc: None,
            cname: cname.into(),
            rtcp_enabled: true,
            rtcp_interval: DEFAULT_RTCP_INTERVAL,
            dscp: None,
            encryption: SessionEncryption::None,
        }
    }
}

/// Events surfaced by a media session
#[derive(Debug)]
pub enum RtpSessionEvent {
    /// A media packet arrived (already decrypted)
    PacketReceived(RtpPacket),
    /// A media packet left (pre-encryption form)
    PacketSent(RtpPacket),
    /// An RTCP compound packet arrived
    RtcpReceived(RtcpCompoundPacket),
    /// An RTCP compound packet was emitted
    RtcpSent(RtcpCompoundPacket),
    /// The DTLS handshake failed; the session is unusable
    DtlsFailed { is_server: bool, remote: SocketAddr },
    /// The session closed
    Closed,
}

/// A single RTP/RTCP media session
#[derive(Clone)]
pub struct RtpSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    ssrc: RtpSsrc,
    payload_type: u8,
    clock_rate: u32,
    samples_per_packet: u32,
    media_type: MediaType,
    cname: String,
    remote_rtp_addr: SocketAddr,
    remote_rtcp_addr: SocketAddr,
    rtcp_enabled: bool,
    rtcp_interval: Duration,

    rtp_socket: Arc<UdpSocket>,
    rtcp_socket: Arc<UdpSocket>,
    events_tx: mpsc::Sender<RtpSessionEvent>,

    send_stats: Mutex<SendStats>,
    recv_stats: Mutex<Option<ReceiveStats>>,
    /// (middle 32 bits of the last SR's NTP timestamp, arrival instant)
    last_sr: Mutex<Option<(u32, Instant)>>,

    /// SDES-SRTP transformers, one per direction
    outbound_srtp: Mutex<Option<SrtpTransformer>>,
    inbound_srtp: Mutex<Option<SrtpTransformer>>,
    /// Negotiated DTLS-SRTP protector, installed after the handshake
    dtls: Mutex<Option<Box<dyn DtlsTransport>>>,

    sequence: AtomicU16,
    timestamp: AtomicU32,
    closed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RtpSession {
    /// Bind the RTP and RTCP sockets, mark DSCP, and run the DTLS
    /// handshake when configured. Receive tasks and the RTCP timer start
    /// before this returns.
    pub async fn start(
        config: RtpSessionConfig,
    ) -> Result<(Self, mpsc::Receiver<RtpSessionEvent>)> {
        let (events_tx, events_rx) = mpsc::channel(100);

        let local_rtcp = config.local_rtcp_addr.unwrap_or_else(|| {
            SocketAddr::new(
                config.local_rtp_addr.ip(),
                config.local_rtp_addr.port().wrapping_add(1),
            )
        });
        let rtp_socket = Arc::new(UdpSocket::bind(config.local_rtp_addr).await?);
        let rtcp_socket = Arc::new(UdpSocket::bind(local_rtcp).await?);

        let dscp = config.dscp.unwrap_or_else(|| default_dscp(config.media_type));
        for socket in [&rtp_socket, &rtcp_socket] {
            if let Err(e) = mark_socket(socket, dscp) {
                // Some environments refuse TOS writes; media still flows.
                warn!(error = %e, "DSCP marking failed");
            }
        }

        let remote_rtcp = config
            .remote_rtcp_addr
            .unwrap_or_else(|| rtcp_endpoint(config.remote_rtp_addr, None, None));
        let ssrc = config.ssrc.unwrap_or_else(|| rand::thread_rng().gen());

        let mut outbound_srtp = None;
        let mut inbound_srtp = None;
        let mut dtls_transport = None;
        match config.encryption {
            SessionEncryption::None => {}
            SessionEncryption::Sdes {
                suite,
                local_key,
                remote_key,
            } => {
                outbound_srtp = Some(SrtpTransformer::new(suite, local_key)?);
                inbound_srtp = Some(SrtpTransformer::new(suite, remote_key)?);
            }
            SessionEncryption::Dtls(mut transport) => {
                // The handshake exclusively owns the RTP socket; listen
                // tasks only start after it succeeds.
                let is_server = transport.is_server();
                match transport
                    .do_handshake(rtp_socket.clone(), config.remote_rtp_addr)
                    .await
                {
                    Ok(()) => {
                        info!(remote = %config.remote_rtp_addr, "DTLS-SRTP handshake complete");
                        dtls_transport = Some(transport);
                    }
                    Err(e) => {
                        warn!(remote = %config.remote_rtp_addr, error = %e, "DTLS-SRTP handshake failed");
                        let _ = events_tx
                            .send(RtpSessionEvent::DtlsFailed {
                                is_server,
                                remote: config.remote_rtp_addr,
                            })
                            .await;
                        return Err(Error::DtlsError(format!("handshake failed: {}", e)));
                    }
                }
            }
        }

        let samples_per_packet = if config.packets_per_second > 0 {
            config.clock_rate / config.packets_per_second
        } else {
            0
        };
        let inner = Arc::new(SessionInner {
            ssrc,
            payload_type: config.payload_type,
            clock_rate: config.clock_rate,
            samples_per_packet,
            media_type: config.media_type,
            cname: config.cname,
            remote_rtp_addr: config.remote_rtp_addr,
            remote_rtcp_addr: remote_rtcp,
            rtcp_enabled: config.rtcp_enabled,
            rtcp_interval: config.rtcp_interval,
            rtp_socket,
            rtcp_socket,
            events_tx,
            send_stats: Mutex::new(SendStats::new()),
            recv_stats: Mutex::new(None),
            last_sr: Mutex::new(None),
            outbound_srtp: Mutex::new(outbound_srtp),
            inbound_srtp: Mutex::new(inbound_srtp),
            dtls: Mutex::new(dtls_transport),
            sequence: AtomicU16::new(rand::thread_rng().gen()),
            timestamp: AtomicU32::new(rand::thread_rng().gen()),
            closed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        });

        let session = RtpSession { inner };
        session.spawn_rtp_receive_task();
        session.spawn_rtcp_receive_task();
        if session.inner.rtcp_enabled {
            session.spawn_rtcp_timer_task();
        }
        info!(
            ssrc,
            rtp = %session.inner.rtp_socket.local_addr()?,
            rtcp = %session.inner.rtcp_socket.local_addr()?,
            "Media session started"
        );
        Ok((session, events_rx))
    }

    /// Our synchronization source
    pub fn ssrc(&self) -> RtpSsrc {
        self.inner.ssrc
    }

    /// Local RTP socket address
    pub fn local_rtp_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.rtp_socket.local_addr()?)
    }

    /// Local RTCP socket address
    pub fn local_rtcp_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.rtcp_socket.local_addr()?)
    }

    /// Build an outgoing packet from `payload`, advancing the session's
    /// sequence number and timestamp
    pub fn build_packet(&self, payload: Bytes, timestamp_increment: RtpTimestamp) -> RtpPacket {
        let seq = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
        let ts = self
            .inner
            .timestamp
            .fetch_add(timestamp_increment, Ordering::Relaxed);
        RtpPacket::new_with_payload(self.inner.payload_type, seq, ts, self.inner.ssrc, payload)
    }

    /// Build and send one payload, timestamped by the configured nominal
    /// packet rate
    pub async fn send_payload(&self, payload: Bytes) -> Result<()> {
        let packet = self.build_packet(payload, self.inner.samples_per_packet);
        self.send_packet(packet).await
    }

    /// Send one RTP packet: update statistics, protect, transmit.
    /// Transmission errors are swallowed; the packet is simply lost.
    pub async fn send_packet(&self, packet: RtpPacket) -> Result<()> {
        if self.inner.closed.load(Ordering::Relaxed) {
            return Err(Error::SessionError("session closed".to_string()));
        }
        let wire = packet.serialize()?;
        self.inner.send_stats.lock().on_packet(&packet);

        let protected = self.protect_rtp(&wire)?;
        if let Err(e) = self
            .inner
            .rtp_socket
            .send_to(&protected, self.inner.remote_rtp_addr)
            .await
        {
            debug!(error = %e, "RTP send failed");
        }
        let _ = self
            .inner
            .events_tx
            .send(RtpSessionEvent::PacketSent(packet))
            .await;
        Ok(())
    }

    /// Announce departure with an RTCP BYE
    pub async fn send_bye(&self, reason: Option<&str>) -> Result<()> {
        let bye = match reason {
            Some(reason) => RtcpGoodbye::with_reason(self.inner.ssrc, reason),
            None => RtcpGoodbye::new(self.inner.ssrc),
        };
        let mut compound = RtcpCompoundPacket::with_report(RtcpPacket::SenderReport(
            self.inner.build_sender_report(),
        ));
        compound.push(RtcpPacket::Goodbye(bye));
        self.inner.send_rtcp(&compound).await
    }

    /// Interval statistics for the receive stream, if packets have arrived.
    /// The MOS figure only applies to audio; other media report zero.
    pub fn receive_snapshot(&self) -> Option<ReceiveStatsSnapshot> {
        let mut snapshot = self.inner.recv_stats.lock().as_mut().map(|s| s.snapshot())?;
        if self.inner.media_type != MediaType::Audio {
            snapshot.mos = 0.0;
        }
        Some(snapshot)
    }

    /// Shut the session down. Idempotent; aborts the receive and timer
    /// tasks and emits `Closed`.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for handle in self.inner.tasks.lock().drain(..) {
            handle.abort();
        }
        let _ = self.inner.events_tx.send(RtpSessionEvent::Closed).await;
        info!(ssrc = self.inner.ssrc, "Media session closed");
        Ok(())
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }

    fn protect_rtp(&self, wire: &[u8]) -> Result<Bytes> {
        if let Some(transformer) = self.inner.outbound_srtp.lock().as_mut() {
            return transformer.transform_rtp(wire);
        }
        if let Some(dtls) = self.inner.dtls.lock().as_mut() {
            return dtls.protect_rtp(wire);
        }
        Ok(Bytes::copy_from_slice(wire))
    }

    fn spawn_rtp_receive_task(&self) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; 65535];
            loop {
                let (len, source) = match inner.rtp_socket.recv_from(&mut buf).await {
                    Ok(pair) => pair,
                    Err(e) => {
                        if inner.closed.load(Ordering::Relaxed) {
                            break;
                        }
                        if e.kind() == std::io::ErrorKind::ConnectionReset {
                            continue;
                        }
                        warn!(error = %e, "RTP receive failed");
                        continue;
                    }
                };
                if len == 0 {
                    continue;
                }
                trace!(%source, len, "RTP datagram received");

                let plain = {
                    let unprotected = if let Some(t) = inner.inbound_srtp.lock().as_mut() {
                        t.reverse_transform_rtp(&buf[..len])
                    } else if let Some(d) = inner.dtls.lock().as_mut() {
                        d.unprotect_rtp(&buf[..len])
                    } else {
                        Ok(Bytes::copy_from_slice(&buf[..len]))
                    };
                    match unprotected {
                        Ok(plain) => plain,
                        Err(e) => {
                            // Auth/replay failures drop the packet and leave
                            // the replay state untouched.
                            debug!(%source, error = %e, "Dropping unprotectable RTP packet");
                            continue;
                        }
                    }
                };

                let packet = match RtpPacket::parse(&plain) {
                    Ok(packet) => packet,
                    Err(e) => {
                        trace!(%source, error = %e, "Dropping malformed RTP packet");
                        continue;
                    }
                };

                {
                    let mut guard = inner.recv_stats.lock();
                    let stats = guard.get_or_insert_with(|| {
                        ReceiveStats::new(packet.header.ssrc, inner.clock_rate)
                    });
                    stats.on_packet(
                        packet.header.sequence_number,
                        packet.header.timestamp,
                        Instant::now(),
                    );
                }

                if inner
                    .events_tx
                    .send(RtpSessionEvent::PacketReceived(packet))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
        self.inner.tasks.lock().push(handle);
    }

    fn spawn_rtcp_receive_task(&self) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; 65535];
            loop {
                let (len, source) = match inner.rtcp_socket.recv_from(&mut buf).await {
                    Ok(pair) => pair,
                    Err(e) => {
                        if inner.closed.load(Ordering::Relaxed) {
                            break;
                        }
                        if e.kind() == std::io::ErrorKind::ConnectionReset {
                            continue;
                        }
                        warn!(error = %e, "RTCP receive failed");
                        continue;
                    }
                };
                if len < 8 {
                    continue;
                }

                let plain = {
                    let unprotected = if let Some(t) = inner.inbound_srtp.lock().as_mut() {
                        t.reverse_transform_rtcp(&buf[..len])
                    } else if let Some(d) = inner.dtls.lock().as_mut() {
                        d.unprotect_rtcp(&buf[..len])
                    } else {
                        Ok(Bytes::copy_from_slice(&buf[..len]))
                    };
                    match unprotected {
                        Ok(plain) => plain,
                        Err(e) => {
                            debug!(%source, error = %e, "Dropping unprotectable RTCP packet");
                            continue;
                        }
                    }
                };

                let compound = match RtcpCompoundPacket::parse(&plain) {
                    Ok(compound) => compound,
                    Err(e) => {
                        trace!(%source, error = %e, "Dropping malformed RTCP packet");
                        continue;
                    }
                };

                if let Some(sr) = compound.sender_report() {
                    inner.on_sender_report(sr);
                }

                if inner
                    .events_tx
                    .send(RtpSessionEvent::RtcpReceived(compound))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
        self.inner.tasks.lock().push(handle);
    }

    fn spawn_rtcp_timer_task(&self) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(
                tokio::time::Instant::now() + inner.rtcp_interval,
                inner.rtcp_interval,
            );
            loop {
                interval.tick().await;
                if inner.closed.load(Ordering::Relaxed) {
                    break;
                }
                let compound = inner.build_report_compound();
                if let Err(e) = inner.send_rtcp(&compound).await {
                    debug!(error = %e, "Periodic RTCP send failed");
                }
            }
        });
        self.inner.tasks.lock().push(handle);
    }
}

impl SessionInner {
    /// The periodic SR + SDES compound. With nothing sent yet the SR goes
    /// out empty as a keepalive binding SSRC to CNAME.
    fn build_report_compound(&self) -> RtcpCompoundPacket {
        let mut compound =
            RtcpCompoundPacket::with_report(RtcpPacket::SenderReport(self.build_sender_report()));
        compound.push(RtcpPacket::SourceDescription(RtcpSdes::with_cname(
            self.ssrc,
            self.cname.clone(),
        )));
        compound
    }

    fn build_sender_report(&self) -> RtcpSenderReport {
        let mut sr = RtcpSenderReport::new(self.ssrc);
        sr.ntp_timestamp = NtpTimestamp::now();
        {
            let send_stats = self.send_stats.lock();
            sr.rtp_timestamp = send_stats.last_rtp_timestamp();
            sr.sender_packet_count = send_stats.packets_sent();
            sr.sender_octet_count = send_stats.octets_sent();
        }
        // One report block for the stream we receive, once it exists.
        let last_sr = *self.last_sr.lock();
        if let Some(stats) = self.recv_stats.lock().as_mut() {
            let (lsr, dlsr) = match last_sr {
                Some((lsr, at)) => {
                    let elapsed = at.elapsed().as_secs_f64();
                    (lsr, (elapsed * 65536.0) as u32)
                }
                None => (0, 0),
            };
            sr.add_report_block(stats.report_block(lsr, dlsr));
        }
        sr
    }

    fn on_sender_report(&self, sr: &RtcpSenderReport) {
        *self.last_sr.lock() = Some((sr.ntp_timestamp.to_u32(), Instant::now()));
        if let Some(stats) = self.recv_stats.lock().as_mut() {
            let arrival = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();
            stats.on_sender_ntp(sr.ntp_timestamp.to_duration_since_unix_epoch(), arrival);
        }
    }

    async fn send_rtcp(&self, compound: &RtcpCompoundPacket) -> Result<()> {
        let wire = compound.serialize()?;
        let protected = {
            if let Some(t) = self.outbound_srtp.lock().as_mut() {
                t.transform_rtcp(&wire)?
            } else if let Some(d) = self.dtls.lock().as_mut() {
                d.protect_rtcp(&wire)?
            } else {
                wire
            }
        };
        if let Err(e) = self
            .rtcp_socket
            .send_to(&protected, self.remote_rtcp_addr)
            .await
        {
            debug!(error = %e, "RTCP send failed");
        }
        let _ = self
            .events_tx
            .send(RtpSessionEvent::RtcpSent(compound.clone()))
            .await;
        Ok(())
    }
}

impl std::fmt::Debug for RtpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RtpSession(ssrc={:#010x}, remote={})",
            self.inner.ssrc, self.inner.remote_rtp_addr
        )
    }
}
