//! Media session tests over loopback sockets.

use std::time::Duration;

use bytes::Bytes;
use voxstack_rtp_core::qos::MediaType;
use voxstack_rtp_core::session::{rtcp_endpoint, SessionEncryption};
use voxstack_rtp_core::srtp::{SrtpCryptoKey, SrtpCryptoSuite};
use voxstack_rtp_core::{RtpSession, RtpSessionConfig, RtpSessionEvent};

fn local(port: u16) -> std::net::SocketAddr {
    format!("127.0.0.1:{}", port).parse().unwrap()
}

/// A linked pair of sessions, A's remote pointing at B and vice versa.
async fn session_pair(
    encryption_a: SessionEncryption,
    encryption_b: SessionEncryption,
    rtcp_interval: Duration,
) -> (
    (RtpSession, tokio::sync::mpsc::Receiver<RtpSessionEvent>),
    (RtpSession, tokio::sync::mpsc::Receiver<RtpSessionEvent>),
) {
    // Bind B first on ephemeral ports, then point A at it; B's remote is
    // fixed up by binding A to known ports as well.
    let probe_a = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let a_rtp = probe_a.local_addr().unwrap();
    drop(probe_a);
    let probe_b = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let b_rtp = probe_b.local_addr().unwrap();
    drop(probe_b);

    let mut config_a = RtpSessionConfig::audio(a_rtp, b_rtp, "alice@example.com");
    config_a.rtcp_interval = rtcp_interval;
    config_a.encryption = encryption_a;
    let mut config_b = RtpSessionConfig::audio(b_rtp, a_rtp, "bob@example.com");
    config_b.rtcp_interval = rtcp_interval;
    config_b.encryption = encryption_b;

    let a = RtpSession::start(config_a).await.unwrap();
    let b = RtpSession::start(config_b).await.unwrap();
    (a, b)
}

fn sdes(key_byte: u8, other_byte: u8) -> SessionEncryption {
    SessionEncryption::Sdes {
        suite: SrtpCryptoSuite::AES_CM_128_HMAC_SHA1_80,
        local_key: SrtpCryptoKey::new(vec![key_byte; 16], vec![key_byte; 14]).unwrap(),
        remote_key: SrtpCryptoKey::new(vec![other_byte; 16], vec![other_byte; 14]).unwrap(),
    }
}

#[tokio::test]
async fn test_plaintext_media_round_trip() {
    let ((a, _a_rx), (b, mut b_rx)) = session_pair(
        SessionEncryption::None,
        SessionEncryption::None,
        Duration::from_secs(60),
    )
    .await;

    let packet = a.build_packet(Bytes::from_static(&[0xAA; 20]), 160);
    a.send_packet(packet.clone()).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match b_rx.recv().await.unwrap() {
                RtpSessionEvent::PacketReceived(p) => break p,
                _ => continue,
            }
        }
    })
    .await
    .expect("packet should arrive");
    assert_eq!(received.payload, packet.payload);
    assert_eq!(received.header.ssrc, a.ssrc());

    a.close().await.unwrap();
    b.close().await.unwrap();
}

#[tokio::test]
async fn test_sdes_srtp_media_round_trip() {
    // A encrypts with key 1, B decrypts A's stream with key 1; B encrypts
    // with key 2, which A expects.
    let ((a, _a_rx), (b, mut b_rx)) = session_pair(
        sdes(1, 2),
        sdes(2, 1),
        Duration::from_secs(60),
    )
    .await;

    let packet = a.build_packet(Bytes::from_static(&[0x42; 20]), 160);
    a.send_packet(packet.clone()).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match b_rx.recv().await.unwrap() {
                RtpSessionEvent::PacketReceived(p) => break p,
                _ => continue,
            }
        }
    })
    .await
    .expect("decrypted packet should arrive");
    assert_eq!(received.payload, packet.payload);

    a.close().await.unwrap();
    b.close().await.unwrap();
}

#[tokio::test]
async fn test_mismatched_sdes_keys_drop_media() {
    // B expects key 3 but A encrypts with key 1: authentication fails and
    // nothing surfaces.
    let ((a, _a_rx), (b, mut b_rx)) = session_pair(
        sdes(1, 2),
        sdes(2, 3),
        Duration::from_secs(60),
    )
    .await;

    let packet = a.build_packet(Bytes::from_static(&[0x42; 20]), 160);
    a.send_packet(packet).await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_millis(500), async {
        loop {
            match b_rx.recv().await {
                Some(RtpSessionEvent::PacketReceived(_)) => break,
                Some(_) => continue,
                None => std::future::pending::<()>().await,
            }
        }
    })
    .await;
    assert!(outcome.is_err(), "tampered stream must not surface packets");

    a.close().await.unwrap();
    b.close().await.unwrap();
}

#[tokio::test]
async fn test_rtcp_keepalive_cadence() {
    // Short interval; nothing sent: the empty SR + SDES keepalive still
    // goes out and the peer receives it.
    let ((a, mut a_rx), (b, mut b_rx)) = session_pair(
        SessionEncryption::None,
        SessionEncryption::None,
        Duration::from_millis(200),
    )
    .await;

    let sent = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match a_rx.recv().await.unwrap() {
                RtpSessionEvent::RtcpSent(compound) => break compound,
                _ => continue,
            }
        }
    })
    .await
    .expect("periodic RTCP should be emitted");

    let sr = sent.sender_report().expect("compound starts with an SR");
    assert_eq!(sr.sender_packet_count, 0);
    assert!(sr.report_blocks.is_empty());
    assert_eq!(
        sent.sdes().unwrap().cname(),
        Some("alice@example.com")
    );

    let received = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match b_rx.recv().await.unwrap() {
                RtpSessionEvent::RtcpReceived(compound) => break compound,
                _ => continue,
            }
        }
    })
    .await
    .expect("peer should receive the compound");
    assert_eq!(
        received.sdes().unwrap().cname(),
        Some("alice@example.com")
    );

    a.close().await.unwrap();
    b.close().await.unwrap();
}

#[tokio::test]
async fn test_sender_report_carries_send_stats() {
    let ((a, mut a_rx), (b, _b_rx)) = session_pair(
        SessionEncryption::None,
        SessionEncryption::None,
        Duration::from_millis(200),
    )
    .await;

    for _ in 0..3 {
        let packet = a.build_packet(Bytes::from_static(&[0x11; 20]), 160);
        a.send_packet(packet).await.unwrap();
    }

    let sent = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match a_rx.recv().await.unwrap() {
                RtpSessionEvent::RtcpSent(compound) => break compound,
                _ => continue,
            }
        }
    })
    .await
    .unwrap();
    let sr = sent.sender_report().unwrap();
    assert_eq!(sr.sender_packet_count, 3);
    assert_eq!(sr.sender_octet_count, 60);

    a.close().await.unwrap();
    b.close().await.unwrap();
}

#[tokio::test]
async fn test_receive_snapshot_after_media() {
    let ((a, _a_rx), (b, mut b_rx)) = session_pair(
        SessionEncryption::None,
        SessionEncryption::None,
        Duration::from_secs(60),
    )
    .await;

    // send_payload stamps timestamps from the configured packet rate
    // (8000 Hz / 50 pps = 160 samples per packet).
    for _ in 0..5 {
        a.send_payload(Bytes::from_static(&[0x33; 20])).await.unwrap();
    }
    for _ in 0..5 {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match b_rx.recv().await.unwrap() {
                    RtpSessionEvent::PacketReceived(_) => break,
                    _ => continue,
                }
            }
        })
        .await
        .unwrap();
    }

    let snapshot = b.receive_snapshot().expect("stats exist after media");
    assert_eq!(snapshot.packets_received, 5);
    assert_eq!(snapshot.packets_expected, 5);
    assert_eq!(snapshot.dropped, 0);
    assert_eq!(snapshot.ssrc, a.ssrc());
    assert!(snapshot.mos >= 1.0 && snapshot.mos <= 4.5);

    a.close().await.unwrap();
    b.close().await.unwrap();
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let ((a, mut a_rx), (b, _b_rx)) = session_pair(
        SessionEncryption::None,
        SessionEncryption::None,
        Duration::from_secs(60),
    )
    .await;
    a.close().await.unwrap();
    a.close().await.unwrap();
    assert!(a.is_closed());
    assert!(a
        .send_packet(a.build_packet(Bytes::new(), 160))
        .await
        .is_err());
    loop {
        match a_rx.recv().await {
            Some(RtpSessionEvent::Closed) => break,
            Some(_) => continue,
            None => panic!("expected Closed event"),
        }
    }
    b.close().await.unwrap();
}

#[test]
fn test_rfc3605_rtcp_endpoint_derivation() {
    let rtp = local(49170);
    // No attribute: RTP + 1.
    assert_eq!(rtcp_endpoint(rtp, None, None), local(49171));
    // Port-only attribute.
    assert_eq!(rtcp_endpoint(rtp, Some(53020), None), local(53020));
    // Port and address.
    let addr = "198.51.100.5".parse().unwrap();
    assert_eq!(
        rtcp_endpoint(rtp, Some(53020), Some(addr)),
        "198.51.100.5:53020".parse().unwrap()
    );
}

#[test]
fn test_media_type_reexports() {
    // The session config speaks the QoS vocabulary.
    let config = RtpSessionConfig::audio(local(0), local(2), "x");
    assert_eq!(config.media_type, MediaType::Audio);
    assert_eq!(config.clock_rate, 8000);
}
