//! Per-source receive statistics: extended sequence tracking, loss and
//! reorder counters, jitter, and interval snapshots.

use std::time::{Duration, Instant, SystemTime};

use crate::stats::jitter::JitterEstimator;
use crate::stats::mos::estimate_mos;
use crate::packet::rtcp::RtcpReportBlock;
use crate::{RtpSequenceNumber, RtpSsrc};

/// Arrivals further than this ahead of the highest sequence seen are
/// treated as out of order rather than advancing the extended sequence.
const REORDER_WINDOW: u16 = 2000;

/// Min/avg/max of a jitter measurement over one sample interval
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JitterInterval {
    /// Minimum in timestamp units
    pub min_units: f64,
    /// Average in timestamp units
    pub avg_units: f64,
    /// Maximum in timestamp units
    pub max_units: f64,
    /// Minimum in milliseconds
    pub min_ms: f64,
    /// Average in milliseconds
    pub avg_ms: f64,
    /// Maximum in milliseconds
    pub max_ms: f64,
}

#[derive(Debug, Default)]
struct IntervalAccumulator {
    count: u64,
    smoothed_min: f64,
    smoothed_max: f64,
    smoothed_sum: f64,
    instant_min: f64,
    instant_max: f64,
    instant_sum: f64,
}

impl IntervalAccumulator {
    fn add(&mut self, smoothed: f64, instantaneous: f64) {
        if self.count == 0 {
            self.smoothed_min = smoothed;
            self.smoothed_max = smoothed;
            self.instant_min = instantaneous;
            self.instant_max = instantaneous;
        } else {
            self.smoothed_min = self.smoothed_min.min(smoothed);
            self.smoothed_max = self.smoothed_max.max(smoothed);
            self.instant_min = self.instant_min.min(instantaneous);
            self.instant_max = self.instant_max.max(instantaneous);
        }
        self.smoothed_sum += smoothed;
        self.instant_sum += instantaneous;
        self.count += 1;
    }

    fn smoothed(&self, to_ms: impl Fn(f64) -> f64) -> JitterInterval {
        self.interval(self.smoothed_min, self.smoothed_max, self.smoothed_sum, to_ms)
    }

    fn instantaneous(&self, to_ms: impl Fn(f64) -> f64) -> JitterInterval {
        self.interval(self.instant_min, self.instant_max, self.instant_sum, to_ms)
    }

    fn interval(
        &self,
        min: f64,
        max: f64,
        sum: f64,
        to_ms: impl Fn(f64) -> f64,
    ) -> JitterInterval {
        let avg = if self.count > 0 {
            sum / self.count as f64
        } else {
            0.0
        };
        JitterInterval {
            min_units: min,
            avg_units: avg,
            max_units: max,
            min_ms: to_ms(min),
            avg_ms: to_ms(avg),
            max_ms: to_ms(max),
        }
    }
}

/// Snapshot of one sample interval of receive statistics
#[derive(Debug, Clone)]
pub struct ReceiveStatsSnapshot {
    /// Wall-clock time the snapshot was taken
    pub sample_time: SystemTime,
    /// Length of the sampled interval
    pub sample_duration: Duration,
    /// Packets received over the stream's lifetime
    pub packets_received: u64,
    /// Packets expected from the sequence number span
    pub packets_expected: u64,
    /// Expected-but-never-received packets
    pub dropped: u64,
    /// Arrivals outside the reorder window
    pub out_of_order: u64,
    /// Smoothed jitter over the interval
    pub smoothed_jitter: JitterInterval,
    /// Instantaneous jitter over the interval
    pub instantaneous_jitter: JitterInterval,
    /// 32-bit extended highest sequence number (65536*ROC + SEQ)
    pub extended_last_seq: u32,
    /// Source being measured
    pub ssrc: RtpSsrc,
    /// Estimated Mean Opinion Score (meaningful for audio)
    pub mos: f32,
    /// One-way delay estimate in milliseconds
    pub one_way_delay_ms: f64,
}

/// Receive-side statistics for one SSRC
pub struct ReceiveStats {
    ssrc: RtpSsrc,
    started_at: Instant,
    interval_started_at: Instant,

    initialized: bool,
    base_extended_seq: u32,
    extended_seq: u32,
    last_seq: RtpSequenceNumber,

    packets_received: u64,
    out_of_order: u64,
    dropped: u64,

    // Fraction-lost bookkeeping between report blocks.
    expected_prior: u64,
    received_prior: u64,

    jitter: JitterEstimator,
    interval: IntervalAccumulator,
    one_way_delay_ms: f64,
}

impl ReceiveStats {
    pub fn new(ssrc: RtpSsrc, clock_rate: u32) -> Self {
        let now = Instant::now();
        Self {
            ssrc,
            started_at: now,
            interval_started_at: now,
            initialized: false,
            base_extended_seq: 0,
            extended_seq: 0,
            last_seq: 0,
            packets_received: 0,
            out_of_order: 0,
            dropped: 0,
            expected_prior: 0,
            received_prior: 0,
            jitter: JitterEstimator::new(clock_rate),
            interval: IntervalAccumulator::default(),
            one_way_delay_ms: 0.0,
        }
    }

    pub fn ssrc(&self) -> RtpSsrc {
        self.ssrc
    }

    /// Record one arrived packet
    pub fn on_packet(&mut self, seq: RtpSequenceNumber, rtp_timestamp: u32, arrival: Instant) {
        self.packets_received += 1;

        if !self.initialized {
            self.initialized = true;
            self.extended_seq = seq as u32;
            self.base_extended_seq = seq as u32;
            self.last_seq = seq;
        } else {
            let delta = seq.wrapping_sub(self.last_seq);
            if delta != 0 && delta < REORDER_WINDOW {
                // In-order (possibly with a gap): advance the extended
                // sequence; a wrap of the 16-bit SEQ bumps the implicit ROC.
                self.extended_seq = self.extended_seq.wrapping_add(delta as u32);
                self.last_seq = seq;
                if delta > 1 {
                    self.dropped += (delta - 1) as u64;
                }
            } else {
                // Duplicate, late, or wildly ahead: does not advance.
                self.out_of_order += 1;
                // A late arrival fills a gap we previously counted dropped.
                if delta >= u16::MAX - REORDER_WINDOW && self.dropped > 0 {
                    self.dropped -= 1;
                }
            }
        }

        let elapsed = arrival.saturating_duration_since(self.started_at);
        let sample = self.jitter.update(rtp_timestamp, elapsed);
        self.interval.add(sample.smoothed, sample.instantaneous);
    }

    /// Feed the sender's NTP clock from an SR to refresh the one-way delay
    /// estimate. Includes any clock offset between the peers; an estimate,
    /// not a measurement.
    pub fn on_sender_ntp(&mut self, sender_unix: Duration, arrival_unix: Duration) {
        let delay = arrival_unix.saturating_sub(sender_unix);
        self.one_way_delay_ms = delay.as_secs_f64() * 1000.0;
    }

    /// Packets the sequence numbers say should have arrived by now
    pub fn packets_expected(&self) -> u64 {
        if !self.initialized {
            return 0;
        }
        (self.extended_seq.wrapping_sub(self.base_extended_seq) as u64) + 1
    }

    /// 32-bit extended highest sequence number
    pub fn extended_seq(&self) -> u32 {
        self.extended_seq
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received
    }

    /// Loss percentage over the stream lifetime
    pub fn loss_percent(&self) -> f64 {
        let expected = self.packets_expected();
        if expected == 0 {
            return 0.0;
        }
        (self.dropped as f64 / expected as f64) * 100.0
    }

    /// Build the RTCP report block for this stream
    pub fn report_block(&mut self, last_sr: u32, delay_since_last_sr: u32) -> RtcpReportBlock {
        let expected = self.packets_expected();
        let expected_interval = expected.saturating_sub(self.expected_prior);
        let received_interval = self.packets_received.saturating_sub(self.received_prior);
        self.expected_prior = expected;
        self.received_prior = self.packets_received;

        let lost_interval = expected_interval.saturating_sub(received_interval);
        let fraction_lost = if expected_interval == 0 {
            0
        } else {
            ((lost_interval * 256) / expected_interval).min(255) as u8
        };

        RtcpReportBlock {
            ssrc: self.ssrc,
            fraction_lost,
            cumulative_lost: self.dropped.min(0x00FF_FFFF) as u32,
            highest_seq: self.extended_seq,
            jitter: self.jitter.smoothed() as u32,
            last_sr,
            delay_since_last_sr,
        }
    }

    /// Take the interval snapshot and reset the interval accumulators
    pub fn snapshot(&mut self) -> ReceiveStatsSnapshot {
        let now = Instant::now();
        let to_ms = |units: f64| self.jitter.units_to_ms(units);
        let smoothed = self.interval.smoothed(to_ms);
        let instantaneous = self.interval.instantaneous(to_ms);

        let snapshot = ReceiveStatsSnapshot {
            sample_time: SystemTime::now(),
            sample_duration: now.saturating_duration_since(self.interval_started_at),
            packets_received: self.packets_received,
            packets_expected: self.packets_expected(),
            dropped: self.dropped,
            out_of_order: self.out_of_order,
            smoothed_jitter: smoothed,
            instantaneous_jitter: instantaneous,
            extended_last_seq: self.extended_seq,
            ssrc: self.ssrc,
            mos: estimate_mos(self.one_way_delay_ms, smoothed.avg_ms, self.loss_percent()),
            one_way_delay_ms: self.one_way_delay_ms,
        };

        self.interval = IntervalAccumulator::default();
        self.interval_started_at = now;
        snapshot
    }
}
