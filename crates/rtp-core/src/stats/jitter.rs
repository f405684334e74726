//! Interarrival jitter estimation (RFC 3550 §6.4.1).
//!
//! For packets i and j with send timestamps S and arrival timestamps R (both
//! in sample-rate units), D(i,j) = (Rj - Ri) - (Sj - Si). The smoothed
//! estimator is J += (|D| - J) / 16; |D| itself is the instantaneous jitter.

use std::time::Duration;

/// Running jitter estimator for one stream
#[derive(Debug)]
pub struct JitterEstimator {
    clock_rate: u32,
    /// Transit time (arrival - send) of the previous packet, in units
    last_transit: Option<f64>,
    /// Smoothed estimate in units
    smoothed: f64,
}

/// One packet's jitter measurements, in timestamp units
#[derive(Debug, Clone, Copy)]
pub struct JitterSample {
    /// |D| for this packet
    pub instantaneous: f64,
    /// Smoothed estimate after this packet
    pub smoothed: f64,
}

impl JitterEstimator {
    pub fn new(clock_rate: u32) -> Self {
        Self {
            clock_rate: clock_rate.max(1),
            last_transit: None,
            smoothed: 0.0,
        }
    }

    /// Feed one arrival. `elapsed` is the receive-clock time since the
    /// stream started.
    pub fn update(&mut self, rtp_timestamp: u32, elapsed: Duration) -> JitterSample {
        let arrival_units = elapsed.as_secs_f64() * self.clock_rate as f64;
        let transit = arrival_units - rtp_timestamp as f64;

        let instantaneous = match self.last_transit {
            Some(previous) => (transit - previous).abs(),
            None => 0.0,
        };
        self.last_transit = Some(transit);
        self.smoothed += (instantaneous - self.smoothed) / 16.0;

        JitterSample {
            instantaneous,
            smoothed: self.smoothed,
        }
    }

    /// Current smoothed estimate in units
    pub fn smoothed(&self) -> f64 {
        self.smoothed
    }

    /// Convert a value in units to milliseconds at this clock rate
    pub fn units_to_ms(&self, units: f64) -> f64 {
        units * 1000.0 / self.clock_rate as f64
    }

    pub fn reset(&mut self) {
        self.last_transit = None;
        self.smoothed = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steady_stream_has_zero_jitter() {
        let mut estimator = JitterEstimator::new(8000);
        // 20 ms packets: 160 units apart, arriving exactly on time.
        for i in 0..50u32 {
            let sample = estimator.update(i * 160, Duration::from_millis(20 * i as u64));
            assert!(sample.instantaneous < 1e-6);
        }
        assert!(estimator.smoothed() < 1e-6);
    }

    #[test]
    fn test_late_packet_raises_estimate() {
        let mut estimator = JitterEstimator::new(8000);
        estimator.update(0, Duration::from_millis(0));
        estimator.update(160, Duration::from_millis(20));
        // Third packet 10 ms late: D = 80 units.
        let sample = estimator.update(320, Duration::from_millis(50));
        assert!((sample.instantaneous - 80.0).abs() < 1e-6);
        // J = 0 + (80 - 0)/16 = 5.
        assert!((sample.smoothed - 5.0).abs() < 1e-6);
        assert!((estimator.units_to_ms(sample.instantaneous) - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_smoothing_converges_to_constant_jitter() {
        let mut estimator = JitterEstimator::new(8000);
        for i in 0..400u32 {
            // Alternate on-time and 10 ms late arrivals.
            let slack = if i % 2 == 0 { 0 } else { 10 };
            let elapsed = Duration::from_millis(20 * i as u64 + slack);
            estimator.update(i * 160, elapsed);
        }
        // |D| alternates at 80 units; the estimator settles near it.
        assert!(estimator.smoothed() > 60.0 && estimator.smoothed() < 90.0);
    }
}
