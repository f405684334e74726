//! Mean Opinion Score estimation for audio streams.
//!
//! A reduced E-model: effective latency folds one-way delay, jitter and a
//! fixed codec allowance together; the R factor is degraded by latency and
//! loss and then mapped onto the 1.0-4.5 MOS scale.

/// Estimate the MOS from one-way delay, smoothed jitter and packet loss.
///
/// `delay_ms` and `jitter_ms` are in milliseconds; `loss_pct` is the loss
/// percentage in 0..=100.
pub fn estimate_mos(delay_ms: f64, jitter_ms: f64, loss_pct: f64) -> f32 {
    let effective_latency = delay_ms + 2.0 * jitter_ms + 10.0;

    let mut r = if effective_latency <= 160.0 {
        93.2 - effective_latency / 40.0
    } else {
        93.2 - (effective_latency - 120.0) / 10.0
    };
    r -= 2.5 * loss_pct;

    if r < 0.0 {
        return 1.0;
    }
    if r > 100.0 {
        return 4.5;
    }
    (1.0 + 0.035 * r + r * (r - 60.0) * (100.0 - r) * 7.0e-6) as f32
}
