//! RFC 3261 transaction timer configuration.
//!
//! T1 is the round-trip estimate that seeds every retransmission schedule;
//! T2 caps non-INVITE request and INVITE response retransmission intervals;
//! T4 bounds how long a message stays in the network. The lettered timers
//! are derived from these unless overridden.

use std::time::Duration;

/// Timer durations for the four transaction state machines
#[derive(Debug, Clone)]
pub struct TimerSettings {
    /// RTT estimate; initial retransmission interval (default 500 ms)
    pub t1: Duration,

    /// Retransmission interval cap for non-INVITE requests and INVITE
    /// responses (default 4 s)
    pub t2: Duration,

    /// Maximum message lifetime in the network (default 5 s)
    pub t4: Duration,

    /// Timer B: INVITE transaction timeout (default 64*T1)
    pub timer_b: Duration,

    /// Timer F: non-INVITE final response timeout (default 64*T1).
    /// Overridable per transaction start.
    pub timer_f: Duration,

    /// Timer D: wait for INVITE response retransmissions after a non-2xx
    /// final, unreliable transports (default 32 s)
    pub timer_d: Duration,

    /// Timer H: wait for an ACK to a non-2xx final (default 64*T1)
    pub timer_h: Duration,

    /// Timer J: absorb non-INVITE request retransmissions in Completed,
    /// unreliable transports (default 64*T1)
    pub timer_j: Duration,

    /// How often the dispatcher drives transaction timers (default 100 ms)
    pub tick_interval: Duration,
}

impl TimerSettings {
    /// Timer K: absorb non-INVITE response retransmissions (T4)
    pub fn timer_k(&self) -> Duration {
        self.t4
    }

    /// Timer I: absorb ACK retransmissions in Confirmed (T4)
    pub fn timer_i(&self) -> Duration {
        self.t4
    }
}

impl Default for TimerSettings {
    fn default() -> Self {
        let t1 = Duration::from_millis(500);
        Self {
            t1,
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
            timer_b: t1 * 64,
            timer_f: t1 * 64,
            timer_d: Duration::from_secs(32),
            timer_h: t1 * 64,
            timer_j: t1 * 64,
            tick_interval: Duration::from_millis(100),
        }
    }
}
