//! RTP session statistics: receive-side loss/jitter/MOS tracking and
//! send-side counters, per RFC 3550 §6.4 and the reduced E-model.

pub mod jitter;
pub mod mos;
pub mod receive;
pub mod send;

pub use jitter::{JitterEstimator, JitterSample};
pub use mos::estimate_mos;
pub use receive::{JitterInterval, ReceiveStats, ReceiveStatsSnapshot};
pub use send::SendStats;
