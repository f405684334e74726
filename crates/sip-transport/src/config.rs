use std::time::Duration;

/// Largest payload that fits a single UDP datagram (65535 minus IP and UDP
/// headers). Sends above this fail with `Error::MessageTooLarge`.
pub const MAX_UDP_PAYLOAD: usize = 65507;

/// Largest SIP message a channel will accept
pub const MAX_SIP_MESSAGE_SIZE: usize = 65535;

/// Listen backlog for stream channels
pub const STREAM_LISTEN_BACKLOG: i32 = 1000;

/// Tuning knobs shared by all channel variants
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Capacity of the transport event channel
    pub channel_capacity: usize,

    /// Upper bound on a single SIP message
    pub max_message_size: usize,

    /// How often the prune task scans for idle connections
    pub prune_interval: Duration,

    /// Delay before the first prune scan
    pub prune_initial_delay: Duration,

    /// Connections idle longer than this are closed by the prune task
    pub prune_idle: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 100,
            max_message_size: MAX_SIP_MESSAGE_SIZE,
            prune_interval: Duration::from_secs(60),
            prune_initial_delay: Duration::from_secs(60),
            prune_idle: Duration::from_secs(70 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ChannelConfig::default();
        assert_eq!(cfg.channel_capacity, 100);
        assert_eq!(cfg.prune_interval, Duration::from_secs(60));
        assert_eq!(cfg.prune_idle, Duration::from_secs(4200));
    }
}
