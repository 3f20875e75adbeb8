//! Client configuration surface.

use std::time::Duration;

use crate::core::reconnect::DecayBackoff;

/// Options for a [`LinkClient`](crate::core::client::LinkClient), all
/// defaulted except the URL.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub url: String,

    // Reconnection
    pub max_reconnect_attempts: u32,
    pub reconnect_interval: Duration,
    pub max_reconnect_interval: Duration,
    pub reconnect_decay: f64,
    pub jitter: f64,

    // Heartbeat
    pub heartbeat_interval: Duration,
    pub pong_timeout: Duration,
    pub enable_heartbeat: bool,

    // Offline queue
    pub enable_message_queue: bool,
    pub max_queue_size: usize,

    /// Verbose transport logging (debug-level tracing for heartbeat and
    /// queue activity).
    pub debug: bool,
}

impl LinkConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_reconnect_attempts: 10,
            reconnect_interval: Duration::from_millis(1000),
            max_reconnect_interval: Duration::from_millis(30_000),
            reconnect_decay: 1.5,
            jitter: 0.1,
            heartbeat_interval: Duration::from_millis(30_000),
            pong_timeout: Duration::from_millis(10_000),
            enable_heartbeat: true,
            enable_message_queue: true,
            max_queue_size: 100,
            debug: false,
        }
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn max_reconnect_interval(mut self, interval: Duration) -> Self {
        self.max_reconnect_interval = interval;
        self
    }

    pub fn reconnect_decay(mut self, decay: f64) -> Self {
        self.reconnect_decay = decay;
        self
    }

    pub fn jitter(mut self, ratio: f64) -> Self {
        self.jitter = ratio;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.pong_timeout = timeout;
        self
    }

    pub fn enable_heartbeat(mut self, enabled: bool) -> Self {
        self.enable_heartbeat = enabled;
        self
    }

    pub fn enable_message_queue(mut self, enabled: bool) -> Self {
        self.enable_message_queue = enabled;
        self
    }

    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Backoff strategy derived from the reconnection fields.
    pub fn backoff(&self) -> DecayBackoff {
        DecayBackoff::new(
            self.reconnect_interval,
            self.max_reconnect_interval,
            self.reconnect_decay,
            self.jitter,
            self.max_reconnect_attempts,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_surface() {
        let cfg = LinkConfig::new("ws://localhost:8002/ws");
        assert_eq!(cfg.max_reconnect_attempts, 10);
        assert_eq!(cfg.reconnect_interval, Duration::from_millis(1000));
        assert_eq!(cfg.max_reconnect_interval, Duration::from_millis(30_000));
        assert_eq!(cfg.reconnect_decay, 1.5);
        assert_eq!(cfg.jitter, 0.1);
        assert_eq!(cfg.heartbeat_interval, Duration::from_millis(30_000));
        assert_eq!(cfg.pong_timeout, Duration::from_millis(10_000));
        assert!(cfg.enable_heartbeat);
        assert!(cfg.enable_message_queue);
        assert_eq!(cfg.max_queue_size, 100);
        assert!(!cfg.debug);
    }

    #[test]
    fn setters_chain() {
        let cfg = LinkConfig::new("ws://x")
            .max_reconnect_attempts(3)
            .reconnect_interval(Duration::from_millis(50))
            .enable_heartbeat(false);
        assert_eq!(cfg.max_reconnect_attempts, 3);
        assert_eq!(cfg.reconnect_interval, Duration::from_millis(50));
        assert!(!cfg.enable_heartbeat);
    }
}
