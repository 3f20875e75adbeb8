//! Reconnection scheduling: backoff delays and attempt limits.

use std::time::Duration;

use rand::Rng;

/// Floor applied after jitter so a schedule can never produce a zero or
/// near-zero wait.
pub const MIN_DELAY: Duration = Duration::from_millis(100);

/// Strategy deciding whether and when the next reconnection attempt
/// runs.
///
/// `attempt` is 0-indexed and owned by the lifecycle manager: it
/// increments once per failed connection attempt and resets to zero on
/// a successful open.
pub trait ReconnectionStrategy: Send + Sync {
    /// Delay before attempt number `attempt`, or `None` to stop
    /// reconnecting.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;

    /// Whether attempt number `attempt` is still allowed.
    fn should_attempt(&self, attempt: u32) -> bool;

    fn max_attempts(&self) -> u32;
}

/// Exponential-decay backoff with uniform jitter.
///
/// `delay = min(base * factor^attempt, max)`, then jittered by
/// `± jitter_ratio * delay` and floored at 100ms.
#[derive(Debug, Clone)]
pub struct DecayBackoff {
    base: Duration,
    max: Duration,
    factor: f64,
    jitter_ratio: f64,
    max_attempts: u32,
}

impl DecayBackoff {
    pub fn new(
        base: Duration,
        max: Duration,
        factor: f64,
        jitter_ratio: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            base,
            max,
            factor,
            jitter_ratio,
            max_attempts,
        }
    }

    /// Capped delay before jitter. Monotonically non-decreasing in
    /// `attempt` for any factor >= 1.
    pub fn delay_before_jitter(&self, attempt: u32) -> Duration {
        let raw = self.base.as_millis() as f64 * self.factor.powi(attempt as i32);
        let capped = raw.min(self.max.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

impl Default for DecayBackoff {
    /// Defaults matching the client configuration surface: 1s base,
    /// 30s cap, 1.5 decay, 10% jitter, 10 attempts.
    fn default() -> Self {
        Self::new(
            Duration::from_millis(1000),
            Duration::from_millis(30_000),
            1.5,
            0.1,
            10,
        )
    }
}

impl ReconnectionStrategy for DecayBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.should_attempt(attempt) {
            return None;
        }

        let base_ms = self.delay_before_jitter(attempt).as_millis() as f64;
        let spread = base_ms * self.jitter_ratio;
        let offset = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        let jittered = (base_ms + offset).max(MIN_DELAY.as_millis() as f64);

        Some(Duration::from_millis(jittered as u64))
    }

    fn should_attempt(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Never reconnect after a disconnection.
#[derive(Debug, Clone, Copy)]
pub struct NeverReconnect;

impl ReconnectionStrategy for NeverReconnect {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        None
    }

    fn should_attempt(&self, _attempt: u32) -> bool {
        false
    }

    fn max_attempts(&self) -> u32 {
        0
    }
}
