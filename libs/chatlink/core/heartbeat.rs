//! Heartbeat liveness tracking.
//!
//! The ping ticker and pong deadline live inside the client driver's
//! select loop; this module owns the timestamps that distinguish a
//! silently-dead connection from an idle-but-alive one. Stamps are
//! atomic milliseconds since an internal epoch so the client handle can
//! read them without locking the driver.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Records when pings were sent and pongs (or any inbound traffic)
/// were seen on a connection.
pub struct LivenessTracker {
    epoch: Instant,
    last_ping_sent_ms: AtomicU64,
    last_pong_received_ms: AtomicU64,
}

impl LivenessTracker {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_ping_sent_ms: AtomicU64::new(0),
            last_pong_received_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub fn record_ping_sent(&self) {
        self.last_ping_sent_ms.store(self.now_ms(), Ordering::Release);
    }

    pub fn record_pong_received(&self) {
        self.last_pong_received_ms
            .store(self.now_ms(), Ordering::Release);
    }

    /// True when a ping has been sent, no pong has answered it, and
    /// `timeout` has elapsed since the ping. A stale connection must be
    /// force-closed, never silently re-pinged.
    pub fn is_stale(&self, timeout: Duration) -> bool {
        let ping_ms = self.last_ping_sent_ms.load(Ordering::Acquire);
        if ping_ms == 0 {
            return false;
        }

        let pong_ms = self.last_pong_received_ms.load(Ordering::Acquire);
        if pong_ms >= ping_ms {
            return false;
        }

        self.now_ms().saturating_sub(ping_ms) >= timeout.as_millis() as u64
    }

    pub fn time_since_last_pong(&self) -> Option<Duration> {
        let pong_ms = self.last_pong_received_ms.load(Ordering::Acquire);
        if pong_ms == 0 {
            return None;
        }
        Some(Duration::from_millis(self.now_ms().saturating_sub(pong_ms)))
    }

    /// Clear both stamps. Called on every fresh connection.
    pub fn reset(&self) {
        self.last_ping_sent_ms.store(0, Ordering::Release);
        self.last_pong_received_ms.store(0, Ordering::Release);
    }
}

impl Default for LivenessTracker {
    fn default() -> Self {
        Self::new()
    }
}
