//! Bounded FIFO buffer for outbound messages while no connection is
//! live.

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;

use crate::core::envelope::Envelope;

#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub envelope: Envelope,
    pub queued_at: Instant,
}

/// FIFO queue with a hard capacity. Enqueueing beyond capacity evicts
/// the oldest entry, so the newest `capacity` messages always survive.
///
/// Shared between the client handle (enqueue on send-while-down) and
/// the driver task (drain after reconnect), hence interior mutability.
pub struct MessageQueue {
    inner: Mutex<VecDeque<QueuedMessage>>,
    capacity: usize,
}

impl MessageQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn enqueue(&self, envelope: Envelope) {
        let mut inner = self.inner.lock();
        while inner.len() >= self.capacity {
            inner.pop_front();
        }
        inner.push_back(QueuedMessage {
            envelope,
            queued_at: Instant::now(),
        });
    }

    /// Take every queued message in original enqueue order, leaving the
    /// queue empty. Production and clearing happen in one step; the
    /// caller re-submits through the normal send path and re-enqueues
    /// anything that fails again.
    pub fn drain(&self) -> Vec<QueuedMessage> {
        self.inner.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}
