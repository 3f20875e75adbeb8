//! Typed lifecycle event surface.
//!
//! Instead of string event names with loose payloads, the public
//! surface is the closed `LinkEvent` enum; a generic fan-out bus sits
//! underneath so any number of subscribers can listen, plus a
//! per-message-type channel for fine-grained subscription without
//! filtering the full stream.

use std::collections::HashMap;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;

use crate::core::classify::{Classification, CloseInfo};
use crate::core::envelope::Envelope;

/// Everything a lifecycle manager reports to its consumers.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Transport opened (first connect or any reconnect).
    Open,
    /// A non-control envelope arrived.
    Message(Envelope),
    /// Transport closed, with the classified close information.
    Close(CloseInfo),
    /// A transport failure was classified.
    Error(Classification),
    /// A reconnect attempt has been scheduled.
    Reconnecting {
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
    },
    /// An open that followed at least one failed attempt.
    Reconnected,
    /// The scheduler gave up; the manager is `Failed` until `reset()`.
    MaxReconnectAttemptsReached,
}

/// Multi-subscriber event fan-out.
///
/// Dead subscribers (dropped receivers) are pruned on publish.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Sender<LinkEvent>>>,
    typed: RwLock<HashMap<String, Vec<Sender<Envelope>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every lifecycle event.
    pub fn subscribe(&self) -> Receiver<LinkEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.write().push(tx);
        rx
    }

    /// Subscribe to message envelopes of one `type` only.
    pub fn subscribe_type(&self, kind: impl Into<String>) -> Receiver<Envelope> {
        let (tx, rx) = unbounded();
        self.typed.write().entry(kind.into()).or_default().push(tx);
        rx
    }

    pub fn publish(&self, event: LinkEvent) {
        if let LinkEvent::Message(envelope) = &event {
            let mut typed = self.typed.write();
            if let Some(senders) = typed.get_mut(&envelope.kind) {
                senders.retain(|tx| tx.send(envelope.clone()).is_ok());
            }
        }
        self.subscribers
            .write()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fans_out_to_all_subscribers() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(LinkEvent::Open);

        assert!(matches!(a.try_recv(), Ok(LinkEvent::Open)));
        assert!(matches!(b.try_recv(), Ok(LinkEvent::Open)));
    }

    #[test]
    fn typed_subscription_sees_only_its_type() {
        let bus = EventBus::new();
        let texts = bus.subscribe_type("text");

        bus.publish(LinkEvent::Message(Envelope::new("status", json!({}))));
        bus.publish(LinkEvent::Message(Envelope::new("text", json!({"text": "hi"}))));

        let only = texts.try_recv().unwrap();
        assert_eq!(only.kind, "text");
        assert!(texts.try_recv().is_err());
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let bus = EventBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());

        bus.publish(LinkEvent::Reconnected);
        bus.publish(LinkEvent::Reconnected);

        assert_eq!(keep.try_iter().count(), 2);
        assert_eq!(bus.subscribers.read().len(), 1);
    }
}
