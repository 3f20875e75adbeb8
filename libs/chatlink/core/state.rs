//! Connection lifecycle state machine.
//!
//! The machine is pure: `transition` maps a state and an input to the
//! next state plus a list of effects, with no timers, sockets, or
//! mutation involved. The client driver interprets the effects; tests
//! exercise the transition table directly without a transport.
//!
//! Manual disconnection is modeled as the `Disconnecting` state rather
//! than a side flag: a close observed while `Disconnecting` never
//! schedules a reconnect.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Client connection state. Exactly one per lifecycle manager;
/// transitions are serialized by the single driver task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }

    /// States with a transport handle that may still need closing.
    fn has_transport(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

/// Lock-free state cell readable from the client handle while the
/// driver task owns the transitions.
pub struct AtomicConnectionState {
    value: AtomicU8,
}

impl AtomicConnectionState {
    pub fn new(state: ConnectionState) -> Self {
        Self {
            value: AtomicU8::new(Self::encode(state)),
        }
    }

    fn encode(state: ConnectionState) -> u8 {
        match state {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Disconnecting => 3,
            ConnectionState::Reconnecting => 4,
            ConnectionState::Failed => 5,
        }
    }

    fn decode(value: u8) -> ConnectionState {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Disconnecting,
            4 => ConnectionState::Reconnecting,
            5 => ConnectionState::Failed,
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn get(&self) -> ConnectionState {
        Self::decode(self.value.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ConnectionState) {
        self.value.store(Self::encode(state), Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.get() == ConnectionState::Connected
    }
}

/// Lock-free message counters shared between driver and handle.
#[derive(Default)]
pub struct AtomicMetrics {
    sent: AtomicU64,
    received: AtomicU64,
    reconnects: AtomicU64,
}

impl AtomicMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_reconnects(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }
}

/// Events fed into the machine by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkInput {
    /// `connect()` called.
    ConnectRequested,
    /// Transport handshake completed.
    TransportOpened,
    /// Connect attempt failed before a transport existed.
    ConnectFailed,
    /// Transport closed. `recoverable` is the classifier's verdict on
    /// the close code.
    TransportClosed { recoverable: bool },
    /// No pong (or any inbound frame) within the pong timeout.
    PongTimedOut,
    /// The scheduled backoff delay elapsed.
    RetryTimerFired,
    /// The scheduler refused another attempt.
    RetriesExhausted,
    /// `disconnect()` called.
    DisconnectRequested,
    /// `reset()` called.
    ResetRequested,
}

/// Actions the driver must perform after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    OpenTransport,
    /// Close the live transport with this code.
    CloseTransport { code: u16 },
    StartHeartbeat,
    StopHeartbeat,
    /// Ask the scheduler for the next delay and arm the retry timer
    /// (or feed `RetriesExhausted` if it refuses).
    ScheduleRetry,
    CancelRetry,
    ResetAttempts,
    DrainQueue,
    EmitOpen,
    EmitClose,
    EmitFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: ConnectionState,
    pub effects: Vec<Effect>,
}

fn stay(state: ConnectionState) -> Transition {
    Transition {
        next: state,
        effects: Vec::new(),
    }
}

fn to(next: ConnectionState, effects: Vec<Effect>) -> Transition {
    Transition { next, effects }
}

/// The transition table. Unknown (state, input) pairs are no-ops: a
/// stale timer or transport callback arriving after the state it
/// referenced is gone must not corrupt the machine.
pub fn transition(state: ConnectionState, input: LinkInput) -> Transition {
    use ConnectionState::*;
    use LinkInput::*;

    match (state, input) {
        // connect() only acts from Disconnected; while Connecting,
        // Connected, or Reconnecting it is a no-op, and Failed requires
        // an explicit reset().
        (Disconnected, ConnectRequested) => to(Connecting, vec![Effect::OpenTransport]),
        (_, ConnectRequested) => stay(state),

        // Disconnected -> Connected always passes through Connecting.
        (Connecting, TransportOpened) => to(
            Connected,
            vec![
                Effect::ResetAttempts,
                Effect::StartHeartbeat,
                Effect::DrainQueue,
                Effect::EmitOpen,
            ],
        ),
        // An open landing after disconnect/shutdown: refuse it.
        (Disconnecting | Disconnected | Failed, TransportOpened) => to(
            state,
            vec![Effect::CloseTransport { code: 1000 }],
        ),
        (_, TransportOpened) => stay(state),

        (Connecting | Reconnecting, ConnectFailed) => {
            to(Reconnecting, vec![Effect::ScheduleRetry])
        }
        (Disconnecting, ConnectFailed) => to(Disconnected, vec![]),
        (_, ConnectFailed) => stay(state),

        (Connected, TransportClosed { recoverable: true }) => to(
            Reconnecting,
            vec![Effect::StopHeartbeat, Effect::EmitClose, Effect::ScheduleRetry],
        ),
        (Connected, TransportClosed { recoverable: false }) => to(
            Disconnected,
            vec![Effect::StopHeartbeat, Effect::EmitClose],
        ),
        (Connecting, TransportClosed { recoverable: true }) => {
            to(Reconnecting, vec![Effect::EmitClose, Effect::ScheduleRetry])
        }
        (Connecting, TransportClosed { recoverable: false }) => {
            to(Disconnected, vec![Effect::EmitClose])
        }
        // Manual disconnect: never reconnect, whatever the code was.
        (Disconnecting, TransportClosed { .. }) => to(Disconnected, vec![Effect::EmitClose]),
        (_, TransportClosed { .. }) => stay(state),

        // Stale transport is force-closed; the resulting close event
        // drives the reconnection path.
        (Connected, PongTimedOut) => to(
            Connected,
            vec![Effect::StopHeartbeat, Effect::CloseTransport { code: 1006 }],
        ),
        (_, PongTimedOut) => stay(state),

        (Reconnecting, RetryTimerFired) => to(Connecting, vec![Effect::OpenTransport]),
        (_, RetryTimerFired) => stay(state),

        (Reconnecting, RetriesExhausted) => {
            to(Failed, vec![Effect::CancelRetry, Effect::EmitFailed])
        }
        (_, RetriesExhausted) => stay(state),

        (_, DisconnectRequested) => {
            if state.has_transport() {
                to(
                    Disconnecting,
                    vec![
                        Effect::CancelRetry,
                        Effect::StopHeartbeat,
                        Effect::CloseTransport { code: 1000 },
                    ],
                )
            } else {
                to(Disconnected, vec![Effect::CancelRetry, Effect::StopHeartbeat])
            }
        }

        (_, ResetRequested) => {
            let mut effects = vec![
                Effect::CancelRetry,
                Effect::StopHeartbeat,
                Effect::ResetAttempts,
            ];
            if state.has_transport() {
                effects.push(Effect::CloseTransport { code: 1000 });
            }
            effects.push(Effect::OpenTransport);
            to(Connecting, effects)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;
    use LinkInput::*;

    #[test]
    fn connect_only_from_disconnected() {
        let t = transition(Disconnected, ConnectRequested);
        assert_eq!(t.next, Connecting);
        assert_eq!(t.effects, vec![Effect::OpenTransport]);

        for state in [Connecting, Connected, Reconnecting, Disconnecting, Failed] {
            let t = transition(state, ConnectRequested);
            assert_eq!(t.next, state);
            assert!(t.effects.is_empty(), "connect() must be a no-op in {state:?}");
        }
    }

    #[test]
    fn open_requires_connecting() {
        let t = transition(Connecting, TransportOpened);
        assert_eq!(t.next, Connected);
        assert!(t.effects.contains(&Effect::ResetAttempts));
        assert!(t.effects.contains(&Effect::StartHeartbeat));
        assert!(t.effects.contains(&Effect::DrainQueue));

        // Disconnected never jumps straight to Connected.
        let t = transition(Disconnected, TransportOpened);
        assert_ne!(t.next, Connected);
    }

    #[test]
    fn attempt_reset_precedes_heartbeat_and_drain() {
        let effects = transition(Connecting, TransportOpened).effects;
        let reset_pos = effects
            .iter()
            .position(|e| *e == Effect::ResetAttempts)
            .unwrap();
        let drain_pos = effects.iter().position(|e| *e == Effect::DrainQueue).unwrap();
        assert!(reset_pos < drain_pos);
    }

    #[test]
    fn recoverable_close_schedules_retry() {
        let t = transition(Connected, TransportClosed { recoverable: true });
        assert_eq!(t.next, Reconnecting);
        assert!(t.effects.contains(&Effect::StopHeartbeat));
        assert!(t.effects.contains(&Effect::ScheduleRetry));
    }

    #[test]
    fn normal_close_ends_disconnected() {
        let t = transition(Connected, TransportClosed { recoverable: false });
        assert_eq!(t.next, Disconnected);
        assert!(!t.effects.contains(&Effect::ScheduleRetry));
    }

    #[test]
    fn manual_disconnect_suppresses_reconnect() {
        let t = transition(Connected, DisconnectRequested);
        assert_eq!(t.next, Disconnecting);
        assert!(t.effects.contains(&Effect::CloseTransport { code: 1000 }));
        assert!(t.effects.contains(&Effect::CancelRetry));

        // Even a "recoverable" close code must not reconnect after a
        // manual disconnect.
        let t = transition(Disconnecting, TransportClosed { recoverable: true });
        assert_eq!(t.next, Disconnected);
        assert!(!t.effects.contains(&Effect::ScheduleRetry));
    }

    #[test]
    fn pong_timeout_force_closes() {
        let t = transition(Connected, PongTimedOut);
        assert!(t.effects.contains(&Effect::CloseTransport { code: 1006 }));
        // The machine stays in Connected until the close is observed;
        // the 1006 close then drives reconnection.
        let t = transition(t.next, TransportClosed { recoverable: true });
        assert_eq!(t.next, Reconnecting);
    }

    #[test]
    fn exhausted_retries_are_terminal_until_reset() {
        let t = transition(Reconnecting, RetriesExhausted);
        assert_eq!(t.next, Failed);
        assert!(t.effects.contains(&Effect::EmitFailed));

        // No automatic path out of Failed.
        for input in [
            ConnectRequested,
            RetryTimerFired,
            TransportClosed { recoverable: true },
        ] {
            assert_eq!(transition(Failed, input).next, Failed, "{input:?}");
        }

        let t = transition(Failed, ResetRequested);
        assert_eq!(t.next, Connecting);
        assert!(t.effects.contains(&Effect::ResetAttempts));
        assert!(t.effects.contains(&Effect::OpenTransport));
    }

    #[test]
    fn retry_timer_reenters_connecting() {
        let t = transition(Reconnecting, RetryTimerFired);
        assert_eq!(t.next, Connecting);
        assert_eq!(t.effects, vec![Effect::OpenTransport]);

        // A stale retry timer firing anywhere else is ignored.
        for state in [Disconnected, Connected, Disconnecting, Failed] {
            assert!(transition(state, RetryTimerFired).effects.is_empty());
        }
    }

    #[test]
    fn atomic_state_round_trip() {
        let cell = AtomicConnectionState::new(Disconnected);
        for state in [Connecting, Connected, Disconnecting, Reconnecting, Failed, Disconnected] {
            cell.set(state);
            assert_eq!(cell.get(), state);
        }
    }
}
