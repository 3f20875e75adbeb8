//! Client-side connection lifecycle: envelope codec, error
//! classification, offline queue, heartbeat, reconnection scheduling,
//! and the driver that ties them into a single state machine.

pub mod classify;
pub mod client;
pub mod config;
pub mod envelope;
pub mod events;
pub mod heartbeat;
pub mod queue;
pub mod reconnect;
pub mod state;

pub use classify::{classify_close, classify_error, Classification, ErrorKind, Severity};
pub use client::{LinkClient, SendOutcome};
pub use config::LinkConfig;
pub use envelope::Envelope;
pub use events::{EventBus, LinkEvent};
pub use queue::MessageQueue;
pub use reconnect::{DecayBackoff, ReconnectionStrategy};
pub use state::ConnectionState;
