//! # ChatLink
//!
//! Reliable WebSocket transport for the chat-relay product.
//!
//! The library covers one concern: keeping a long-lived bidirectional
//! connection useful in the presence of network failures. On the client
//! side that means an event-driven connection lifecycle (connect,
//! monitor, back off, reconnect) with heartbeat liveness probing and a
//! bounded offline message queue. On the server side it means a
//! registry of many concurrent connections with idle sweeping, targeted
//! and broadcast delivery, and a health/metrics surface for operators.
//!
//! Message content is opaque to this crate: everything travels in a
//! small `{type, data, timestamp}` envelope, and the only `type` values
//! interpreted here are the `ping`/`pong` control pair.

pub mod core;
pub mod error;
pub mod server;

pub use crate::core::{
    classify::{
        classify_close, classify_error, should_reconnect_on_close, Classification, CloseInfo,
        ErrorKind, ErrorStats, RetryPolicy, Severity,
    },
    client::{LinkClient, LinkSnapshot, SendOutcome},
    config::LinkConfig,
    envelope::Envelope,
    events::{EventBus, LinkEvent},
    heartbeat::LivenessTracker,
    queue::MessageQueue,
    reconnect::{DecayBackoff, NeverReconnect, ReconnectionStrategy},
    state::{AtomicConnectionState, ConnectionState},
};
pub use error::{LinkError, Result};
pub use server::{
    config::GatewayConfig,
    gateway::{EchoHandler, InboundHandler},
    http::{monitoring_router, router, AppState},
    monitor::{HealthMonitor, HealthStatus, MonitorEvent, MonitorThresholds},
    registry::{ConnectionRegistry, ConnectionStats},
    sink::{ChannelSink, ConnectionSink, RecordingSink, SinkFrame},
};
