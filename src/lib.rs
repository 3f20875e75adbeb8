//! chat-relay — the gateway process and operator tooling built on the
//! [`chatlink`] transport library.
//!
//! Binaries:
//! - `relay-gateway`: accepts WebSocket sessions, sweeps the registry,
//!   and serves the monitoring endpoints.
//! - `link-probe`: connects a `chatlink` client to a gateway URL and
//!   prints lifecycle events, for poking at a running gateway.

pub use chatlink;

pub mod logging;
