//! Gateway-side building blocks: connection registry, health monitor,
//! HTTP surface, and the websocket endpoint.

pub mod config;
pub mod gateway;
pub mod http;
pub mod monitor;
pub mod registry;
pub mod sink;

pub use config::GatewayConfig;
pub use gateway::{EchoHandler, InboundHandler};
pub use http::{router, AppState};
pub use monitor::{HealthMonitor, HealthReport, HealthStatus, MonitorEvent, MonitorThresholds};
pub use registry::{ConnectionRegistry, ConnectionStats};
pub use sink::{ChannelSink, ConnectionSink, RecordingSink, SinkFrame};
