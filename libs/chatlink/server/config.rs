//! Gateway configuration from `WS_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

use serde_json::json;
use tracing::warn;

use crate::server::monitor::MonitorThresholds;

/// Runtime settings for the gateway process. Every field has a
/// default; the environment overrides.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// `WS_PORT`
    pub port: u16,
    /// `WS_MAX_CONNECTIONS`
    pub max_connections: usize,
    /// `WS_IDLE_TIMEOUT_MS` — idle eviction threshold.
    pub idle_timeout: Duration,
    /// `WS_HEARTBEAT_INTERVAL_MS` — sweep cadence; proactive server
    /// pings fire at half this.
    pub heartbeat_interval: Duration,
    /// `WS_HEARTBEAT_TIMEOUT_MS`
    pub pong_timeout: Duration,
    /// `WS_RECONNECT_*` — the backoff schedule advertised to clients
    /// on `/config`; the server itself never reconnects.
    pub reconnect_max_attempts: u32,
    /// `WS_RECONNECT_INTERVAL_MS`
    pub reconnect_interval: Duration,
    /// `WS_RECONNECT_MAX_INTERVAL_MS`
    pub reconnect_max_interval: Duration,
    /// `WS_RECONNECT_DECAY`
    pub reconnect_decay: f64,
    /// `WS_MAX_ERROR_RATE` — monitor threshold.
    pub max_error_rate: f64,
    /// `WS_MAX_MEMORY_MB` — monitor threshold.
    pub max_memory_mb: u64,
    /// `WS_LOG_LEVEL`
    pub log_level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            max_connections: 1000,
            idle_timeout: Duration::from_millis(300_000),
            heartbeat_interval: Duration::from_millis(30_000),
            pong_timeout: Duration::from_millis(10_000),
            reconnect_max_attempts: 10,
            reconnect_interval: Duration::from_millis(1000),
            reconnect_max_interval: Duration::from_millis(30_000),
            reconnect_decay: 1.5,
            max_error_rate: 0.10,
            max_memory_mb: 500,
            log_level: "info".to_string(),
        }
    }
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, raw = %raw, "unparseable env value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_parse("WS_PORT", defaults.port),
            max_connections: env_parse("WS_MAX_CONNECTIONS", defaults.max_connections),
            idle_timeout: Duration::from_millis(env_parse(
                "WS_IDLE_TIMEOUT_MS",
                defaults.idle_timeout.as_millis() as u64,
            )),
            heartbeat_interval: Duration::from_millis(env_parse(
                "WS_HEARTBEAT_INTERVAL_MS",
                defaults.heartbeat_interval.as_millis() as u64,
            )),
            pong_timeout: Duration::from_millis(env_parse(
                "WS_HEARTBEAT_TIMEOUT_MS",
                defaults.pong_timeout.as_millis() as u64,
            )),
            reconnect_max_attempts: env_parse(
                "WS_RECONNECT_MAX_ATTEMPTS",
                defaults.reconnect_max_attempts,
            ),
            reconnect_interval: Duration::from_millis(env_parse(
                "WS_RECONNECT_INTERVAL_MS",
                defaults.reconnect_interval.as_millis() as u64,
            )),
            reconnect_max_interval: Duration::from_millis(env_parse(
                "WS_RECONNECT_MAX_INTERVAL_MS",
                defaults.reconnect_max_interval.as_millis() as u64,
            )),
            reconnect_decay: env_parse("WS_RECONNECT_DECAY", defaults.reconnect_decay),
            max_error_rate: env_parse("WS_MAX_ERROR_RATE", defaults.max_error_rate),
            max_memory_mb: env_parse("WS_MAX_MEMORY_MB", defaults.max_memory_mb),
            log_level: std::env::var("WS_LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }

    pub fn thresholds(&self) -> MonitorThresholds {
        MonitorThresholds {
            max_connections: self.max_connections,
            max_error_rate: self.max_error_rate,
            max_memory_bytes: self.max_memory_mb * 1024 * 1024,
        }
    }

    /// View served on `GET /config`. Grouped and free of anything an
    /// operator would consider sensitive.
    pub fn sanitized(&self) -> serde_json::Value {
        json!({
            "server": {
                "port": self.port,
                "maxConnections": self.max_connections,
                "idleTimeoutMs": self.idle_timeout.as_millis() as u64,
            },
            "heartbeat": {
                "intervalMs": self.heartbeat_interval.as_millis() as u64,
                "timeoutMs": self.pong_timeout.as_millis() as u64,
            },
            "reconnection": {
                "maxAttempts": self.reconnect_max_attempts,
                "intervalMs": self.reconnect_interval.as_millis() as u64,
                "maxIntervalMs": self.reconnect_max_interval.as_millis() as u64,
                "decay": self.reconnect_decay,
            },
            "logging": {
                "level": self.log_level,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_line_up() {
        let config = GatewayConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.pong_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect_max_attempts, 10);
    }

    #[test]
    fn sanitized_view_has_sections() {
        let view = GatewayConfig::default().sanitized();
        assert!(view.get("server").is_some());
        assert!(view.get("heartbeat").is_some());
        assert!(view.get("reconnection").is_some());
        assert!(view.get("logging").is_some());
        assert_eq!(view["heartbeat"]["intervalMs"], 30_000);
    }

    #[test]
    fn thresholds_convert_memory_to_bytes() {
        let thresholds = GatewayConfig::default().thresholds();
        assert_eq!(thresholds.max_memory_bytes, 500 * 1024 * 1024);
        assert!((thresholds.max_error_rate - 0.10).abs() < f64::EPSILON);
    }
}
