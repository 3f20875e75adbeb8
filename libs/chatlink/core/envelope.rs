//! Wire envelope shared by both directions.
//!
//! Every frame carries a `type` string and an opaque `data` payload.
//! The sender stamps an ISO-8601 `timestamp` if the caller left it
//! unset. The `ping`/`pong` types are consumed by the transport layer
//! and never reach business-logic handlers; every other type is
//! forwarded verbatim.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Envelope types reserved for transport-level control traffic.
pub const RESERVED_TYPES: [&str; 2] = ["ping", "pong"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: None,
        }
    }

    /// Client or server heartbeat probe.
    pub fn ping() -> Self {
        Self {
            kind: "ping".into(),
            data: Value::Null,
            timestamp: Some(Utc::now().to_rfc3339()),
        }
    }

    /// Heartbeat response.
    pub fn pong() -> Self {
        Self {
            kind: "pong".into(),
            data: Value::Null,
            timestamp: Some(Utc::now().to_rfc3339()),
        }
    }

    pub fn is_ping(&self) -> bool {
        self.kind == "ping"
    }

    pub fn is_pong(&self) -> bool {
        self.kind == "pong"
    }

    /// True for control types consumed inside the transport layer.
    pub fn is_reserved(&self) -> bool {
        RESERVED_TYPES.contains(&self.kind.as_str())
    }

    /// Stamp the send timestamp if the caller did not set one.
    pub fn stamped(mut self) -> Self {
        if self.timestamp.is_none() {
            self.timestamp = Some(Utc::now().to_rfc3339());
        }
        self
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_type_field() {
        let env = Envelope::new("text", json!({"text": "hi"})).stamped();
        let raw = env.to_json().unwrap();
        assert!(raw.contains("\"type\":\"text\""));
        let back = Envelope::from_json(&raw).unwrap();
        assert_eq!(back.kind, "text");
        assert_eq!(back.data["text"], "hi");
        assert!(back.timestamp.is_some());
    }

    #[test]
    fn stamped_preserves_existing_timestamp() {
        let mut env = Envelope::new("text", Value::Null);
        env.timestamp = Some("2026-01-01T00:00:00Z".into());
        assert_eq!(
            env.stamped().timestamp.as_deref(),
            Some("2026-01-01T00:00:00Z")
        );
    }

    #[test]
    fn reserved_types() {
        assert!(Envelope::ping().is_reserved());
        assert!(Envelope::pong().is_reserved());
        assert!(!Envelope::new("text", Value::Null).is_reserved());
    }

    #[test]
    fn missing_data_defaults_to_null() {
        let env = Envelope::from_json(r#"{"type":"ack"}"#).unwrap();
        assert_eq!(env.kind, "ack");
        assert!(env.data.is_null());
    }
}
