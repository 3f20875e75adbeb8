//! Transport failure classification.
//!
//! Pure lookup tables mapping a raw failure (an error message, or a
//! protocol close code plus reason text) to a structured category,
//! severity, and recommended retry policy. Classification never logs or
//! counts anything itself; `ErrorStats` is the separate counter the
//! caller feeds.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Connection,
    Network,
    Handshake,
    Authentication,
    RateLimit,
    Protocol,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Network => "network",
            ErrorKind::Handshake => "handshake",
            ErrorKind::Authentication => "authentication",
            ErrorKind::RateLimit => "rateLimit",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Category a close code folds into when counted as an error.
    pub fn from_close_code(code: u16) -> Self {
        match code {
            1002 | 1003 | 1007 | 1009 | 1010 => ErrorKind::Protocol,
            1008 => ErrorKind::Authentication,
            1013 => ErrorKind::RateLimit,
            1015 => ErrorKind::Handshake,
            1006 | 1014 => ErrorKind::Connection,
            _ => ErrorKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// Recommended retry parameters for a failure category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl RetryPolicy {
    /// Policy table, keyed by category. Authentication is retried less
    /// than connection failures; rate limiting gets the most patient
    /// schedule.
    pub fn for_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Authentication => RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(2000),
                max_delay: Duration::from_millis(10_000),
                backoff_factor: 1.5,
            },
            ErrorKind::RateLimit => RetryPolicy {
                max_retries: 10,
                base_delay: Duration::from_millis(5000),
                max_delay: Duration::from_millis(60_000),
                backoff_factor: 1.5,
            },
            // connection, network, handshake, protocol, unknown
            _ => RetryPolicy {
                max_retries: 5,
                base_delay: Duration::from_millis(1000),
                max_delay: Duration::from_millis(30_000),
                backoff_factor: 2.0,
            },
        }
    }
}

/// One classified failure. Created fresh per event, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub kind: ErrorKind,
    pub severity: Severity,
    /// Named pattern that matched, if any.
    pub pattern: Option<&'static str>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub retry: RetryPolicy,
}

/// A classified protocol-level closure.
#[derive(Debug, Clone, Serialize)]
pub struct CloseInfo {
    pub code: u16,
    pub name: &'static str,
    pub description: &'static str,
    pub severity: Severity,
    pub reason: String,
    pub kind: ErrorKind,
    pub should_reconnect: bool,
    pub is_abnormal: bool,
    /// Suggested wait before retrying, keyed off the close code.
    #[serde(skip)]
    pub recovery_hint: Duration,
    pub timestamp: DateTime<Utc>,
}

/// Fixed close-code table: name, description, default severity.
const CLOSE_CODES: &[(u16, &str, &str, Severity)] = &[
    (1000, "NORMAL_CLOSURE", "Normal closure", Severity::Info),
    (1001, "GOING_AWAY", "Going away", Severity::Info),
    (1002, "PROTOCOL_ERROR", "Protocol error", Severity::Error),
    (1003, "UNSUPPORTED_DATA", "Unsupported data", Severity::Error),
    (1004, "RESERVED", "Reserved", Severity::Warn),
    (1005, "NO_STATUS_RCVD", "No status received", Severity::Warn),
    (1006, "ABNORMAL_CLOSURE", "Abnormal closure", Severity::Error),
    (
        1007,
        "INVALID_FRAME_PAYLOAD_DATA",
        "Invalid frame payload data",
        Severity::Error,
    ),
    (1008, "POLICY_VIOLATION", "Policy violation", Severity::Error),
    (1009, "MESSAGE_TOO_BIG", "Message too big", Severity::Error),
    (
        1010,
        "MANDATORY_EXTENSION",
        "Mandatory extension",
        Severity::Error,
    ),
    (1011, "INTERNAL_ERROR", "Internal server error", Severity::Error),
    (1012, "SERVICE_RESTART", "Service restart", Severity::Warn),
    (1013, "TRY_AGAIN_LATER", "Try again later", Severity::Warn),
    (1014, "BAD_GATEWAY", "Bad gateway", Severity::Error),
    (1015, "TLS_HANDSHAKE", "TLS handshake failure", Severity::Error),
];

/// Ordered message-pattern table. First match wins.
const ERROR_PATTERNS: &[(ErrorKind, &str, &[&str])] = &[
    (
        ErrorKind::Connection,
        "CONNECTION_REFUSED",
        &["econnrefused", "connection refused"],
    ),
    (
        ErrorKind::Network,
        "NETWORK_ERROR",
        &["enetunreach", "network", "etimedout", "timed out"],
    ),
    (
        ErrorKind::Authentication,
        "AUTHENTICATION_ERROR",
        &["unauthorized", "authentication", "invalid token"],
    ),
    (
        ErrorKind::RateLimit,
        "RATE_LIMIT_ERROR",
        &["rate limit", "too many requests"],
    ),
    (
        ErrorKind::Handshake,
        "HANDSHAKE_ERROR",
        &["handshake", "invalid response", "unexpected server response"],
    ),
    (
        ErrorKind::Protocol,
        "PROTOCOL_ERROR",
        &["protocol", "invalid frame"],
    ),
];

/// Codes that indicate an intentional, non-recoverable termination:
/// normal closure, going away, policy violation, internal error.
const NO_RECONNECT_CODES: [u16; 4] = [1000, 1001, 1008, 1011];

const ABNORMAL_CODES: [u16; 7] = [1002, 1006, 1007, 1009, 1011, 1014, 1015];

pub fn should_reconnect_on_close(code: u16) -> bool {
    !NO_RECONNECT_CODES.contains(&code)
}

pub fn is_abnormal_close(code: u16) -> bool {
    ABNORMAL_CODES.contains(&code)
}

/// Suggested retry delay per close code: abnormal closures retry
/// quickly, service restarts and throttling wait longer.
fn recovery_hint(code: u16) -> Duration {
    match code {
        1006 => Duration::from_millis(1000),
        1012 => Duration::from_millis(5000),
        1013 => Duration::from_millis(10_000),
        _ => Duration::from_millis(2000),
    }
}

fn severity_for_kind(kind: ErrorKind) -> Severity {
    match kind {
        ErrorKind::Connection | ErrorKind::Network => Severity::Warn,
        ErrorKind::Authentication | ErrorKind::Protocol | ErrorKind::Handshake => Severity::Error,
        ErrorKind::RateLimit => Severity::Info,
        ErrorKind::Unknown => Severity::Warn,
    }
}

/// Classify a raw error message.
pub fn classify_error(message: &str) -> Classification {
    let lowered = message.to_lowercase();

    let mut kind = ErrorKind::Unknown;
    let mut pattern = None;
    for (candidate, name, needles) in ERROR_PATTERNS {
        if needles.iter().any(|needle| lowered.contains(needle)) {
            kind = *candidate;
            pattern = Some(*name);
            break;
        }
    }

    Classification {
        kind,
        severity: severity_for_kind(kind),
        pattern,
        message: message.to_string(),
        timestamp: Utc::now(),
        retry: RetryPolicy::for_kind(kind),
    }
}

/// Classify a protocol close code plus free-form reason text.
pub fn classify_close(code: u16, reason: &str) -> CloseInfo {
    let entry = CLOSE_CODES.iter().find(|(c, ..)| *c == code);
    let (name, description, severity) = match entry {
        Some((_, name, description, severity)) => (*name, *description, *severity),
        None => ("UNKNOWN", "Unknown close code", Severity::Warn),
    };

    CloseInfo {
        code,
        name,
        description,
        severity,
        reason: reason.to_string(),
        kind: ErrorKind::from_close_code(code),
        should_reconnect: should_reconnect_on_close(code),
        is_abnormal: is_abnormal_close(code),
        recovery_hint: recovery_hint(code),
        timestamp: Utc::now(),
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ErrorStat {
    pub count: u64,
    pub last_occurrence: DateTime<Utc>,
}

/// Per-category failure counters backing `GET /errors`.
#[derive(Default)]
pub struct ErrorStats {
    inner: Mutex<HashMap<ErrorKind, ErrorStat>>,
}

impl ErrorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, kind: ErrorKind) {
        let mut inner = self.inner.lock();
        let entry = inner.entry(kind).or_insert(ErrorStat {
            count: 0,
            last_occurrence: Utc::now(),
        });
        entry.count += 1;
        entry.last_occurrence = Utc::now();
    }

    pub fn snapshot(&self) -> HashMap<&'static str, ErrorStat> {
        self.inner
            .lock()
            .iter()
            .map(|(kind, stat)| (kind.as_str(), *stat))
            .collect()
    }

    pub fn total(&self) -> u64 {
        self.inner.lock().values().map(|stat| stat.count).sum()
    }

    pub fn reset(&self) {
        self.inner.lock().clear();
    }
}
