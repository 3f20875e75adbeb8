//! Health and metrics aggregation for the gateway.
//!
//! Counters update synchronously via [`HealthMonitor::record`]; a
//! collector task samples history and evaluates health on fixed
//! intervals. History is pruned to a retention period so the monitor
//! holds a bounded amount of memory over long uptimes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Pid, System};
use tracing::{debug, info, warn};

use crate::core::classify::ErrorKind;

/// Default collection cadence.
pub const COLLECTION_INTERVAL: Duration = Duration::from_secs(60);
/// Default health evaluation cadence.
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
/// How long history samples are kept.
pub const RETENTION: Duration = Duration::from_secs(24 * 60 * 60);
/// Trailing window for the error-rate check.
pub const ERROR_WINDOW: Duration = Duration::from_secs(5 * 60);

/// One observation fed into the monitor.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    ConnectionAdded,
    ConnectionRemoved,
    MessageSent,
    MessageReceived,
    MessageFailed,
    Error { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthIssue {
    pub severity: IssueSeverity,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub issues: Vec<HealthIssue>,
    pub checked_at: DateTime<Utc>,
}

/// Limits that flip the gateway to degraded or unhealthy.
#[derive(Debug, Clone)]
pub struct MonitorThresholds {
    pub max_connections: usize,
    /// Errors per message over the trailing window.
    pub max_error_rate: f64,
    pub max_memory_bytes: u64,
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            max_error_rate: 0.10,
            max_memory_bytes: 500 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSample {
    pub timestamp: DateTime<Utc>,
    pub current: usize,
    pub total: u64,
}

/// Cumulative message totals at sample time; windowed rates are
/// computed from deltas between samples.
#[derive(Debug, Clone, Serialize)]
pub struct MessageSample {
    pub timestamp: DateTime<Utc>,
    pub sent: u64,
    pub received: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorSample {
    pub timestamp: DateTime<Utc>,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSample {
    pub timestamp: DateTime<Utc>,
    pub connections: usize,
    pub memory_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub uptime_secs: u64,
    pub connections: ConnectionCounters,
    pub messages: MessageCounters,
    pub errors: ErrorCounters,
    pub memory_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionCounters {
    pub current: usize,
    pub peak: usize,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageCounters {
    pub sent: u64,
    pub received: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorCounters {
    pub total: u64,
    pub by_kind: HashMap<String, u64>,
}

/// Aggregates over a trailing window of performance samples.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub window_secs: u64,
    pub samples: usize,
    pub avg_connections: f64,
    pub peak_connections: usize,
    pub avg_memory_bytes: f64,
    pub peak_memory_bytes: u64,
    pub error_count: usize,
    pub error_rate: f64,
}

#[derive(Default)]
struct MonitorInner {
    current_connections: usize,
    peak_connections: usize,
    total_connections: u64,
    sent: u64,
    received: u64,
    failed: u64,
    errors_total: u64,
    errors_by_kind: HashMap<ErrorKind, u64>,
    connection_history: VecDeque<ConnectionSample>,
    message_history: VecDeque<MessageSample>,
    error_history: VecDeque<ErrorSample>,
    performance_history: VecDeque<PerformanceSample>,
}

pub struct HealthMonitor {
    started_at: DateTime<Utc>,
    thresholds: MonitorThresholds,
    retention: Duration,
    error_window: Duration,
    inner: Mutex<MonitorInner>,
    system: Mutex<System>,
    stopped: AtomicBool,
}

impl HealthMonitor {
    pub fn new(thresholds: MonitorThresholds) -> Self {
        Self {
            started_at: Utc::now(),
            thresholds,
            retention: RETENTION,
            error_window: ERROR_WINDOW,
            inner: Mutex::new(MonitorInner::default()),
            system: Mutex::new(System::new()),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn record(&self, event: MonitorEvent) {
        let mut inner = self.inner.lock();
        match event {
            MonitorEvent::ConnectionAdded => {
                inner.current_connections += 1;
                inner.total_connections += 1;
                inner.peak_connections = inner.peak_connections.max(inner.current_connections);
            }
            MonitorEvent::ConnectionRemoved => {
                inner.current_connections = inner.current_connections.saturating_sub(1);
            }
            MonitorEvent::MessageSent => inner.sent += 1,
            MonitorEvent::MessageReceived => inner.received += 1,
            MonitorEvent::MessageFailed => inner.failed += 1,
            MonitorEvent::Error { kind, message } => {
                inner.errors_total += 1;
                *inner.errors_by_kind.entry(kind).or_insert(0) += 1;
                inner.error_history.push_back(ErrorSample {
                    timestamp: Utc::now(),
                    kind,
                    message,
                });
            }
        }
    }

    /// Append one history snapshot and prune anything past retention.
    pub fn collect_sample(&self) {
        let memory = self.process_memory_bytes();
        let now = Utc::now();
        let mut inner = self.inner.lock();

        let sample = ConnectionSample {
            timestamp: now,
            current: inner.current_connections,
            total: inner.total_connections,
        };
        inner.connection_history.push_back(sample);
        let sample = MessageSample {
            timestamp: now,
            sent: inner.sent,
            received: inner.received,
            failed: inner.failed,
        };
        inner.message_history.push_back(sample);
        let sample = PerformanceSample {
            timestamp: now,
            connections: inner.current_connections,
            memory_bytes: memory,
        };
        inner.performance_history.push_back(sample);

        let cutoff = now - chrono::Duration::milliseconds(self.retention.as_millis() as i64);
        Self::prune(&mut inner, cutoff);
        debug!(
            connections = inner.current_connections,
            memory_bytes = memory,
            "monitor sample collected"
        );
    }

    fn prune(inner: &mut MonitorInner, cutoff: DateTime<Utc>) {
        while inner
            .connection_history
            .front()
            .is_some_and(|s| s.timestamp < cutoff)
        {
            inner.connection_history.pop_front();
        }
        while inner
            .message_history
            .front()
            .is_some_and(|s| s.timestamp < cutoff)
        {
            inner.message_history.pop_front();
        }
        while inner
            .error_history
            .front()
            .is_some_and(|s| s.timestamp < cutoff)
        {
            inner.error_history.pop_front();
        }
        while inner
            .performance_history
            .front()
            .is_some_and(|s| s.timestamp < cutoff)
        {
            inner.performance_history.pop_front();
        }
    }

    fn process_memory_bytes(&self) -> u64 {
        let mut system = self.system.lock();
        let pid = Pid::from_u32(std::process::id());
        if system.refresh_process(pid) {
            system.process(pid).map(|p| p.memory()).unwrap_or(0)
        } else {
            0
        }
    }

    /// Sent + received since `cutoff`, derived from the cumulative
    /// samples.
    fn messages_since(inner: &MonitorInner, cutoff: DateTime<Utc>) -> u64 {
        let baseline = inner
            .message_history
            .iter()
            .rev()
            .find(|s| s.timestamp <= cutoff)
            .map(|s| s.sent + s.received)
            .unwrap_or(0);
        (inner.sent + inner.received).saturating_sub(baseline)
    }

    /// Evaluate thresholds. Any error-severity issue makes the gateway
    /// unhealthy; warnings alone degrade it.
    pub fn health(&self) -> HealthReport {
        let memory = self.process_memory_bytes();
        let now = Utc::now();
        let inner = self.inner.lock();
        let mut issues = Vec::new();

        if inner.current_connections > self.thresholds.max_connections {
            issues.push(HealthIssue {
                severity: IssueSeverity::Warning,
                message: format!(
                    "connection count {} exceeds threshold {}",
                    inner.current_connections, self.thresholds.max_connections
                ),
            });
        }

        if memory > self.thresholds.max_memory_bytes {
            issues.push(HealthIssue {
                severity: IssueSeverity::Warning,
                message: format!(
                    "process memory {}B exceeds threshold {}B",
                    memory, self.thresholds.max_memory_bytes
                ),
            });
        }

        let cutoff = now - chrono::Duration::milliseconds(self.error_window.as_millis() as i64);
        let recent_errors = inner
            .error_history
            .iter()
            .filter(|s| s.timestamp >= cutoff)
            .count() as u64;
        let recent_messages = Self::messages_since(&inner, cutoff);
        let error_rate = if recent_messages == 0 {
            0.0
        } else {
            recent_errors as f64 / recent_messages as f64
        };
        if error_rate > self.thresholds.max_error_rate {
            issues.push(HealthIssue {
                severity: IssueSeverity::Error,
                message: format!(
                    "error rate {:.3} exceeds threshold {:.3} over trailing window",
                    error_rate, self.thresholds.max_error_rate
                ),
            });
        }

        let status = if issues.iter().any(|i| i.severity == IssueSeverity::Error) {
            HealthStatus::Unhealthy
        } else if !issues.is_empty() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthReport {
            status,
            issues,
            checked_at: now,
        }
    }

    pub fn metrics(&self) -> MetricsReport {
        let memory = self.process_memory_bytes();
        let inner = self.inner.lock();
        MetricsReport {
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
            connections: ConnectionCounters {
                current: inner.current_connections,
                peak: inner.peak_connections,
                total: inner.total_connections,
            },
            messages: MessageCounters {
                sent: inner.sent,
                received: inner.received,
                failed: inner.failed,
            },
            errors: ErrorCounters {
                total: inner.errors_total,
                by_kind: inner
                    .errors_by_kind
                    .iter()
                    .map(|(kind, count)| (kind.as_str().to_string(), *count))
                    .collect(),
            },
            memory_bytes: memory,
        }
    }

    pub fn performance_summary(&self, window: Duration) -> PerformanceSummary {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::milliseconds(window.as_millis() as i64);
        let inner = self.inner.lock();

        let samples: Vec<&PerformanceSample> = inner
            .performance_history
            .iter()
            .filter(|s| s.timestamp >= cutoff)
            .collect();
        let count = samples.len();

        let (avg_connections, peak_connections, avg_memory, peak_memory) = if count == 0 {
            (0.0, 0, 0.0, 0)
        } else {
            let sum_conn: usize = samples.iter().map(|s| s.connections).sum();
            let peak_conn = samples.iter().map(|s| s.connections).max().unwrap_or(0);
            let sum_mem: u64 = samples.iter().map(|s| s.memory_bytes).sum();
            let peak_mem = samples.iter().map(|s| s.memory_bytes).max().unwrap_or(0);
            (
                sum_conn as f64 / count as f64,
                peak_conn,
                sum_mem as f64 / count as f64,
                peak_mem,
            )
        };

        let error_count = inner
            .error_history
            .iter()
            .filter(|s| s.timestamp >= cutoff)
            .count();
        let window_messages = Self::messages_since(&inner, cutoff);
        let error_rate = if window_messages == 0 {
            0.0
        } else {
            error_count as f64 / window_messages as f64
        };

        PerformanceSummary {
            window_secs: window.as_secs(),
            samples: count,
            avg_connections,
            peak_connections,
            avg_memory_bytes: avg_memory,
            peak_memory_bytes: peak_memory,
            error_count,
            error_rate,
        }
    }

    /// Zero counters and drop history. The current connection count is
    /// kept; those connections are still open.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let current = inner.current_connections;
        *inner = MonitorInner {
            current_connections: current,
            peak_connections: current,
            ..MonitorInner::default()
        };
        info!("monitor counters reset");
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Drive collection and health evaluation until `stop()`.
    pub fn spawn_collector(
        self: &Arc<Self>,
        collection_interval: Duration,
        health_interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut collect = tokio::time::interval(collection_interval);
            collect.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut evaluate = tokio::time::interval(health_interval);
            evaluate.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // Both intervals fire immediately; skip the initial ticks.
            collect.tick().await;
            evaluate.tick().await;

            loop {
                tokio::select! {
                    _ = collect.tick() => {
                        if monitor.is_stopped() {
                            break;
                        }
                        monitor.collect_sample();
                    }
                    _ = evaluate.tick() => {
                        if monitor.is_stopped() {
                            break;
                        }
                        let report = monitor.health();
                        match report.status {
                            HealthStatus::Healthy => {}
                            HealthStatus::Degraded | HealthStatus::Unhealthy => {
                                warn!(
                                    status = ?report.status,
                                    issues = report.issues.len(),
                                    "gateway health check"
                                );
                            }
                        }
                    }
                }
            }
            debug!("monitor collector stopped");
        })
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(MonitorThresholds::default())
    }
}
