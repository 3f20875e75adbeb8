//! Server-side connection registry.
//!
//! Tracks every open socket in two indices, by connection id and by
//! owning user, mutated together under one lock so a reader can never
//! observe them disagreeing. Delivery goes through the record's
//! [`ConnectionSink`]; a failed write marks the record dead and the
//! sweeper evicts it on the next pass.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::envelope::Envelope;
use crate::error::{LinkError, Result};
use crate::server::monitor::{HealthMonitor, MonitorEvent};
use crate::server::sink::ConnectionSink;

/// One registered socket.
pub struct ConnectionRecord {
    pub id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub last_ping_sent: Option<DateTime<Utc>>,
    pub last_pong_received: Option<DateTime<Utc>>,
    pub alive: bool,
    pub message_count: u64,
    sink: Box<dyn ConnectionSink>,
}

/// Aggregate view for `stats()` and the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub unique_users: usize,
    pub alive: usize,
    pub dead: usize,
    pub average_age_secs: f64,
    pub total_messages: u64,
}

#[derive(Default)]
struct RegistryInner {
    by_id: HashMap<String, ConnectionRecord>,
    by_user: HashMap<String, HashSet<String>>,
    shut_down: bool,
}

impl RegistryInner {
    /// Remove from both indices. The only eviction path, so the
    /// indices cannot drift apart.
    fn remove(&mut self, id: &str) -> Option<ConnectionRecord> {
        let record = self.by_id.remove(id)?;
        if let Some(user) = &record.user_id {
            if let Some(ids) = self.by_user.get_mut(user) {
                ids.remove(id);
                if ids.is_empty() {
                    self.by_user.remove(user);
                }
            }
        }
        Some(record)
    }
}

pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
    monitor: Arc<HealthMonitor>,
    max_connections: usize,
    idle_timeout: Duration,
    heartbeat_interval: Duration,
}

impl ConnectionRegistry {
    pub fn new(
        monitor: Arc<HealthMonitor>,
        max_connections: usize,
        idle_timeout: Duration,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            monitor,
            max_connections,
            idle_timeout,
            heartbeat_interval,
        }
    }

    /// Register a socket. Refused after shutdown or at the connection
    /// limit; the refused sink is closed with 1013 so the peer backs
    /// off.
    pub fn add_connection(
        &self,
        id: impl Into<String>,
        user_id: Option<String>,
        sink: Box<dyn ConnectionSink>,
    ) -> Result<()> {
        let id = id.into();
        let mut inner = self.inner.write();
        if inner.shut_down {
            let _ = sink.close(1001, "server shutting down");
            return Err(LinkError::ConnectionClosed("registry shut down".into()));
        }
        if inner.by_id.len() >= self.max_connections {
            warn!(limit = self.max_connections, "connection refused at capacity");
            let _ = sink.close(1013, "server at capacity");
            return Err(LinkError::AtCapacity(self.max_connections));
        }

        let now = Utc::now();
        if let Some(user) = &user_id {
            inner
                .by_user
                .entry(user.clone())
                .or_default()
                .insert(id.clone());
        }
        inner.by_id.insert(
            id.clone(),
            ConnectionRecord {
                id: id.clone(),
                user_id: user_id.clone(),
                session_id: None,
                connected_at: now,
                last_activity: now,
                last_ping_sent: None,
                last_pong_received: None,
                alive: true,
                message_count: 0,
                sink,
            },
        );
        drop(inner);

        self.monitor.record(MonitorEvent::ConnectionAdded);
        info!(connection = %id, user = ?user_id, "connection registered");
        Ok(())
    }

    /// Unregister and return the record, if present.
    pub fn remove_connection(&self, id: &str) -> Option<ConnectionRecord> {
        let removed = self.inner.write().remove(id);
        if removed.is_some() {
            self.monitor.record(MonitorEvent::ConnectionRemoved);
            debug!(connection = %id, "connection removed");
        }
        removed
    }

    /// Deliver to one connection. Returns whether the write succeeded;
    /// a failure marks the record dead for the sweeper.
    pub fn send_to(&self, id: &str, envelope: &Envelope) -> bool {
        let payload = match envelope.clone().stamped().to_json() {
            Ok(payload) => payload,
            Err(error) => {
                warn!(%error, "unserializable envelope");
                return false;
            }
        };
        let mut inner = self.inner.write();
        let Some(record) = inner.by_id.get_mut(id) else {
            return false;
        };
        if !record.alive || !record.sink.is_open() {
            return false;
        }
        match record.sink.send(payload) {
            Ok(()) => {
                record.message_count += 1;
                record.last_activity = Utc::now();
                drop(inner);
                self.monitor.record(MonitorEvent::MessageSent);
                true
            }
            Err(error) => {
                record.alive = false;
                drop(inner);
                warn!(connection = %id, %error, "send failed, marking dead");
                self.monitor.record(MonitorEvent::MessageFailed);
                false
            }
        }
    }

    /// Deliver to every connection a user owns. Returns successful
    /// deliveries.
    pub fn send_to_user(&self, user_id: &str, envelope: &Envelope) -> usize {
        let ids: Vec<String> = {
            let inner = self.inner.read();
            inner
                .by_user
                .get(user_id)
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default()
        };
        ids.iter()
            .filter(|id| self.send_to(id, envelope))
            .count()
    }

    /// Deliver to every connection except `exclude`. Returns successful
    /// deliveries.
    pub fn broadcast(&self, envelope: &Envelope, exclude: Option<&str>) -> usize {
        let ids: Vec<String> = {
            let inner = self.inner.read();
            inner
                .by_id
                .keys()
                .filter(|id| exclude != Some(id.as_str()))
                .cloned()
                .collect()
        };
        ids.iter()
            .filter(|id| self.send_to(id, envelope))
            .count()
    }

    /// Stamp inbound activity on a connection.
    pub fn touch_activity(&self, id: &str) {
        if let Some(record) = self.inner.write().by_id.get_mut(id) {
            record.last_activity = Utc::now();
        }
    }

    pub fn record_ping(&self, id: &str) {
        if let Some(record) = self.inner.write().by_id.get_mut(id) {
            record.last_ping_sent = Some(Utc::now());
        }
    }

    pub fn record_pong(&self, id: &str) {
        if let Some(record) = self.inner.write().by_id.get_mut(id) {
            record.last_pong_received = Some(Utc::now());
            record.last_activity = Utc::now();
        }
    }

    pub fn mark_dead(&self, id: &str) {
        if let Some(record) = self.inner.write().by_id.get_mut(id) {
            record.alive = false;
        }
    }

    /// Attach the session identifier once the handshake has resolved
    /// it.
    pub fn set_session_id(&self, id: &str, session_id: impl Into<String>) -> Result<()> {
        match self.inner.write().by_id.get_mut(id) {
            Some(record) => {
                record.session_id = Some(session_id.into());
                Ok(())
            }
            None => Err(LinkError::UnknownConnection(id.to_string())),
        }
    }

    /// Connection id currently bound to a session.
    pub fn find_by_session(&self, session_id: &str) -> Option<String> {
        self.inner
            .read()
            .by_id
            .values()
            .find(|record| record.session_id.as_deref() == Some(session_id))
            .map(|record| record.id.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn user_connection_count(&self, user_id: &str) -> usize {
        self.inner
            .read()
            .by_user
            .get(user_id)
            .map(|ids| ids.len())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> ConnectionStats {
        let inner = self.inner.read();
        let now = Utc::now();
        let total = inner.by_id.len();
        let alive = inner.by_id.values().filter(|r| r.alive).count();
        let total_messages: u64 = inner.by_id.values().map(|r| r.message_count).sum();
        let average_age_secs = if total == 0 {
            0.0
        } else {
            let sum: i64 = inner
                .by_id
                .values()
                .map(|r| (now - r.connected_at).num_seconds().max(0))
                .sum();
            sum as f64 / total as f64
        };
        ConnectionStats {
            total_connections: total,
            unique_users: inner.by_user.len(),
            alive,
            dead: total - alive,
            average_age_secs,
            total_messages,
        }
    }

    /// One sweep: evict dead and idle connections, ping the quiet but
    /// healthy ones. Returns the eviction count.
    pub fn perform_health_check(&self) -> usize {
        let now = Utc::now();
        let idle_cutoff =
            now - chrono::Duration::milliseconds(self.idle_timeout.as_millis() as i64);
        let ping_cutoff =
            now - chrono::Duration::milliseconds(self.heartbeat_interval.as_millis() as i64 / 2);

        let mut evict: Vec<(String, &'static str)> = Vec::new();
        let mut ping: Vec<String> = Vec::new();
        {
            let inner = self.inner.read();
            for record in inner.by_id.values() {
                if !record.alive || !record.sink.is_open() {
                    evict.push((record.id.clone(), "transport closed"));
                } else if record.last_activity < idle_cutoff {
                    evict.push((record.id.clone(), "idle timeout"));
                } else if record.last_activity < ping_cutoff {
                    ping.push(record.id.clone());
                }
            }
        }

        for (id, reason) in &evict {
            let mut inner = self.inner.write();
            if let Some(record) = inner.remove(id) {
                let _ = record.sink.close(1000, reason);
                drop(inner);
                self.monitor.record(MonitorEvent::ConnectionRemoved);
                info!(connection = %id, reason, "connection evicted");
            }
        }

        let ping_envelope = Envelope::ping();
        for id in &ping {
            if self.send_to(id, &ping_envelope) {
                self.record_ping(id);
            }
        }

        if !evict.is_empty() || !ping.is_empty() {
            debug!(evicted = evict.len(), pinged = ping.len(), "health sweep");
        }
        evict.len()
    }

    /// Close every connection (1001, the peer should not reconnect to
    /// this instance) and refuse new ones. Idempotent.
    pub fn shutdown(&self) {
        let mut inner = self.inner.write();
        if inner.shut_down {
            return;
        }
        inner.shut_down = true;
        let count = inner.by_id.len();
        for record in inner.by_id.values() {
            let _ = record.sink.close(1001, "server shutdown");
        }
        inner.by_id.clear();
        inner.by_user.clear();
        drop(inner);

        for _ in 0..count {
            self.monitor.record(MonitorEvent::ConnectionRemoved);
        }
        info!(closed = count, "registry shut down");
    }

    /// Run `perform_health_check` on the heartbeat cadence until
    /// shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let period = registry.heartbeat_interval;
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            timer.tick().await;
            loop {
                timer.tick().await;
                if registry.inner.read().shut_down {
                    break;
                }
                registry.perform_health_check();
            }
            debug!("registry sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::sink::RecordingSink;

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(
            Arc::new(HealthMonitor::default()),
            100,
            Duration::from_secs(300),
            Duration::from_secs(30),
        )
    }

    fn add(reg: &ConnectionRegistry, id: &str, user: Option<&str>) -> Arc<RecordingSink> {
        let sink = Arc::new(RecordingSink::new());
        reg.add_connection(id, user.map(str::to_string), Box::new(SharedSink(sink.clone())))
            .unwrap();
        sink
    }

    /// Lets a test keep a handle on a sink the registry owns.
    struct SharedSink(Arc<RecordingSink>);

    impl ConnectionSink for SharedSink {
        fn send(&self, text: String) -> crate::error::Result<()> {
            self.0.send(text)
        }
        fn is_open(&self) -> bool {
            self.0.is_open()
        }
        fn close(&self, code: u16, reason: &str) -> crate::error::Result<()> {
            self.0.close(code, reason)
        }
    }

    #[test]
    fn indices_stay_consistent() {
        let reg = registry();
        add(&reg, "c1", Some("alice"));
        add(&reg, "c2", Some("alice"));
        add(&reg, "c3", Some("bob"));
        assert_eq!(reg.connection_count(), 3);
        assert_eq!(reg.user_connection_count("alice"), 2);

        reg.remove_connection("c1");
        assert_eq!(reg.connection_count(), 2);
        assert_eq!(reg.user_connection_count("alice"), 1);

        reg.remove_connection("c2");
        // Last socket gone: the user entry disappears with it.
        assert_eq!(reg.user_connection_count("alice"), 0);
        assert_eq!(reg.stats().unique_users, 1);
    }

    #[test]
    fn send_to_delivers_and_counts() {
        let reg = registry();
        let sink = add(&reg, "c1", None);
        assert!(reg.send_to("c1", &Envelope::new("chat", serde_json::json!({"text": "hi"}))));
        assert!(!reg.send_to("missing", &Envelope::ping()));

        let texts = sink.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("\"chat\""));
        assert_eq!(reg.stats().total_messages, 1);
    }

    #[test]
    fn failed_send_marks_dead_and_skips_counts() {
        let reg = registry();
        let healthy = add(&reg, "c1", Some("alice"));
        let broken = add(&reg, "c2", Some("alice"));
        broken.set_failing(true);

        let delivered = reg.send_to_user("alice", &Envelope::new("notice", serde_json::json!({})));
        assert_eq!(delivered, 1);
        assert_eq!(healthy.texts().len(), 1);

        // Dead record: skipped on the next fan-out, evicted on sweep.
        let delivered = reg.send_to_user("alice", &Envelope::new("notice", serde_json::json!({})));
        assert_eq!(delivered, 1);
        assert_eq!(reg.perform_health_check(), 1);
        assert_eq!(reg.connection_count(), 1);
    }

    #[test]
    fn broadcast_excludes_sender() {
        let reg = registry();
        let a = add(&reg, "c1", None);
        let b = add(&reg, "c2", None);
        let c = add(&reg, "c3", None);

        let delivered = reg.broadcast(&Envelope::new("announce", serde_json::json!({})), Some("c2"));
        assert_eq!(delivered, 2);
        assert_eq!(a.texts().len(), 1);
        assert_eq!(b.texts().len(), 0);
        assert_eq!(c.texts().len(), 1);
    }

    #[test]
    fn capacity_limit_refuses_with_1013() {
        let reg = ConnectionRegistry::new(
            Arc::new(HealthMonitor::default()),
            1,
            Duration::from_secs(300),
            Duration::from_secs(30),
        );
        add(&reg, "c1", None);

        let refused = Arc::new(RecordingSink::new());
        let result = reg.add_connection("c2", None, Box::new(SharedSink(refused.clone())));
        assert!(matches!(result, Err(LinkError::AtCapacity(1))));
        assert_eq!(refused.close_frame(), Some((1013, "server at capacity".into())));
        assert_eq!(reg.connection_count(), 1);
    }

    #[test]
    fn idle_connections_are_evicted() {
        let reg = ConnectionRegistry::new(
            Arc::new(HealthMonitor::default()),
            100,
            Duration::from_millis(0),
            Duration::from_secs(30),
        );
        let sink = add(&reg, "c1", Some("alice"));
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(reg.perform_health_check(), 1);
        assert_eq!(reg.connection_count(), 0);
        assert_eq!(sink.close_frame(), Some((1000, "idle timeout".into())));
        // Evicted sockets no longer count as deliveries.
        assert_eq!(reg.send_to_user("alice", &Envelope::ping()), 0);
    }

    #[test]
    fn quiet_connections_get_pinged() {
        let reg = ConnectionRegistry::new(
            Arc::new(HealthMonitor::default()),
            100,
            Duration::from_secs(300),
            // Ping threshold is half of this; zero makes any quiet
            // connection eligible immediately.
            Duration::from_millis(0),
        );
        let sink = add(&reg, "c1", None);
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(reg.perform_health_check(), 0);
        let texts = sink.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("\"ping\""));
    }

    #[test]
    fn session_lookup() {
        let reg = registry();
        add(&reg, "c1", None);
        reg.set_session_id("c1", "sess-9").unwrap();
        assert_eq!(reg.find_by_session("sess-9"), Some("c1".to_string()));
        assert_eq!(reg.find_by_session("sess-0"), None);
        assert!(reg.set_session_id("missing", "x").is_err());
    }

    #[test]
    fn shutdown_closes_all_and_refuses_new() {
        let reg = registry();
        let a = add(&reg, "c1", None);
        let b = add(&reg, "c2", Some("bob"));

        reg.shutdown();
        reg.shutdown(); // idempotent

        assert_eq!(reg.connection_count(), 0);
        assert_eq!(a.close_frame(), Some((1001, "server shutdown".into())));
        assert_eq!(b.close_frame(), Some((1001, "server shutdown".into())));

        let refused = Arc::new(RecordingSink::new());
        assert!(reg
            .add_connection("c3", None, Box::new(SharedSink(refused.clone())))
            .is_err());
        assert_eq!(refused.close_frame().map(|(code, _)| code), Some(1001));
    }
}
