//! Runtime counters and dependency health for monitoring.

pub mod circuit_breaker;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerState};

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Monotonic counters shared by every connection task.
#[derive(Debug)]
pub struct ServerStats {
    started_at: Instant,
    connections_opened: AtomicU64,
    connections_rejected: AtomicU64,
    events_handled: AtomicU64,
    auth_failures: AtomicU64,
    events_dropped: AtomicU64,
    chat_delivered: AtomicU64,
    chat_dropped: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`] for logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub uptime_seconds: u64,
    pub active_connections: usize,
    pub connections_opened: u64,
    pub connections_rejected: u64,
    pub events_handled: u64,
    pub auth_failures: u64,
    pub events_dropped: u64,
    pub chat_delivered: u64,
    pub chat_dropped: u64,
}

impl Default for ServerStats {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            connections_opened: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            events_handled: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            chat_delivered: AtomicU64::new(0),
            chat_dropped: AtomicU64::new(0),
        }
    }
}

impl ServerStats {
    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_handled(&self) {
        self.events_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auth_failed(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chat_delivered(&self) {
        self.chat_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chat_dropped(&self) {
        self.chat_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, active_connections: usize) -> StatsSnapshot {
        StatsSnapshot {
            uptime_seconds: self.started_at.elapsed().as_secs(),
            active_connections,
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            events_handled: self.events_handled.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            chat_delivered: self.chat_delivered.load(Ordering::Relaxed),
            chat_dropped: self.chat_dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = ServerStats::default();
        stats.connection_opened();
        stats.connection_opened();
        stats.connection_rejected();
        stats.event_handled();
        stats.event_dropped();
        stats.auth_failed();
        stats.chat_delivered();
        stats.chat_dropped();

        let snap = stats.snapshot(1);
        assert_eq!(snap.active_connections, 1);
        assert_eq!(snap.connections_opened, 2);
        assert_eq!(snap.connections_rejected, 1);
        assert_eq!(snap.events_handled, 1);
        assert_eq!(snap.events_dropped, 1);
        assert_eq!(snap.auth_failures, 1);
        assert_eq!(snap.chat_delivered, 1);
        assert_eq!(snap.chat_dropped, 1);
    }
}
