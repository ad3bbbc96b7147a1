//! # Server Statistics
//!
//! Lightweight counters describing connection churn and request volume, read
//! by tests to observe what a client did on the wire.
//!
//! ## Design Principles
//! 1. **Accumulator Pattern**: atomic counters aggregate events cheaply.
//! 2. **Zero-Cost Access**: snapshots are plain `Copy` structs.
//!
//! `Ordering::Relaxed` is enough; no cross-field ordering is needed.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of [`ServerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Currently open client connections.
    pub connections: u64,
    /// Connections accepted since start.
    pub connections_total: u64,
    /// Request frames handled.
    pub requests_total: u64,
    /// Error responses sent, protocol failures included.
    pub errors_total: u64,
}

#[derive(Debug, Default)]
pub struct ServerStats {
    connections: AtomicU64,
    connections_total: AtomicU64,
    requests_total: AtomicU64,
    errors_total: AtomicU64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        // Saturate instead of wrapping if calls are ever unbalanced.
        let _ = self
            .connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections: self.connections.load(Ordering::Relaxed),
            connections_total: self.connections_total.load(Ordering::Relaxed),
            requests_total: self.requests_total.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_gauge() {
        let stats = ServerStats::new();
        stats.connection_opened();
        stats.connection_opened();
        stats.connection_closed();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.connections, 1);
        assert_eq!(snapshot.connections_total, 2);
    }

    #[test]
    fn test_gauge_never_underflows() {
        let stats = ServerStats::new();
        stats.connection_closed();
        assert_eq!(stats.snapshot().connections, 0);
    }

    #[test]
    fn test_counters() {
        let stats = ServerStats::new();
        stats.record_request();
        stats.record_request();
        stats.record_error();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.requests_total, 2);
        assert_eq!(snapshot.errors_total, 1);
    }
}
