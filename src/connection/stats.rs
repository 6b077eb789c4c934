//! Per-bind connection statistics
//!
//! Lock-free counters updated by sessions and read by the service for
//! logging and shutdown reporting.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters for one bind
#[derive(Debug, Default)]
pub struct ConnectionStats {
    total_accepted: AtomicU64,
    completed: AtomicU64,
    errored: AtomicU64,
    rejected: AtomicU64,
    active: AtomicUsize,
    bytes_to_server: AtomicU64,
    bytes_to_client: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    /// Sessions accepted since start
    pub total_accepted: u64,
    /// Sessions that finished without error
    pub completed: u64,
    /// Sessions that ended in an error
    pub errored: u64,
    /// Clients turned away at the capacity cap
    pub rejected: u64,
    /// Currently running sessions
    pub active: usize,
    /// Bytes relayed client to server
    pub bytes_to_server: u64,
    /// Bytes relayed server to client
    pub bytes_to_client: u64,
}

impl ConnectionStats {
    /// Create zeroed counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A session was accepted and is now active
    pub fn record_accepted(&self) {
        self.total_accepted.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    /// A session finished cleanly
    pub fn record_completed(&self, to_server: u64, to_client: u64) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.bytes_to_server.fetch_add(to_server, Ordering::Relaxed);
        self.bytes_to_client.fetch_add(to_client, Ordering::Relaxed);
    }

    /// A session ended with an error
    pub fn record_error(&self) {
        self.errored.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    /// A client was turned away at the capacity cap
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Currently running sessions
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Sessions accepted since start
    #[must_use]
    pub fn total_accepted(&self) -> u64 {
        self.total_accepted.load(Ordering::Relaxed)
    }

    /// Copy the counters
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_accepted: self.total_accepted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            errored: self.errored.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            bytes_to_server: self.bytes_to_server.load(Ordering::Relaxed),
            bytes_to_client: self.bytes_to_client.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_counters() {
        let stats = ConnectionStats::new();

        stats.record_accepted();
        stats.record_accepted();
        assert_eq!(stats.active(), 2);
        assert_eq!(stats.total_accepted(), 2);

        stats.record_completed(100, 200);
        stats.record_error();

        let snap = stats.snapshot();
        assert_eq!(snap.active, 0);
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.errored, 1);
        assert_eq!(snap.bytes_to_server, 100);
        assert_eq!(snap.bytes_to_client, 200);
    }

    #[test]
    fn test_rejected_counter() {
        let stats = ConnectionStats::new();
        stats.record_rejected();
        stats.record_rejected();
        assert_eq!(stats.snapshot().rejected, 2);
        assert_eq!(stats.active(), 0);
    }
}
