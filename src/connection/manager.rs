//! Connection admission and drain
//!
//! Each bind has a connection manager: a semaphore sized to the bind's
//! connection cap, the bind's statistics, and the session cancel channel.
//! Shutdown is two-phase: drain up to the configured timeout, then cancel
//! whatever is left.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tracing::{info, warn};

use super::stats::{ConnectionStats, StatsSnapshot};
use crate::config::CapacityPolicy;

/// Admission gate and lifecycle for one bind's sessions
pub struct ConnectionManager {
    semaphore: Arc<Semaphore>,
    max_connections: usize,
    capacity_policy: CapacityPolicy,
    stats: Arc<ConnectionStats>,
    drain_timeout: Duration,
    shutdown_tx: broadcast::Sender<()>,
    shutting_down: AtomicBool,
}

impl ConnectionManager {
    /// Create a manager with the given cap and policy
    #[must_use]
    pub fn new(
        max_connections: usize,
        capacity_policy: CapacityPolicy,
        drain_timeout: Duration,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            semaphore: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            capacity_policy,
            stats: Arc::new(ConnectionStats::new()),
            drain_timeout,
            shutdown_tx,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Capacity policy of this bind
    #[must_use]
    pub const fn capacity_policy(&self) -> CapacityPolicy {
        self.capacity_policy
    }

    /// Wait for a permit. Used by the `block` capacity policy: the accept
    /// loop parks here while the bind is at its cap.
    pub async fn acquire_permit(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore).acquire_owned().await.ok()
    }

    /// Take a permit without waiting. Used by the `reject` policy.
    #[must_use]
    pub fn try_acquire_permit(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore).try_acquire_owned().ok()
    }

    /// This bind's statistics
    #[must_use]
    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    /// Snapshot of this bind's statistics
    #[must_use]
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Sessions currently holding a permit
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.max_connections - self.semaphore.available_permits()
    }

    /// Remaining capacity
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Whether the bind is at its cap
    #[must_use]
    pub fn at_capacity(&self) -> bool {
        self.semaphore.available_permits() == 0
    }

    /// Subscribe to the session cancel signal
    #[must_use]
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Whether shutdown has been initiated
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    /// Two-phase shutdown: wait up to the drain timeout for sessions to
    /// finish, then force-cancel the rest.
    ///
    /// Draining is observed by reclaiming the whole permit capacity: the
    /// acquire completes exactly when the last session hands its permit
    /// back, with no polling.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let capacity = u32::try_from(self.max_connections).unwrap_or(u32::MAX);

        let drained = tokio::time::timeout(
            self.drain_timeout,
            Arc::clone(&self.semaphore).acquire_many_owned(capacity),
        )
        .await;

        match drained {
            Ok(_all_permits) => {
                info!("All sessions drained");
            }
            Err(_) => {
                warn!(
                    "Drain timeout reached, cancelling {} remaining session(s)",
                    self.active_connections()
                );
                let _ = self.shutdown_tx.send(());

                // Cancelled sessions release their permits as they unwind;
                // give them a short grace bound
                let _ = tokio::time::timeout(
                    Duration::from_secs(1),
                    Arc::clone(&self.semaphore).acquire_many_owned(capacity),
                )
                .await;
            }
        }
    }
}
