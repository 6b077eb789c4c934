//! Quarantine of unreachable destinations
//!
//! A destination that fails a connect attempt is quarantined: excluded
//! from selection until a background probe task reaches it again over TCP.
//! An address is either quarantined or eligible, never both. Entries whose
//! address left the underlying destination set are garbage-collected on
//! the next probe cycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::DestinationSet;
use crate::addr::TcpAddress;
use crate::net::Connector;

/// Quarantine probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuarantineConfig {
    /// How often the probe task wakes, in milliseconds
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    /// Per-probe connect timeout, in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

const fn default_probe_interval_ms() -> u64 {
    1000
}

const fn default_probe_timeout_ms() -> u64 {
    500
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: default_probe_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl QuarantineConfig {
    /// Probe interval as a `Duration`
    #[must_use]
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    /// Probe timeout as a `Duration`
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Bookkeeping for one quarantined address
#[derive(Debug, Clone, Copy)]
pub struct QuarantineEntry {
    /// When the address first failed
    pub first_failure: Instant,
    /// When the probe task last tried it
    pub last_probe: Option<Instant>,
}

/// The quarantine map
///
/// The mutex is held only for map operations, never across I/O.
#[derive(Debug, Default)]
pub struct Quarantine {
    entries: Mutex<HashMap<TcpAddress, QuarantineEntry>>,
}

impl Quarantine {
    /// Create an empty quarantine
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed connect attempt. A new entry gets
    /// `first_failure = now`; an existing entry keeps its original
    /// failure time.
    pub fn report_failure(&self, addr: &TcpAddress) {
        let mut entries = self.entries.lock();
        entries.entry(addr.clone()).or_insert_with(|| {
            debug!("Quarantining destination {}", addr);
            QuarantineEntry {
                first_failure: Instant::now(),
                last_probe: None,
            }
        });
    }

    /// Whether an address may be selected
    #[must_use]
    pub fn is_eligible(&self, addr: &TcpAddress) -> bool {
        !self.entries.lock().contains_key(addr)
    }

    /// Look up the entry for an address
    #[must_use]
    pub fn entry(&self, addr: &TcpAddress) -> Option<QuarantineEntry> {
        self.entries.lock().get(addr).copied()
    }

    /// Addresses currently quarantined
    #[must_use]
    pub fn quarantined(&self) -> Vec<TcpAddress> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Number of quarantined addresses
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the quarantine is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove an address after a successful probe. Returns whether the
    /// address was quarantined.
    pub fn reinstate(&self, addr: &TcpAddress) -> bool {
        self.entries.lock().remove(addr).is_some()
    }

    /// Record an unsuccessful probe
    pub fn mark_probed(&self, addr: &TcpAddress) {
        if let Some(entry) = self.entries.lock().get_mut(addr) {
            entry.last_probe = Some(Instant::now());
        }
    }

    /// Drop entries whose address is no longer in the destination set
    pub fn retain_known(&self, known: &[TcpAddress]) {
        self.entries.lock().retain(|addr, _| {
            let keep = known.contains(addr);
            if !keep {
                debug!("Dropping quarantine entry for removed destination {}", addr);
            }
            keep
        });
    }
}

/// Spawn the background probe task for one destination set.
///
/// Every `probe_interval` the task garbage-collects stale entries and
/// attempts a short TCP connect to each quarantined address through the
/// injected connector. A successful probe reinstates the address for the
/// next selection. The task exits when the shutdown channel fires or
/// closes.
pub fn spawn_probe_task(
    quarantine: Arc<Quarantine>,
    destinations: Arc<DestinationSet>,
    connector: Arc<dyn Connector>,
    config: QuarantineConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(config.probe_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {}
            }

            let known: Vec<TcpAddress> = destinations
                .snapshot()
                .iter()
                .map(|d| d.address.clone())
                .collect();
            quarantine.retain_known(&known);

            for addr in quarantine.quarantined() {
                match shutdown.try_recv() {
                    Ok(()) | Err(broadcast::error::TryRecvError::Closed) => return,
                    Err(_) => {}
                }

                match connector.connect(&addr, config.probe_timeout()).await {
                    Ok(stream) => {
                        drop(stream);
                        if quarantine.reinstate(&addr) {
                            info!("Destination {} reachable again, leaving quarantine", addr);
                        }
                    }
                    Err(e) => {
                        quarantine.mark_probed(&addr);
                        debug!("Quarantine probe to {} failed: {}", addr, e);
                    }
                }
            }
        }

        if !quarantine.is_empty() {
            warn!(
                "Quarantine probe task stopping with {} destination(s) still quarantined",
                quarantine.len()
            );
        }
        debug!("Quarantine probe task stopped");
    })
}
