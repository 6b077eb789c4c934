//! Sequential failover across the destination set
//!
//! The backend connector walks the eligible destinations starting at the
//! round-robin cursor until one connects within the per-attempt timeout or
//! the set is exhausted. The cursor advances on every position visited, so
//! consecutive sessions spread load deterministically. Failed addresses
//! are reported to the quarantine and skipped by later selections.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use crate::addr::TcpAddress;
use crate::destination::quarantine::Quarantine;
use crate::destination::{AccessMode, DestinationSet};
use crate::error::SelectionError;
use crate::net::Connector;

/// Walks destinations in policy order until one connects
pub struct BackendConnector {
    destinations: Arc<DestinationSet>,
    quarantine: Arc<Quarantine>,
    connector: Arc<dyn Connector>,
    mode: AccessMode,
    fallback_to_writable: bool,
    connect_timeout: Duration,
}

impl BackendConnector {
    /// Create a connector for one bind
    #[must_use]
    pub fn new(
        destinations: Arc<DestinationSet>,
        quarantine: Arc<Quarantine>,
        connector: Arc<dyn Connector>,
        mode: AccessMode,
        fallback_to_writable: bool,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            destinations,
            quarantine,
            connector,
            mode,
            fallback_to_writable,
            connect_timeout,
        }
    }

    /// The destination set this connector selects from
    #[must_use]
    pub fn destinations(&self) -> &Arc<DestinationSet> {
        &self.destinations
    }

    /// The quarantine this connector reports to
    #[must_use]
    pub fn quarantine(&self) -> &Arc<Quarantine> {
        &self.quarantine
    }

    /// Access mode of this connector
    #[must_use]
    pub const fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Select the next backend and connect to it.
    ///
    /// # Errors
    ///
    /// - `EmptySet` when the destination set has no entries
    /// - `NoEligible` when the mode filter and quarantine exclude everything
    /// - `NoDestinations` when every eligible candidate failed to connect
    pub async fn connect_next(&self) -> Result<(TcpStream, TcpAddress), SelectionError> {
        let snapshot = self.destinations.snapshot();
        if snapshot.is_empty() {
            return Err(SelectionError::EmptySet);
        }

        // The mode filter; a read-only bind may opt into falling back to
        // the writable subset when no read-only backend exists.
        let mut serves: Vec<bool> = snapshot
            .iter()
            .map(|d| d.role.serves(self.mode))
            .collect();
        if self.mode == AccessMode::ReadOnly
            && self.fallback_to_writable
            && !serves.iter().any(|&s| s)
        {
            debug!("No read-only destination available, falling back to writable set");
            serves = snapshot
                .iter()
                .map(|d| d.role.serves(AccessMode::ReadWrite))
                .collect();
        }

        let mut attempted = false;
        for _ in 0..snapshot.len() {
            let idx = self.destinations.next_index()?;
            if idx >= snapshot.len() {
                // The live set shrank under us; stay within our snapshot
                continue;
            }
            let dest = &snapshot[idx];
            if !serves[idx] || !self.quarantine.is_eligible(&dest.address) {
                continue;
            }

            attempted = true;
            match self
                .connector
                .connect(&dest.address, self.connect_timeout)
                .await
            {
                Ok(stream) => {
                    debug!("Connected to destination {}", dest.address);
                    return Ok((stream, dest.address.clone()));
                }
                Err(e) => {
                    debug!("Failed connecting to {}: {}", dest.address, e);
                    self.quarantine.report_failure(&dest.address);
                }
            }
        }

        if attempted {
            Err(SelectionError::NoDestinations)
        } else {
            Err(SelectionError::NoEligible)
        }
    }
}
