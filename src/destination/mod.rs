//! Destination set management
//!
//! A destination set is an ordered sequence of backend addresses with a
//! round-robin cursor. Selections read an immutable snapshot, so they are
//! lock-free; mutations build a new snapshot under a mutex and swap it in
//! atomically. The cursor is a separate atomic that is reconciled modulo
//! the snapshot length.

pub mod quarantine;
pub mod resolver;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::addr::TcpAddress;
use crate::error::SelectionError;

/// Selection filter of a bind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessMode {
    /// Route to writable backends
    ReadWrite,
    /// Route to read-only backends
    ReadOnly,
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadWrite => write!(f, "read-write"),
            Self::ReadOnly => write!(f, "read-only"),
        }
    }
}

/// Role a backend plays within its group
///
/// Addresses from a literal destination list are `Any` (eligible in every
/// mode); the metadata resolver tags addresses as writable or read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationRole {
    /// Untagged: eligible regardless of access mode
    Any,
    /// A writable (primary) backend
    ReadWrite,
    /// A read-only (secondary) backend
    ReadOnly,
}

impl DestinationRole {
    /// Whether a backend with this role serves the given access mode
    #[must_use]
    pub const fn serves(self, mode: AccessMode) -> bool {
        match (self, mode) {
            (Self::Any, _) => true,
            (Self::ReadWrite, AccessMode::ReadWrite) => true,
            (Self::ReadOnly, AccessMode::ReadOnly) => true,
            _ => false,
        }
    }
}

/// One backend in a destination set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Backend address
    pub address: TcpAddress,
    /// Role tag used by the access-mode filter
    pub role: DestinationRole,
}

impl Destination {
    /// Create an untagged destination
    #[must_use]
    pub const fn new(address: TcpAddress) -> Self {
        Self {
            address,
            role: DestinationRole::Any,
        }
    }

    /// Create a destination with a role tag
    #[must_use]
    pub const fn with_role(address: TcpAddress, role: DestinationRole) -> Self {
        Self { address, role }
    }
}

/// Ordered backend sequence with a round-robin cursor
///
/// Shared read-mostly between the router service, sessions, and the
/// quarantine manager. `remove` does not abort a connect attempt already
/// in flight to the removed address: the attempt runs on the snapshot it
/// selected from, and the next selection sees the new snapshot.
#[derive(Debug)]
pub struct DestinationSet {
    entries: ArcSwap<Vec<Destination>>,
    cursor: AtomicUsize,
    write_lock: Mutex<()>,
}

impl Default for DestinationSet {
    fn default() -> Self {
        Self::new()
    }
}

impl DestinationSet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(Vec::new()),
            cursor: AtomicUsize::new(0),
            write_lock: Mutex::new(()),
        }
    }

    /// Create a set from untagged addresses
    #[must_use]
    pub fn from_addresses(addresses: Vec<TcpAddress>) -> Self {
        let set = Self::new();
        for addr in addresses {
            set.add(addr);
        }
        set
    }

    /// Append a destination if no entry with the same host and port exists
    pub fn add(&self, address: TcpAddress) {
        self.add_with_role(address, DestinationRole::Any);
    }

    /// Append a tagged destination if not already present
    pub fn add_with_role(&self, address: TcpAddress, role: DestinationRole) {
        let _guard = self.write_lock.lock();
        let current = self.entries.load();
        if current.iter().any(|d| d.address == address) {
            return;
        }
        let mut next: Vec<Destination> = current.as_ref().clone();
        next.push(Destination::with_role(address, role));
        self.entries.store(Arc::new(next));
    }

    /// Remove the first entry matching host and port.
    ///
    /// The cursor is adjusted so it keeps pointing at the same logical
    /// successor.
    ///
    /// # Errors
    ///
    /// Returns `SelectionError::NotFound` when no entry matches.
    pub fn remove(&self, host: &str, port: u16) -> Result<(), SelectionError> {
        let _guard = self.write_lock.lock();
        let current = self.entries.load();
        let idx = current
            .iter()
            .position(|d| d.address.host() == host && d.address.port() == port)
            .ok_or_else(|| SelectionError::NotFound {
                host: host.to_string(),
                port,
            })?;

        let mut next: Vec<Destination> = current.as_ref().clone();
        next.remove(idx);

        if next.is_empty() {
            self.cursor.store(0, Ordering::Relaxed);
        } else {
            let pos = self.cursor.load(Ordering::Relaxed) % current.len();
            let adjusted = if pos > idx { pos - 1 } else { pos };
            self.cursor.store(adjusted % next.len(), Ordering::Relaxed);
        }

        self.entries.store(Arc::new(next));
        Ok(())
    }

    /// Look up a stored destination by host and port.
    ///
    /// # Errors
    ///
    /// Returns `SelectionError::NotFound` when no entry matches.
    pub fn get(&self, host: &str, port: u16) -> Result<Destination, SelectionError> {
        self.entries
            .load()
            .iter()
            .find(|d| d.address.host() == host && d.address.port() == port)
            .cloned()
            .ok_or_else(|| SelectionError::NotFound {
                host: host.to_string(),
                port,
            })
    }

    /// Remove all destinations
    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        self.entries.store(Arc::new(Vec::new()));
        self.cursor.store(0, Ordering::Relaxed);
    }

    /// Replace the whole sequence, reconciling the cursor modulo the new
    /// length. Used by the metadata resolver refresh.
    pub fn replace(&self, destinations: Vec<Destination>) {
        let _guard = self.write_lock.lock();
        if destinations.is_empty() {
            self.cursor.store(0, Ordering::Relaxed);
        } else {
            let pos = self.cursor.load(Ordering::Relaxed) % destinations.len().max(1);
            self.cursor.store(pos, Ordering::Relaxed);
        }
        self.entries.store(Arc::new(destinations));
    }

    /// Atomically return the current cursor position and advance it.
    ///
    /// # Errors
    ///
    /// Returns `SelectionError::EmptySet` when the set is empty.
    pub fn next_index(&self) -> Result<usize, SelectionError> {
        let len = self.entries.load().len();
        if len == 0 {
            return Err(SelectionError::EmptySet);
        }
        Ok(self.cursor.fetch_add(1, Ordering::Relaxed) % len)
    }

    /// Immutable snapshot of the current sequence
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<Destination>> {
        self.entries.load_full()
    }

    /// Number of destinations
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    /// Whether the set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(host: &str, port: u16) -> TcpAddress {
        TcpAddress::new(host, port).unwrap()
    }

    #[test]
    fn test_add_dedupes() {
        let set = DestinationSet::new();
        set.add(addr("a", 3306));
        set.add(addr("b", 3306));
        set.add(addr("a", 3306));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_round_robin_order() {
        let set = DestinationSet::from_addresses(vec![
            addr("a", 3306),
            addr("b", 3306),
            addr("c", 3306),
        ]);

        let order: Vec<usize> = (0..6).map(|_| set.next_index().unwrap()).collect();
        assert_eq!(order, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_round_robin_fairness() {
        let k = 4;
        let n = 25;
        let set = DestinationSet::from_addresses(
            (0..k).map(|i| addr(&format!("host{i}"), 3306)).collect(),
        );

        let mut counts = vec![0usize; k];
        for _ in 0..n * k {
            counts[set.next_index().unwrap()] += 1;
        }
        assert!(counts.iter().all(|&c| c == n));
    }

    #[test]
    fn test_next_index_empty() {
        let set = DestinationSet::new();
        assert_eq!(set.next_index(), Err(SelectionError::EmptySet));
    }

    #[test]
    fn test_get_and_remove() {
        let set = DestinationSet::from_addresses(vec![addr("a", 3306), addr("b", 3307)]);

        let d = set.get("b", 3307).unwrap();
        assert_eq!(d.address.port(), 3307);

        set.remove("a", 3306).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.get("a", 3306).is_err());
        assert!(matches!(
            set.remove("a", 3306),
            Err(SelectionError::NotFound { .. })
        ));
    }

    #[test]
    fn test_remove_keeps_logical_successor() {
        let set = DestinationSet::from_addresses(vec![
            addr("a", 1),
            addr("b", 1),
            addr("c", 1),
        ]);

        // Cursor now points at b (index 1)
        assert_eq!(set.next_index().unwrap(), 0);

        // Removing a shifts b to index 0; the next selection must still be b
        set.remove("a", 1).unwrap();
        let next = set.next_index().unwrap();
        assert_eq!(set.snapshot()[next].address.host(), "b");
    }

    #[test]
    fn test_remove_completed_before_selection_is_visible() {
        let set = DestinationSet::from_addresses(vec![addr("a", 1), addr("b", 1)]);
        set.remove("a", 1).unwrap();

        for _ in 0..8 {
            let idx = set.next_index().unwrap();
            assert_ne!(set.snapshot()[idx].address.host(), "a");
        }
    }

    #[test]
    fn test_add_is_selected_within_set_size_calls() {
        let set = DestinationSet::from_addresses(vec![addr("a", 1), addr("b", 1)]);
        set.add(addr("c", 1));

        let k = set.len();
        let mut seen_c = false;
        for _ in 0..k {
            let idx = set.next_index().unwrap();
            if set.snapshot()[idx].address.host() == "c" {
                seen_c = true;
            }
        }
        assert!(seen_c);
    }

    #[test]
    fn test_clear() {
        let set = DestinationSet::from_addresses(vec![addr("a", 1)]);
        set.clear();
        assert!(set.is_empty());
        assert_eq!(set.next_index(), Err(SelectionError::EmptySet));
    }

    #[test]
    fn test_replace_with_roles() {
        let set = DestinationSet::new();
        set.replace(vec![
            Destination::with_role(addr("rw", 1), DestinationRole::ReadWrite),
            Destination::with_role(addr("ro", 1), DestinationRole::ReadOnly),
        ]);

        assert_eq!(set.len(), 2);
        assert_eq!(set.get("rw", 1).unwrap().role, DestinationRole::ReadWrite);
        assert_eq!(set.get("ro", 1).unwrap().role, DestinationRole::ReadOnly);
    }

    #[test]
    fn test_role_serves() {
        assert!(DestinationRole::Any.serves(AccessMode::ReadWrite));
        assert!(DestinationRole::Any.serves(AccessMode::ReadOnly));
        assert!(DestinationRole::ReadWrite.serves(AccessMode::ReadWrite));
        assert!(!DestinationRole::ReadWrite.serves(AccessMode::ReadOnly));
        assert!(DestinationRole::ReadOnly.serves(AccessMode::ReadOnly));
        assert!(!DestinationRole::ReadOnly.serves(AccessMode::ReadWrite));
    }

    #[test]
    fn test_snapshot_is_stable_across_mutation() {
        let set = DestinationSet::from_addresses(vec![addr("a", 1), addr("b", 1)]);
        let snap = set.snapshot();
        set.remove("a", 1).unwrap();
        // The earlier snapshot still sees both entries
        assert_eq!(snap.len(), 2);
        assert_eq!(set.len(), 1);
    }
}
