//! Metadata resolver seam and named-cache registry
//!
//! A resolver turns a logical name (a replication group, a shard key) into
//! destination lists. The resolver itself is an external collaborator;
//! this module only defines the capability trait, the registry of named
//! caches, and the glue that refreshes a destination set from a group
//! lookup. The router caches nothing beyond what the collaborator returns.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{Destination, DestinationRole, DestinationSet};
use crate::addr::TcpAddress;
use crate::error::ResolverError;

/// Result of a group lookup, split by backend role
#[derive(Debug, Clone, Default)]
pub struct GroupLookup {
    /// Writable (primary) backends
    pub writable: Vec<TcpAddress>,
    /// Read-only (secondary) backends
    pub read_only: Vec<TcpAddress>,
}

/// Capability of a metadata-backed resolver
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve a replication group into writable and read-only address
    /// lists.
    async fn lookup_group(&self, group_id: &str) -> Result<GroupLookup, ResolverError>;

    /// Resolve a sharding key into an address list.
    async fn lookup_shard(
        &self,
        table: &str,
        shard_key: &str,
    ) -> Result<Vec<TcpAddress>, ResolverError>;
}

/// Registry of named resolver caches
///
/// A cache is initialised at most once per name; repeated `init` calls for
/// the same name are no-ops. Lookups go through the registered resolver.
#[derive(Default)]
pub struct CacheRegistry {
    caches: Mutex<HashMap<String, Arc<dyn Resolver>>>,
}

impl CacheRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolver under a cache name. A no-op when the name is
    /// already taken.
    pub fn init(&self, name: impl Into<String>, resolver: Arc<dyn Resolver>) {
        let name = name.into();
        let mut caches = self.caches.lock();
        if caches.contains_key(&name) {
            debug!("Metadata cache '{}' already initialized", name);
            return;
        }
        info!("Initializing metadata cache '{}'", name);
        caches.insert(name, resolver);
    }

    /// Whether a cache with this name exists
    #[must_use]
    pub fn have_cache(&self, name: &str) -> bool {
        self.caches.lock().contains_key(name)
    }

    fn resolver(&self, name: &str) -> Result<Arc<dyn Resolver>, ResolverError> {
        self.caches
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| ResolverError::NotInitialised {
                name: name.to_string(),
            })
    }

    /// Look up a replication group through a named cache.
    ///
    /// # Errors
    ///
    /// `NotInitialised` when no cache with this name exists; whatever the
    /// resolver returns otherwise.
    pub async fn lookup_group(
        &self,
        name: &str,
        group_id: &str,
    ) -> Result<GroupLookup, ResolverError> {
        let resolver = self.resolver(name)?;
        resolver.lookup_group(group_id).await
    }

    /// Look up a shard through a named cache.
    ///
    /// # Errors
    ///
    /// `NotInitialised` when no cache with this name exists; whatever the
    /// resolver returns otherwise.
    pub async fn lookup_shard(
        &self,
        name: &str,
        table: &str,
        shard_key: &str,
    ) -> Result<Vec<TcpAddress>, ResolverError> {
        let resolver = self.resolver(name)?;
        resolver.lookup_shard(table, shard_key).await
    }
}

static GLOBAL_REGISTRY: Lazy<CacheRegistry> = Lazy::new(CacheRegistry::new);

/// The process-global registry facade.
///
/// The router service owns its own registry reference; this facade exists
/// for embedders that initialise caches before constructing the service.
#[must_use]
pub fn global_registry() -> &'static CacheRegistry {
    &GLOBAL_REGISTRY
}

/// Refresh a destination set from a group lookup, tagging addresses with
/// the role the resolver reported.
///
/// # Errors
///
/// Propagates resolver errors; the destination set is left untouched on
/// failure.
pub async fn refresh_from_group(
    set: &DestinationSet,
    registry: &CacheRegistry,
    cache_name: &str,
    group_id: &str,
) -> Result<(), ResolverError> {
    let lookup = registry.lookup_group(cache_name, group_id).await?;

    let mut destinations =
        Vec::with_capacity(lookup.writable.len() + lookup.read_only.len());
    for addr in lookup.writable {
        destinations.push(Destination::with_role(addr, DestinationRole::ReadWrite));
    }
    for addr in lookup.read_only {
        destinations.push(Destination::with_role(addr, DestinationRole::ReadOnly));
    }

    info!(
        "Metadata group '{}' resolved to {} destination(s) via cache '{}'",
        group_id,
        destinations.len(),
        cache_name
    );
    set.replace(destinations);
    Ok(())
}
