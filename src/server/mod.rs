//! Router service: binds, accept loops, lifecycle
//!
//! The service owns one listener per configured bind, each with its own
//! destination set, quarantine, access mode, and connection manager.
//! Accepting is gated by the bind's semaphore: at capacity the loop either
//! parks (default) or turns the client away with a canned busy error.
//! Shutdown stops the accept loops first, then drains sessions, then stops
//! the quarantine probes.

mod listener;

pub use listener::BindListener;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{CapacityPolicy, Config, DestinationsSpec};
use crate::connection::{spawn_session, ConnectionManager, SessionContext};
use crate::destination::quarantine::{spawn_probe_task, Quarantine};
use crate::destination::resolver::{refresh_from_group, CacheRegistry};
use crate::destination::DestinationSet;
use crate::error::{DbRouterError, Result};
use crate::net::Connector;
use crate::protocol::{classic, ProtocolKind};
use crate::routing::BackendConnector;

/// Runtime state of one routing bind
pub struct RouterBind {
    listener: BindListener,
    manager: Arc<ConnectionManager>,
    backend: Arc<BackendConnector>,
    protocol: ProtocolKind,
    wait_timeout: Duration,
    buffer_size: usize,
    stream_large_payloads: bool,
    blocked_client_networks: Arc<Vec<ipnet::IpNet>>,
    max_connections: usize,
}

impl RouterBind {
    /// The actual bound listen address
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// This bind's connection manager
    #[must_use]
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// This bind's backend selector
    #[must_use]
    pub fn backend(&self) -> &Arc<BackendConnector> {
        &self.backend
    }
}

/// The router service
pub struct RouterService {
    binds: Vec<Arc<RouterBind>>,
    accept_stop_tx: broadcast::Sender<()>,
    probe_stop_tx: broadcast::Sender<()>,
    probe_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl RouterService {
    /// Build the service from a validated configuration.
    ///
    /// Resolves metadata-backed destination lists, creates the destination
    /// sets and quarantines, spawns the probe tasks, and opens every
    /// listening socket. Any failure here is a startup error.
    ///
    /// # Errors
    ///
    /// Returns configuration, resolver, or I/O errors before any client is
    /// accepted.
    pub async fn build(
        config: &Config,
        connector: Arc<dyn Connector>,
        registry: &CacheRegistry,
    ) -> Result<Self> {
        let (accept_stop_tx, _) = broadcast::channel(1);
        let (probe_stop_tx, _) = broadcast::channel(1);

        let mut binds = Vec::with_capacity(config.binds.len());
        let mut probe_handles = Vec::with_capacity(config.binds.len());

        for bind_cfg in &config.binds {
            let destinations = match bind_cfg.parse_destinations()? {
                DestinationsSpec::Static(addrs) => {
                    Arc::new(DestinationSet::from_addresses(addrs))
                }
                DestinationsSpec::MetadataGroup { cache, group } => {
                    let set = Arc::new(DestinationSet::new());
                    refresh_from_group(&set, registry, &cache, &group).await?;
                    set
                }
            };

            let quarantine = Arc::new(Quarantine::new());
            probe_handles.push(spawn_probe_task(
                Arc::clone(&quarantine),
                Arc::clone(&destinations),
                Arc::clone(&connector),
                config.quarantine.clone(),
                probe_stop_tx.subscribe(),
            ));

            let backend = Arc::new(BackendConnector::new(
                destinations,
                quarantine,
                Arc::clone(&connector),
                bind_cfg.mode,
                bind_cfg.fallback_to_writable,
                bind_cfg.connect_timeout(),
            ));

            let max_connections = bind_cfg
                .max_connections
                .unwrap_or(config.connection.max_connections);
            let manager = Arc::new(ConnectionManager::new(
                max_connections,
                bind_cfg.capacity_policy,
                config.connection.drain_timeout(),
            ));

            let listener = BindListener::bind(bind_cfg.bind_address, bind_cfg.tcp_backlog)?;
            info!(
                "Routing bind {} ready: mode={}, protocol={}, {} destination(s), max {} connections",
                listener.local_addr(),
                bind_cfg.mode,
                bind_cfg.protocol,
                backend.destinations().len(),
                max_connections,
            );

            binds.push(Arc::new(RouterBind {
                listener,
                manager,
                backend,
                protocol: bind_cfg.protocol,
                wait_timeout: bind_cfg.wait_timeout(),
                buffer_size: bind_cfg.buffer_size,
                stream_large_payloads: bind_cfg.stream_large_payloads,
                blocked_client_networks: Arc::new(bind_cfg.blocked_client_networks.clone()),
                max_connections,
            }));
        }

        Ok(Self {
            binds,
            accept_stop_tx,
            probe_stop_tx,
            probe_handles: Mutex::new(probe_handles),
        })
    }

    /// The runtime binds, in configuration order
    #[must_use]
    pub fn binds(&self) -> &[Arc<RouterBind>] {
        &self.binds
    }

    /// The actual listen addresses, in configuration order
    #[must_use]
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.binds.iter().map(|b| b.local_addr()).collect()
    }

    /// Run every accept loop until shutdown or until all binds are down.
    ///
    /// # Errors
    ///
    /// Returns an error only when every accept loop failed, which is the
    /// unrecoverable all-binds-down condition.
    pub async fn run(&self) -> Result<()> {
        let mut tasks = Vec::with_capacity(self.binds.len());
        for bind in &self.binds {
            let bind = Arc::clone(bind);
            let stop = self.accept_stop_tx.subscribe();
            tasks.push(tokio::spawn(run_accept_loop(bind, stop)));
        }

        let total = tasks.len();
        let mut failed = 0;
        for task in tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Accept loop failed: {}", e);
                    failed += 1;
                }
                Err(e) => {
                    error!("Accept loop task aborted: {}", e);
                    failed += 1;
                }
            }
        }

        if total > 0 && failed == total {
            return Err(DbRouterError::Io(io::Error::new(
                io::ErrorKind::Other,
                "all routing binds are down",
            )));
        }
        Ok(())
    }

    /// Two-phase shutdown: stop accepting, drain sessions per bind, stop
    /// the quarantine probes.
    pub async fn shutdown(&self) {
        info!("Stopping accept loops");
        let _ = self.accept_stop_tx.send(());

        for bind in &self.binds {
            bind.manager.shutdown().await;
        }

        let _ = self.probe_stop_tx.send(());
        let handles: Vec<JoinHandle<()>> = self.probe_handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!("Router service stopped");
    }
}

/// One bind's accept loop.
///
/// With the `block` policy a permit is taken before accepting, so the
/// listener simply stops accepting at the cap and resumes exactly when a
/// session terminates. With `reject` the client is accepted, sent a canned
/// busy error, and closed.
async fn run_accept_loop(
    bind: Arc<RouterBind>,
    mut stop: broadcast::Receiver<()>,
) -> Result<()> {
    info!(
        "Accept loop started on {} (max {} connections, {:?} at capacity)",
        bind.local_addr(),
        bind.max_connections,
        bind.manager.capacity_policy(),
    );

    loop {
        if bind.manager.is_shutting_down() {
            break;
        }

        match bind.manager.capacity_policy() {
            CapacityPolicy::Block => {
                let permit = tokio::select! {
                    _ = stop.recv() => break,
                    permit = bind.manager.acquire_permit() => match permit {
                        Some(p) => p,
                        None => break,
                    },
                };

                let (stream, peer) = tokio::select! {
                    _ = stop.recv() => break,
                    res = bind.listener.accept() => match res {
                        Ok(pair) => pair,
                        Err(e) if is_recoverable_accept(&e) => {
                            warn!("Recoverable accept error on {}: {}", bind.local_addr(), e);
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    },
                };

                admit(&bind, stream, peer, permit);
            }
            CapacityPolicy::Reject => {
                let (stream, peer) = tokio::select! {
                    _ = stop.recv() => break,
                    res = bind.listener.accept() => match res {
                        Ok(pair) => pair,
                        Err(e) if is_recoverable_accept(&e) => {
                            warn!("Recoverable accept error on {}: {}", bind.local_addr(), e);
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    },
                };

                match bind.manager.try_acquire_permit() {
                    Some(permit) => admit(&bind, stream, peer, permit),
                    None => {
                        bind.manager.stats().record_rejected();
                        warn!(
                            "Bind {} at capacity, turning away client {}",
                            bind.local_addr(),
                            peer
                        );
                        let protocol = bind.protocol;
                        tokio::spawn(async move {
                            send_busy_and_close(stream, protocol).await;
                        });
                    }
                }
            }
        }
    }

    info!("Accept loop on {} stopped", bind.local_addr());
    Ok(())
}

fn admit(
    bind: &Arc<RouterBind>,
    stream: TcpStream,
    peer: SocketAddr,
    permit: tokio::sync::OwnedSemaphorePermit,
) {
    bind.manager.stats().record_accepted();
    debug!(
        "Accepted client {} on {} ({}/{} active)",
        peer,
        bind.local_addr(),
        bind.manager.active_connections(),
        bind.max_connections,
    );

    let ctx = SessionContext {
        client: stream,
        client_addr: peer,
        backend: Arc::clone(&bind.backend),
        protocol: bind.protocol,
        wait_timeout: bind.wait_timeout,
        buffer_size: bind.buffer_size,
        stream_large_payloads: bind.stream_large_payloads,
        blocked_client_networks: Arc::clone(&bind.blocked_client_networks),
        shutdown: bind.manager.subscribe_shutdown(),
    };

    spawn_session(ctx, Arc::clone(bind.manager.stats()), permit);
}

async fn send_busy_and_close(mut stream: TcpStream, protocol: ProtocolKind) {
    if protocol == ProtocolKind::Classic {
        let _ = stream.write_all(&classic::busy_error_packet()).await;
    }
    let _ = stream.shutdown().await;
}

fn is_recoverable_accept(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
