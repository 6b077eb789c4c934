//! dbrouter: TCP-level reverse proxy for MySQL client/server traffic
//!
//! Clients connect to a local bind; the router selects a backend from a
//! managed destination set and shuttles bytes in both directions for the
//! life of the session. Only the initial handshake exchange is inspected,
//! enough to enforce packet framing and sequence numbers and to honour a
//! client's TLS upgrade request; after that the router is a transparent
//! byte forwarder.
//!
//! # Features
//!
//! - **Destination management**: round-robin selection, read-write /
//!   read-only partitioning, quarantine of unreachable backends with
//!   background TCP probing
//! - **Sequential failover**: each session walks the destination set until
//!   one backend connects within the per-attempt timeout
//! - **Handshake inspection**: classic and X protocol framing checks, TLS
//!   passthrough, clean forwarding of server-side error packets
//! - **Bounded concurrency**: per-bind connection caps with blocking or
//!   fast-fail admission, two-phase drain on shutdown
//!
//! # Architecture
//!
//! ```text
//! Client → bind listener → session → handshake inspector → byte relay
//!                            ↓
//!                    backend connector → destination set ⊖ quarantine
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dbrouter::config::load_config;
//! use dbrouter::destination::resolver::global_registry;
//! use dbrouter::net::TcpConnector;
//! use dbrouter::server::RouterService;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("/etc/dbrouter/config.json")?;
//! let service =
//!     RouterService::build(&config, Arc::new(TcpConnector::new()), global_registry()).await?;
//! service.run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`addr`]: address and destination URI model
//! - [`config`]: configuration types and loading
//! - [`connection`]: sessions, admission, statistics
//! - [`destination`]: destination set, quarantine, resolver registry
//! - [`error`]: error types
//! - [`io`]: relay-phase bidirectional copy
//! - [`net`]: socket capability layer
//! - [`protocol`]: handshake inspection for both protocol families
//! - [`routing`]: backend selection and failover
//! - [`server`]: listeners, accept loops, lifecycle

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod addr;
pub mod config;
pub mod connection;
pub mod destination;
pub mod error;
pub mod io;
pub mod net;
pub mod protocol;
pub mod routing;
pub mod server;

// Re-export commonly used types at the crate root
pub use addr::{split_addr_port, DestinationUri, TcpAddress, CLASSIC_DEFAULT_PORT, X_DEFAULT_PORT};
pub use config::{
    load_config, load_config_str, load_config_with_env, BindConfig, CapacityPolicy, Config,
    ConnectionConfig, DestinationsSpec, LogConfig,
};
pub use connection::{
    handle_session, spawn_session, ConnectionManager, ConnectionStats, SessionContext,
    SessionResult, StatsSnapshot,
};
pub use destination::quarantine::{Quarantine, QuarantineConfig, QuarantineEntry};
pub use destination::resolver::{global_registry, CacheRegistry, GroupLookup, Resolver};
pub use destination::{AccessMode, Destination, DestinationRole, DestinationSet};
pub use error::{
    ConfigError, ConnectError, DbRouterError, ProtocolError, ResolverError, SelectionError,
    SessionError,
};
pub use io::{relay_with_idle, CopyResult, DEFAULT_BUFFER_SIZE};
pub use net::{Connector, TcpConnector};
pub use protocol::{HandshakeInspector, ProtocolKind, CLIENT_SSL};
pub use routing::BackendConnector;
pub use server::{BindListener, RouterBind, RouterService};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
