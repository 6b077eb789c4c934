//! Configuration types for dbrouter
//!
//! Configuration is loaded from JSON and validated at startup: unknown
//! keys, missing required keys, and syntactically invalid values are all
//! reported before any socket is opened.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::addr::{DestinationUri, TcpAddress};
use crate::destination::quarantine::QuarantineConfig;
use crate::destination::AccessMode;
use crate::error::ConfigError;
use crate::io::DEFAULT_BUFFER_SIZE;
use crate::protocol::ProtocolKind;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Routing binds; each listens on its own address with its own policy
    pub binds: Vec<BindConfig>,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Process-wide connection defaults
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Quarantine probe settings
    #[serde(default)]
    pub quarantine: QuarantineConfig,
}

impl Config {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when any bind is invalid or two binds share a
    /// listen address.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.binds.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one bind must be configured".into(),
            ));
        }

        let mut seen: std::collections::HashSet<SocketAddr> = std::collections::HashSet::new();
        for bind in &self.binds {
            bind.validate()?;
            if !seen.insert(bind.bind_address) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate bind_address: {}",
                    bind.bind_address
                )));
            }
        }

        if self.connection.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Create a minimal default configuration
    #[must_use]
    pub fn default_config() -> Self {
        Self {
            binds: vec![BindConfig::simple(
                "127.0.0.1:6446".parse().unwrap(),
                AccessMode::ReadWrite,
                "127.0.0.1:3306",
            )],
            log: LogConfig::default(),
            connection: ConnectionConfig::default(),
            quarantine: QuarantineConfig::default(),
        }
    }
}

/// What a bind's destinations option resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationsSpec {
    /// A literal address list; every entry eligible in every mode
    Static(Vec<TcpAddress>),
    /// A metadata-cache group to be resolved at startup
    MetadataGroup {
        /// Name of the metadata cache
        cache: String,
        /// Replication group id
        group: String,
    },
}

/// Behaviour when a bind is at its connection cap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapacityPolicy {
    /// Stop accepting until a session finishes (default)
    Block,
    /// Accept, send a canned busy error, close
    Reject,
}

impl Default for CapacityPolicy {
    fn default() -> Self {
        Self::Block
    }
}

/// One routing bind
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BindConfig {
    /// Listening address
    pub bind_address: SocketAddr,

    /// Access mode: which destination subset is eligible
    pub mode: AccessMode,

    /// Comma list of `host[:port]`, or a `metadata+cache://` URI
    pub destinations: String,

    /// Protocol family; fixes the default destination port
    #[serde(default)]
    pub protocol: ProtocolKind,

    /// Per-backend connect attempt bound, in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Idle bound in the relay phase, in seconds
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,

    /// Concurrent client cap for this bind; the process-wide default
    /// applies when unset
    #[serde(default)]
    pub max_connections: Option<usize>,

    /// Per-session buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Stream handshake payloads larger than the buffer instead of
    /// rejecting them
    #[serde(default = "default_true")]
    pub stream_large_payloads: bool,

    /// What to do when the bind is at capacity
    #[serde(default)]
    pub capacity_policy: CapacityPolicy,

    /// Read-only binds only: fall back to the writable subset when no
    /// read-only destination exists
    #[serde(default)]
    pub fallback_to_writable: bool,

    /// Client networks rejected by this bind
    #[serde(default)]
    pub blocked_client_networks: Vec<ipnet::IpNet>,

    /// TCP accept backlog
    #[serde(default = "default_backlog")]
    pub tcp_backlog: u32,
}

impl BindConfig {
    /// Create a bind with defaults for everything optional
    #[must_use]
    pub fn simple(bind_address: SocketAddr, mode: AccessMode, destinations: &str) -> Self {
        Self {
            bind_address,
            mode,
            destinations: destinations.to_string(),
            protocol: ProtocolKind::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
            wait_timeout_secs: default_wait_timeout_secs(),
            max_connections: None,
            buffer_size: default_buffer_size(),
            stream_large_payloads: true,
            capacity_policy: CapacityPolicy::default(),
            fallback_to_writable: false,
            blocked_client_networks: Vec::new(),
            tcp_backlog: default_backlog(),
        }
    }

    /// Validate this bind
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.wait_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "wait_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.buffer_size < 128 {
            return Err(ConfigError::ValidationError(
                "buffer_size must be at least 128 bytes".into(),
            ));
        }
        if self.tcp_backlog == 0 {
            return Err(ConfigError::ValidationError(
                "tcp_backlog must be greater than 0".into(),
            ));
        }
        if let Some(0) = self.max_connections {
            return Err(ConfigError::ValidationError(
                "max_connections must be greater than 0".into(),
            ));
        }
        self.parse_destinations()?;
        Ok(())
    }

    /// Parse the destinations option into either a literal address list or
    /// a metadata group reference.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` on an empty value, a malformed address, an
    /// unknown URI scheme, or a bad metadata path.
    pub fn parse_destinations(&self) -> Result<DestinationsSpec, ConfigError> {
        let value = self.destinations.trim();
        if value.is_empty() {
            return Err(ConfigError::ValidationError(
                "destinations is required and needs a value".into(),
            ));
        }

        if DestinationUri::looks_like_uri(value) {
            let uri = DestinationUri::parse(value)?;
            let (cache, group) = uri.metadata_group()?;
            return Ok(DestinationsSpec::MetadataGroup { cache, group });
        }

        let default_port = self.protocol.default_port();
        let mut addrs = Vec::new();
        for token in value.split(',') {
            addrs.push(TcpAddress::parse_with_default(token, default_port)?);
        }
        Ok(DestinationsSpec::Static(addrs))
    }

    /// Per-attempt connect timeout as a `Duration`
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Relay idle bound as a `Duration`
    #[must_use]
    pub const fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }
}

/// Process-wide connection defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Concurrent client cap applied to binds without their own
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// How long shutdown waits for sessions to finish before cancelling
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl ConnectionConfig {
    /// Drain timeout as a `Duration`
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include the module target in log lines
    #[serde(default)]
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: false,
        }
    }
}

const fn default_connect_timeout_ms() -> u64 {
    1000
}

const fn default_wait_timeout_secs() -> u64 {
    28800
}

const fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

const fn default_backlog() -> u32 {
    1024
}

const fn default_max_connections() -> usize {
    512
}

const fn default_drain_timeout_secs() -> u64 {
    10
}

const fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}
