//! Error types for dbrouter
//!
//! This module defines the error hierarchy for the router. Errors are
//! categorized by subsystem and include recovery hints used by the accept
//! loop and the session handler.

use std::io;

use thiserror::Error;

use crate::addr::TcpAddress;

/// Top-level error type for dbrouter
#[derive(Debug, Error)]
pub enum DbRouterError {
    /// Configuration errors (file parsing, validation, addresses, URIs)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Destination selection errors
    #[error("Selection error: {0}")]
    Selection(#[from] SelectionError),

    /// Backend connect errors
    #[error("Connect error: {0}")]
    Connect(#[from] ConnectError),

    /// Wire protocol errors during handshake inspection
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Session relay errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Metadata resolver errors
    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DbRouterError {
    /// Check if this error is recoverable (the accept loop may continue)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Selection(e) => e.is_recoverable(),
            Self::Connect(_) => true,
            Self::Protocol(_) => true,
            Self::Session(e) => e.is_recoverable(),
            Self::Resolver(e) => e.is_recoverable(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }
}

/// Configuration-related errors
///
/// All of these are fatal at startup: they are reported before any socket
/// is opened.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Invalid destination or bind address
    #[error("Invalid address '{value}': {reason}")]
    InvalidAddress { value: String, reason: String },

    /// Invalid destination URI
    #[error("Invalid destination URI '{value}': {reason}")]
    InvalidUri { value: String, reason: String },

    /// URI scheme not understood by this router
    #[error("Unknown destination URI scheme '{scheme}'")]
    UnknownScheme { scheme: String },

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are never recoverable without user intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }

    /// Create an invalid address error
    pub fn invalid_address(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid URI error
    pub fn invalid_uri(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUri {
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Destination selection errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// The destination set has no entries at all
    #[error("Destination set is empty")]
    EmptySet,

    /// Mode filter and quarantine removed every candidate
    #[error("No eligible destination (all filtered or quarantined)")]
    NoEligible,

    /// Every eligible candidate was attempted and failed to connect
    #[error("No destination reachable (all connect attempts failed)")]
    NoDestinations,

    /// Lookup by host and port found no entry
    #[error("Destination {host}:{port} not found")]
    NotFound { host: String, port: u16 },
}

impl SelectionError {
    /// Selection errors are recovered locally by the session
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        true
    }
}

/// Backend connect errors
///
/// Each variant maps a class of OS-level connect failures; anything that is
/// not a timeout, a refusal, or an unreachable network falls into `Other`.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The per-attempt connect timeout expired
    #[error("Connecting to {addr} timed out after {timeout_ms}ms")]
    Timeout { addr: TcpAddress, timeout_ms: u64 },

    /// The backend actively refused the connection
    #[error("Connection to {addr} refused")]
    Refused { addr: TcpAddress },

    /// The host or network is unreachable
    #[error("Address {addr} unreachable")]
    Unreachable { addr: TcpAddress },

    /// Any other connect failure
    #[error("Connecting to {addr} failed: {reason}")]
    Other { addr: TcpAddress, reason: String },
}

impl ConnectError {
    /// Classify an I/O error from a connect attempt
    pub fn from_io(addr: TcpAddress, err: &io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::ECONNREFUSED) => Self::Refused { addr },
            Some(libc::EHOSTUNREACH) | Some(libc::ENETUNREACH) => Self::Unreachable { addr },
            Some(libc::ETIMEDOUT) => Self::Timeout {
                addr,
                timeout_ms: 0,
            },
            _ => {
                if err.kind() == io::ErrorKind::ConnectionRefused {
                    Self::Refused { addr }
                } else {
                    Self::Other {
                        addr,
                        reason: err.to_string(),
                    }
                }
            }
        }
    }
}

/// Wire protocol errors raised by the handshake inspector
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A read during handshake yielded fewer bytes than one packet header
    #[error("Short packet header: got {got} bytes, need {need}")]
    ShortHeader { got: usize, need: usize },

    /// Packet sequence number broke the expected chain
    #[error("Bad packet sequence number: expected {expected}, got {got}")]
    BadSeqno { expected: u8, got: u8 },

    /// The client handshake response was too short to carry a capability field
    #[error("Malformed capability field in handshake response")]
    MalformedCapability,

    /// Payload exceeds the session buffer and streaming is disabled
    #[error("Handshake payload of {len} bytes exceeds buffer of {max}")]
    OversizePayload { len: usize, max: usize },
}

/// Session lifecycle errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// No traffic in either direction for longer than the wait timeout
    #[error("Session idle timeout")]
    IdleTimeout,

    /// A peer closed before the handshake settled
    #[error("Peer closed during handshake")]
    PeerClosed,

    /// I/O error during handshake or relay
    #[error("Session I/O error: {0}")]
    Io(#[from] io::Error),

    /// The service-wide stop signal cancelled the session
    #[error("Session cancelled by shutdown")]
    Cancelled,
}

impl SessionError {
    /// Check if this error is recoverable for the service (it always is:
    /// a session error never takes down a bind)
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        true
    }
}

/// Metadata resolver errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolverError {
    /// No cache with this name has been initialised
    #[error("Metadata cache '{name}' not initialized")]
    NotInitialised { name: String },

    /// The cache knows nothing about this group
    #[error("Unknown replication group '{group}'")]
    UnknownGroup { group: String },
}

impl ResolverError {
    /// `UnknownGroup` may clear up on the next metadata refresh
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::UnknownGroup { .. })
    }
}

/// Type alias for Result with `DbRouterError`
pub type Result<T> = std::result::Result<T, DbRouterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_recovery_classification() {
        let config_err = ConfigError::ValidationError("test".into());
        assert!(!config_err.is_recoverable());

        let sel_err = SelectionError::NoDestinations;
        assert!(sel_err.is_recoverable());

        let router_err: DbRouterError = ConfigError::ValidationError("x".into()).into();
        assert!(!router_err.is_recoverable());

        let router_err: DbRouterError = SessionError::IdleTimeout.into();
        assert!(router_err.is_recoverable());
    }

    #[test]
    fn test_connect_error_classification() {
        let addr = TcpAddress::new("127.0.0.1", 3306).unwrap();

        let refused = io::Error::from_raw_os_error(libc::ECONNREFUSED);
        assert!(matches!(
            ConnectError::from_io(addr.clone(), &refused),
            ConnectError::Refused { .. }
        ));

        let unreachable = io::Error::from_raw_os_error(libc::EHOSTUNREACH);
        assert!(matches!(
            ConnectError::from_io(addr.clone(), &unreachable),
            ConnectError::Unreachable { .. }
        ));

        let other = io::Error::new(io::ErrorKind::Other, "weird");
        assert!(matches!(
            ConnectError::from_io(addr, &other),
            ConnectError::Other { .. }
        ));
    }

    #[test]
    fn test_error_display() {
        let addr = TcpAddress::new("10.0.0.1", 3306).unwrap();
        let err = ConnectError::Refused { addr };
        assert!(err.to_string().contains("10.0.0.1:3306"));

        let err = ProtocolError::BadSeqno {
            expected: 1,
            got: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected 1"));
        assert!(msg.contains("got 3"));
    }
}
