//! Destination address model
//!
//! A destination is stored as host plus TCP port, where the host may be a
//! hostname, an IPv4 literal, or an IPv6 literal. Validity is checked on
//! construction; an invalid address is a hard configuration error.

mod uri;

pub use uri::{DestinationUri, METADATA_CACHE_SCHEME};

use std::fmt;
use std::net::Ipv6Addr;

use crate::error::ConfigError;

/// Default port for the classic protocol
pub const CLASSIC_DEFAULT_PORT: u16 = 3306;

/// Default port for the X protocol
pub const X_DEFAULT_PORT: u16 = 33060;

/// A validated host:port pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TcpAddress {
    host: String,
    port: u16,
}

impl TcpAddress {
    /// Create a new address, validating host and port.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidAddress` if the host is empty, contains
    /// characters that cannot appear in a hostname or IP literal, or if the
    /// port is 0.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, ConfigError> {
        let host = host.into();

        if host.is_empty() {
            return Err(ConfigError::invalid_address(&host, "empty host"));
        }
        if port == 0 {
            return Err(ConfigError::invalid_address(
                format!("{host}:0"),
                "port must be in 1..65535",
            ));
        }

        if host.contains(':') {
            // Only an IPv6 literal may contain colons
            host.parse::<Ipv6Addr>().map_err(|_| {
                ConfigError::invalid_address(&host, "not a valid IPv6 literal")
            })?;
        } else if !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_')
        {
            return Err(ConfigError::invalid_address(
                &host,
                "invalid character in hostname",
            ));
        }

        Ok(Self { host, port })
    }

    /// Parse a single `host[:port]` token, applying `default_port` when the
    /// port is omitted.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidAddress` on malformed input.
    pub fn parse_with_default(token: &str, default_port: u16) -> Result<Self, ConfigError> {
        let (host, port) = split_addr_port(token)?;
        Self::new(host, port.unwrap_or(default_port))
    }

    /// The host part (name or IP literal, without brackets)
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The TCP port
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Whether the host is an IPv6 literal
    #[must_use]
    pub fn is_ipv6(&self) -> bool {
        self.host.contains(':')
    }
}

impl fmt::Display for TcpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ipv6() {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Split one token from a comma-separated destination list into host and
/// optional port.
///
/// Accepted forms: `host`, `host:port`, `[v6addr]`, `[v6addr]:port`.
///
/// # Errors
///
/// Returns `ConfigError::InvalidAddress` on empty input, an unterminated
/// bracket, or a port outside 1..65535.
pub fn split_addr_port(token: &str) -> Result<(String, Option<u16>), ConfigError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(ConfigError::invalid_address(token, "empty address"));
    }

    if let Some(rest) = token.strip_prefix('[') {
        // Bracketed IPv6 literal
        let close = rest
            .find(']')
            .ok_or_else(|| ConfigError::invalid_address(token, "missing ']'"))?;
        let host = &rest[..close];
        let tail = &rest[close + 1..];
        let port = match tail.strip_prefix(':') {
            Some(p) => Some(parse_port(token, p)?),
            None if tail.is_empty() => None,
            None => {
                return Err(ConfigError::invalid_address(
                    token,
                    "unexpected characters after ']'",
                ))
            }
        };
        return Ok((host.to_string(), port));
    }

    match token.rfind(':') {
        // More than one colon without brackets means a bare IPv6 literal
        Some(_) if token.matches(':').count() > 1 => Ok((token.to_string(), None)),
        Some(idx) => {
            let port = parse_port(token, &token[idx + 1..])?;
            Ok((token[..idx].to_string(), Some(port)))
        }
        None => Ok((token.to_string(), None)),
    }
}

fn parse_port(token: &str, text: &str) -> Result<u16, ConfigError> {
    let port: u16 = text
        .parse()
        .map_err(|_| ConfigError::invalid_address(token, format!("invalid port '{text}'")))?;
    if port == 0 {
        return Err(ConfigError::invalid_address(
            token,
            "port must be in 1..65535",
        ));
    }
    Ok(port)
}
