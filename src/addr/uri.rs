//! Destination URI parsing
//!
//! A destinations option is either a comma-separated address list or a URI
//! of the form `scheme://authority[/path][?query]`. The only scheme this
//! router understands is the metadata-cache scheme, whose first path
//! segment must be `group`.

use std::collections::HashMap;

use crate::error::ConfigError;

/// URI scheme of the metadata-backed resolver
pub const METADATA_CACHE_SCHEME: &str = "metadata+cache";

/// A parsed destination URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationUri {
    /// Lowercased scheme
    pub scheme: String,
    /// Authority (typically the metadata cache name)
    pub authority: String,
    /// Path segments, empty segments removed
    pub path: Vec<String>,
    /// Query parameters
    pub query: HashMap<String, String>,
}

impl DestinationUri {
    /// Check whether a destinations value looks like a URI rather than an
    /// address list.
    #[must_use]
    pub fn looks_like_uri(value: &str) -> bool {
        value.contains("://")
    }

    /// Parse `scheme://authority[/path][?query]`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidUri` when the shape is wrong and
    /// `ConfigError::UnknownScheme` is left to the caller, which knows
    /// which schemes it accepts.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let (scheme, rest) = value
            .split_once("://")
            .ok_or_else(|| ConfigError::invalid_uri(value, "missing '://'"))?;

        if scheme.is_empty() {
            return Err(ConfigError::invalid_uri(value, "empty scheme"));
        }

        let (location, query_str) = match rest.split_once('?') {
            Some((l, q)) => (l, Some(q)),
            None => (rest, None),
        };

        let (authority, path_str) = match location.split_once('/') {
            Some((a, p)) => (a, p),
            None => (location, ""),
        };

        if authority.is_empty() {
            return Err(ConfigError::invalid_uri(value, "empty authority"));
        }

        let path: Vec<String> = path_str
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let mut query = HashMap::new();
        if let Some(q) = query_str {
            for pair in q.split('&').filter(|s| !s.is_empty()) {
                match pair.split_once('=') {
                    Some((k, v)) => query.insert(k.to_string(), v.to_string()),
                    None => query.insert(pair.to_string(), String::new()),
                };
            }
        }

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            authority: authority.to_string(),
            path,
            query,
        })
    }

    /// Validate this URI as a metadata-cache destination and extract the
    /// cache name and replication group.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownScheme` for any scheme other than
    /// [`METADATA_CACHE_SCHEME`], and `ConfigError::InvalidUri` when the
    /// first path segment is not `group` or the group id is missing.
    pub fn metadata_group(&self) -> Result<(String, String), ConfigError> {
        if self.scheme != METADATA_CACHE_SCHEME {
            return Err(ConfigError::UnknownScheme {
                scheme: self.scheme.clone(),
            });
        }

        let command = self
            .path
            .first()
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_default();
        if command != "group" {
            return Err(ConfigError::invalid_uri(
                format!("{}://{}", self.scheme, self.authority),
                format!("invalid metadata command '{command}'; only 'group' is supported"),
            ));
        }

        let group = self.path.get(1).cloned().ok_or_else(|| {
            ConfigError::invalid_uri(
                format!("{}://{}", self.scheme, self.authority),
                "missing group id after 'group'",
            )
        })?;

        Ok((self.authority.clone(), group))
    }
}
