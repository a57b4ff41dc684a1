//! Loader configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Maps an intercepted custom scheme to the scheme used on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemeMapping {
    /// Scheme the player sees, e.g. `kino`
    pub custom: String,
    /// Scheme used for the actual fetch, `http` or `https`
    pub upstream: String,
}

impl SchemeMapping {
    pub fn new(custom: impl Into<String>, upstream: impl Into<String>) -> Self {
        Self {
            custom: custom.into(),
            upstream: upstream.into(),
        }
    }
}

/// Loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Schemes routed through the loader
    pub schemes: Vec<SchemeMapping>,
    /// Asset cache budget in bytes (0 = unbounded)
    pub max_cache_bytes: u64,
    /// Request timeout in milliseconds (0 = none)
    pub request_timeout_ms: u64,
    /// Connect timeout in milliseconds (0 = none)
    pub connect_timeout_ms: u64,
    /// User-Agent sent with every fetch
    pub user_agent: String,
    /// Headers sent with every fetch
    pub default_headers: BTreeMap<String, String>,
    /// Start with a range GET when the first request has a non-zero offset
    pub range_requests: bool,
    /// Capacity of the loader event channel
    pub event_capacity: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            schemes: vec![
                SchemeMapping::new("kino", "https"),
                SchemeMapping::new("kino-http", "http"),
            ],
            max_cache_bytes: 256 * 1024 * 1024, // 256 MB
            request_timeout_ms: 0,
            connect_timeout_ms: 10_000,
            user_agent: format!("kino-loader/{}", crate::VERSION),
            default_headers: BTreeMap::new(),
            range_requests: false,
            event_capacity: 256,
        }
    }
}

impl LoaderConfig {
    /// Parse a JSON configuration; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: LoaderConfig =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Replace the scheme table with a single mapping
    pub fn with_scheme(mut self, custom: impl Into<String>, upstream: impl Into<String>) -> Self {
        self.schemes = vec![SchemeMapping::new(custom, upstream)];
        self
    }

    /// Set the cache budget
    pub fn with_max_cache_bytes(mut self, bytes: u64) -> Self {
        self.max_cache_bytes = bytes;
        self
    }

    /// Check the configuration for values the loader cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.schemes.is_empty() {
            return Err(Error::InvalidConfig("no intercepted schemes configured".into()));
        }
        for mapping in &self.schemes {
            let custom = mapping.custom.to_ascii_lowercase();
            if custom.is_empty()
                || !custom
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
            {
                return Err(Error::InvalidConfig(format!(
                    "invalid custom scheme '{}'",
                    mapping.custom
                )));
            }
            if custom == "http" || custom == "https" {
                return Err(Error::InvalidConfig(format!(
                    "scheme '{}' is handled by the platform and cannot be intercepted",
                    mapping.custom
                )));
            }
            if !matches!(mapping.upstream.as_str(), "http" | "https") {
                return Err(Error::InvalidConfig(format!(
                    "upstream scheme for '{}' must be http or https, got '{}'",
                    mapping.custom, mapping.upstream
                )));
            }
        }
        if self.event_capacity == 0 {
            return Err(Error::InvalidConfig("event_capacity must be positive".into()));
        }
        Ok(())
    }
}
