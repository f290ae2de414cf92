//! Configuration loading for `restashd`.
//!
//! Configuration is a single TOML file. Every table and key is optional:
//!
//! ```toml
//! [server]
//! address = "0.0.0.0:8080"
//!
//! [upstream]
//! base_url = "http://127.0.0.1:8000"
//! timeout_secs = 30
//!
//! [cache]
//! group = "rest_api"
//! cacheable_statuses = [200]
//! cacheable_methods = ["GET"]
//! skip = false
//! bypass_private = true
//! sort_query_params = true
//! single_flight = true
//!
//! [cache.timeout]
//! length = 1
//! period = 604800   # one week
//!
//! [admin]
//! enabled = true
//! prefix = "/_cache"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::cache::CacheConfig;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 127.0.0.1:8080).
    #[serde(default = "default_address")]
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
        }
    }
}

fn default_address() -> String {
    "127.0.0.1:8080".to_string()
}

/// The origin whose responses are cached.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL requests are forwarded to (default: http://127.0.0.1:8000).
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Admin endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_enabled")]
    pub enabled: bool,
    /// Path prefix for the admin routes (default: /_cache).
    #[serde(default = "default_admin_prefix")]
    pub prefix: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: default_admin_enabled(),
            prefix: default_admin_prefix(),
        }
    }
}

fn default_admin_enabled() -> bool {
    true
}

fn default_admin_prefix() -> String {
    "/_cache".to_string()
}

impl Config {
    /// Loads configuration from `path`, or the built-in defaults without one.
    ///
    /// The result is not validated, so command-line overrides can still be
    /// applied; call [`validate`](Self::validate) before use.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&content)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parses configuration from TOML text without validating it.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Checks values serde cannot: URLs, status ranges, the TTL policy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = Url::parse(&self.upstream.base_url).map_err(|e| {
            ConfigError::Invalid(format!("upstream.base_url {:?}: {e}", self.upstream.base_url))
        })?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "upstream.base_url {:?} must be an http(s) URL",
                self.upstream.base_url
            )));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "upstream.timeout_secs must be positive".to_string(),
            ));
        }

        if let Some(status) = self
            .cache
            .cacheable_statuses
            .iter()
            .find(|s| !(100..=999).contains(*s))
        {
            return Err(ConfigError::Invalid(format!(
                "cache.cacheable_statuses: {status} is not an HTTP status"
            )));
        }
        self.cache
            .timeout
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("cache.timeout: {e}")))?;

        if self.admin.enabled && !self.admin.prefix.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "admin.prefix {:?} must start with '/'",
                self.admin.prefix
            )));
        }
        Ok(())
    }
}
