//! Configuration for the cache system

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Environment variable for [`CacheConfig::max_entries`]
pub const ENV_MAX_ENTRIES: &str = "RERUN_CACHE_MAX_ENTRIES";
/// Environment variable for [`CacheConfig::max_size_bytes`]
pub const ENV_MAX_SIZE_BYTES: &str = "RERUN_CACHE_MAX_SIZE_BYTES";
/// Environment variable for [`CacheConfig::default_ttl`], in seconds
pub const ENV_DEFAULT_TTL_SECS: &str = "RERUN_CACHE_DEFAULT_TTL_SECS";
/// Environment variable for [`CacheConfig::computation_timeout`], in seconds
pub const ENV_TIMEOUT_SECS: &str = "RERUN_CACHE_TIMEOUT_SECS";

/// Configuration for the memo cache
///
/// The entry and size bounds apply to value entries only. Resource entries are
/// few, expensive to recreate, and never evicted by size pressure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of value entries kept at once
    pub max_entries: usize,

    /// Maximum aggregate size estimate of value entries in bytes
    pub max_size_bytes: usize,

    /// Time-to-live for value entries of functions that declare none
    pub default_ttl: Option<Duration>,

    /// Deadline for a single computation; exceeding it fails every waiter
    pub computation_timeout: Option<Duration>,

    /// Interval for the background expiry sweep
    pub cleanup_interval: Duration,

    /// Keep a history of invalidation events for `recent_events`
    pub enable_metrics: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            // 256 MB
            max_size_bytes: 256 * 1024 * 1024,
            default_ttl: None,
            computation_timeout: None,
            cleanup_interval: Duration::from_secs(60),
            enable_metrics: true,
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(CacheError::config("max_entries must be greater than 0"));
        }

        if self.max_size_bytes == 0 {
            return Err(CacheError::config("max_size_bytes must be greater than 0"));
        }

        if self.default_ttl == Some(Duration::ZERO) {
            return Err(CacheError::config("default_ttl must be greater than 0"));
        }

        if self.computation_timeout == Some(Duration::ZERO) {
            return Err(CacheError::config(
                "computation_timeout must be greater than 0",
            ));
        }

        if self.cleanup_interval.is_zero() {
            return Err(CacheError::config("cleanup_interval must be greater than 0"));
        }

        Ok(())
    }

    /// Load configuration from the environment (and a `.env` file if present),
    /// starting from the defaults.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::default().merge_env(|name| std::env::var(name).ok())
    }

    /// Override fields from a variable lookup
    pub fn merge_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_MAX_ENTRIES) {
            self.max_entries = parse_var(ENV_MAX_ENTRIES, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_SIZE_BYTES) {
            self.max_size_bytes = parse_var(ENV_MAX_SIZE_BYTES, &v)?;
        }
        if let Some(v) = lookup(ENV_DEFAULT_TTL_SECS) {
            self.default_ttl = Some(Duration::from_secs(parse_var(ENV_DEFAULT_TTL_SECS, &v)?));
        }
        if let Some(v) = lookup(ENV_TIMEOUT_SECS) {
            self.computation_timeout = Some(Duration::from_secs(parse_var(ENV_TIMEOUT_SECS, &v)?));
        }

        debug!("Cache configuration after environment overrides: {:?}", self);
        self.validate()?;
        Ok(self)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| CacheError::config(format!("invalid {}={:?}: {}", name, value, e)))
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    max_entries: Option<usize>,
    max_size_bytes: Option<usize>,
    default_ttl: Option<Duration>,
    computation_timeout: Option<Duration>,
    cleanup_interval: Option<Duration>,
    enable_metrics: Option<bool>,
}

impl CacheConfigBuilder {
    /// Set maximum number of value entries
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Set maximum cache size in bytes
    pub fn max_size_bytes(mut self, size: usize) -> Self {
        self.max_size_bytes = Some(size);
        self
    }

    /// Set the TTL applied to value functions that declare none
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set the per-computation deadline
    pub fn computation_timeout(mut self, timeout: Duration) -> Self {
        self.computation_timeout = Some(timeout);
        self
    }

    /// Set cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Enable or disable metrics collection
    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = Some(enable);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            max_entries: self.max_entries.unwrap_or(defaults.max_entries),
            max_size_bytes: self.max_size_bytes.unwrap_or(defaults.max_size_bytes),
            default_ttl: self.default_ttl.or(defaults.default_ttl),
            computation_timeout: self.computation_timeout.or(defaults.computation_timeout),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
            enable_metrics: self.enable_metrics.unwrap_or(defaults.enable_metrics),
        }
    }
}

/// Preset configurations
impl CacheConfig {
    /// Configuration for memory-constrained hosts
    pub fn small() -> Self {
        Self {
            max_entries: 100,
            max_size_bytes: 16 * 1024 * 1024, // 16 MB
            ..Default::default()
        }
    }

    /// No practical bound on value entries
    pub fn unbounded() -> Self {
        Self {
            max_entries: usize::MAX,
            max_size_bytes: usize::MAX,
            ..Default::default()
        }
    }
}
