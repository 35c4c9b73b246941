//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Copy semantics of a cached function and of every entry it produces.
///
/// `Value` is a cache of data: each caller receives its own deep copy and may
/// mutate it freely. `Resource` is a cache of identity: every caller receives
/// the same live instance and the cache makes no mutation-isolation promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Discipline {
    /// Copy-on-read data, eligible for eviction and code-change invalidation
    Value,

    /// Shared live instance, only removed by explicit invalidation
    Resource,
}

impl Discipline {
    /// Whether entries of this discipline take part in size/count eviction
    pub fn is_evictable(&self) -> bool {
        matches!(self, Discipline::Value)
    }
}

impl fmt::Display for Discipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discipline::Value => write!(f, "value"),
            Discipline::Resource => write!(f, "resource"),
        }
    }
}

/// Declared identity of a function's code.
///
/// When a `Value` function is re-registered with a different fingerprint its
/// cached results are dropped, since they were produced by different logic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(Arc<str>);

impl Fingerprint {
    /// Use an explicit version tag, e.g. `"v2"`
    pub fn new(version: impl AsRef<str>) -> Self {
        Self(Arc::from(version.as_ref()))
    }

    /// Derive a fingerprint from the source text of the function
    pub fn of_source(source: &str) -> Self {
        let digest = Sha256::digest(source.as_bytes());
        Self(Arc::from(hex::encode(&digest[..8])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Fingerprint {
    fn default() -> Self {
        Self::new("0")
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Statistics and metrics for cache performance monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CacheStats {
    /// Lookups answered from the store
    pub hits: u64,

    /// Lookups that found nothing usable in the store
    pub misses: u64,

    /// Callers that joined a computation already in flight
    pub coalesced: u64,

    /// Computations started
    pub computations: u64,

    /// Computations that ended in an error or timeout
    pub failed_computations: u64,

    /// Number of value entries currently in cache
    pub value_entries: usize,

    /// Number of resource entries currently in cache
    pub resource_entries: usize,

    /// Estimated size of value entries in bytes
    pub size_bytes: usize,

    /// Number of evictions due to count or size limits
    pub evictions_size: u64,

    /// Number of evictions due to TTL expiration
    pub evictions_ttl: u64,

    /// Number of entries removed by invalidation (manual or code change)
    pub invalidations: u64,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Total entries of both disciplines
    pub fn entries(&self) -> usize {
        self.value_entries + self.resource_entries
    }

    pub fn total_evictions(&self) -> u64 {
        self.evictions_size + self.evictions_ttl
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, coalesced: {}, computations: {} ({} failed), entries: {} value / {} resource, size: {} bytes, evictions: {} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.coalesced,
            self.computations,
            self.failed_computations,
            self.value_entries,
            self.resource_entries,
            self.size_bytes,
            self.total_evictions()
        )
    }
}
