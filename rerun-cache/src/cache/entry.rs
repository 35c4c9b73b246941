//! Cache entry management

use crate::cache::key::CacheKey;
use crate::cache::types::{Discipline, Fingerprint};
use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Type-erased result of a computation.
///
/// For value entries this is the master copy that callers clone from; for
/// resource entries it is the live instance handed to every caller.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// A stored computation result with its bookkeeping
#[derive(Clone)]
pub struct CacheEntry {
    /// The cache key
    pub key: CacheKey,

    /// The cached result
    pub payload: Payload,

    /// Copy-vs-share contract of this entry
    pub discipline: Discipline,

    /// Code fingerprint the result was computed under
    pub fingerprint: Fingerprint,

    /// Entry metadata
    pub metadata: CacheMetadata,
}

impl CacheEntry {
    pub fn new(
        key: CacheKey,
        payload: Payload,
        discipline: Discipline,
        fingerprint: Fingerprint,
        size_estimate: usize,
    ) -> Self {
        let now = Utc::now();

        Self {
            key,
            payload,
            discipline,
            fingerprint,
            metadata: CacheMetadata {
                created_at: now,
                last_used_at: now,
                expires_at: None,
                hit_count: 0,
                size_estimate,
            },
        }
    }

    /// Expire the entry after `ttl`. Ignored for resources, which never expire.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        if self.discipline == Discipline::Value {
            let created_at = self.metadata.created_at;
            // An out-of-range TTL means the entry never expires
            self.metadata.expires_at = ttl
                .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
                .and_then(|ttl| created_at.checked_add_signed(ttl));
        }
        self
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        self.metadata
            .expires_at
            .map_or(false, |expires_at| Utc::now() > expires_at)
    }

    /// Whether the entry may be served to a caller expecting `fingerprint`.
    ///
    /// Resources survive code changes; values do not.
    pub fn is_current(&self, fingerprint: &Fingerprint) -> bool {
        match self.discipline {
            Discipline::Value => &self.fingerprint == fingerprint,
            Discipline::Resource => true,
        }
    }

    /// Mark the entry as accessed (updates access time and count)
    pub fn mark_accessed(&mut self) {
        self.metadata.last_used_at = Utc::now();
        self.metadata.hit_count += 1;
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("discipline", &self.discipline)
            .field("fingerprint", &self.fingerprint)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Metadata associated with a cache entry
#[derive(Debug, Clone)]
pub struct CacheMetadata {
    /// When the entry was created
    pub created_at: DateTime<Utc>,

    /// Last access time (for LRU tracking)
    pub last_used_at: DateTime<Utc>,

    /// When the entry expires, if it has a TTL
    pub expires_at: Option<DateTime<Utc>>,

    /// Number of times this entry has been served
    pub hit_count: u64,

    /// Estimated size of the payload in bytes
    pub size_estimate: usize,
}
