//! Invalidation scopes, reasons and events
//!
//! Entries leave the store for one of four reasons:
//! - Manual: an operator cleared a key, a function, or everything
//! - Code change: a value function was re-registered with a new fingerprint
//! - Expiry: a value entry outlived its TTL
//! - LRU eviction: the value bound was exceeded

use crate::cache::key::{CacheKey, FunctionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What to invalidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationScope {
    /// A single key
    Key(CacheKey),

    /// Every entry of one function, resources included
    Function(FunctionId),

    /// Only the value entries of one function
    FunctionValues(FunctionId),

    /// Everything, resources included
    All,
}

impl InvalidationScope {
    /// Whether an entry with `key` falls in this scope (discipline aside)
    pub fn covers(&self, key: &CacheKey) -> bool {
        match self {
            InvalidationScope::Key(k) => k == key,
            InvalidationScope::Function(id) | InvalidationScope::FunctionValues(id) => {
                key.function() == id
            }
            InvalidationScope::All => true,
        }
    }
}

/// Reason for cache invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Explicit request through the management interface
    Manual,

    /// The function's code fingerprint changed
    CodeChanged { function: String },

    /// Entry expired based on TTL
    Expired,

    /// Evicted by LRU policy under the count or size bound
    LeastRecentlyUsed,
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::Manual => write!(f, "manual invalidation"),
            InvalidationReason::CodeChanged { function } => {
                write!(f, "code of `{}` changed", function)
            }
            InvalidationReason::Expired => write!(f, "TTL expired"),
            InvalidationReason::LeastRecentlyUsed => write!(f, "LRU eviction"),
        }
    }
}

/// Record of one invalidation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Reason for invalidation
    pub reason: InvalidationReason,

    /// When the invalidation occurred
    pub timestamp: DateTime<Utc>,

    /// Keys that were invalidated, as displayed by `CacheKey`
    pub keys: Vec<String>,

    /// Additional context
    pub context: Option<String>,
}

impl InvalidationEvent {
    /// Create a new invalidation event
    pub fn new(reason: InvalidationReason, keys: Vec<String>) -> Self {
        Self {
            reason,
            timestamp: Utc::now(),
            keys,
            context: None,
        }
    }

    /// Add context to the event
    pub fn with_context(mut self, context: String) -> Self {
        self.context = Some(context);
        self
    }

    pub fn count(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
