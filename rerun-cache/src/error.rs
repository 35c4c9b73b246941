//! Error types for the memo cache
//!
//! Every error is `Clone`: a single computation outcome is handed to each
//! caller that was waiting on the same key, so the failure has to be shareable.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The error raised by a wrapped function, shared between all waiters.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for cache operations
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The wrapped function failed. The original error is kept as the source
    /// and its message is reproduced verbatim.
    #[error("computation of `{function}` failed: {source}")]
    ComputationError {
        function: String,
        #[source]
        source: SharedError,
    },

    /// An argument or registration that cannot be used for caching
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// A computation asked for its own in-flight key
    #[error("reentrant call to `{function}` for key {key} which is already being computed on this call chain")]
    ReentrancyError { function: String, key: String },

    /// A computation exceeded its deadline
    #[error("computation of `{function}` timed out after {timeout:?}")]
    TimeoutError { function: String, timeout: Duration },

    /// Call-by-id for a function that was never registered
    #[error("function `{0}` is not registered")]
    UnknownFunction(String),
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    /// Wrap an error returned by a wrapped function.
    pub fn computation(function: impl Into<String>, error: anyhow::Error) -> Self {
        let boxed: Box<dyn std::error::Error + Send + Sync + 'static> = error.into();
        CacheError::ComputationError {
            function: function.into(),
            source: Arc::from(boxed),
        }
    }

    /// Convenience constructor for configuration errors
    pub fn config(message: impl Into<String>) -> Self {
        CacheError::ConfigurationError(message.into())
    }

    /// Whether the error came out of the wrapped function itself
    pub fn is_computation(&self) -> bool {
        matches!(self, CacheError::ComputationError { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CacheError::TimeoutError { .. })
    }
}
