//! # rerun-cache
//!
//! A memoized computation cache for scripts that re-execute top to bottom on
//! every user interaction.
//!
//! ## Features
//!
//! - Content-addressed keys: equal arguments hit, regardless of object identity
//! - Two disciplines: copy-on-read values and shared live resources
//! - Single-flight: concurrent sessions asking for the same key share one
//!   computation, and a dropped waiter never aborts it
//! - Failures are delivered to every waiter and never cached
//! - Code fingerprints: editing a function invalidates its cached values
//! - LRU bounds on count and size, optional TTL, background expiry sweep
//! - Reentrancy detection instead of deadlock
//!
//! A tokio runtime is required: computations run on spawned tasks.
//!
//! ## Quick Start
//!
//! ```no_run
//! use rerun_cache::{CacheConfig, FunctionSpec, MemoCache};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = MemoCache::new(CacheConfig::from_env()?)?;
//!
//!     let double = cache.register_value(FunctionSpec::new("double"), |n: i64| async move {
//!         tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!         Ok(n * 2)
//!     })?;
//!
//!     // Both calls share one computation
//!     let (a, b) = tokio::join!(double.call(4), double.call(4));
//!     assert_eq!((a?, b?), (8, 8));
//!
//!     println!("{}", cache.stats());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;

// Re-export main types for convenience
pub use cache::{
    derive_key, ArgValue, CacheArg, CacheArgs, CacheConfig, CacheConfigBuilder, CacheEntry,
    CacheKey, CacheMetadata, CacheStats, CacheStore, ClearTarget, Content, Discipline,
    Fingerprint, FunctionId, FunctionSpec, InvalidationEvent, InvalidationReason,
    InvalidationScope, InvocationContext, MemoCache, Origin, Payload, RerunSummary, ResourceFn,
    SingleFlight, ValueFn,
};
pub use error::{CacheError, Result};
