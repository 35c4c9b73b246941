//! # Memoized Computation Cache
//!
//! Dashboard scripts rerun from the top on every interaction. This module keeps
//! their expensive steps from running again when nothing they depend on changed.
//!
//! ## Components
//!
//! - **Key Deriver** ([`key`]): content digest of a function's arguments,
//!   namespaced by the function id
//! - **Cache Store** ([`store`]): key -> entry map with LRU eviction of values
//! - **Single-Flight Coordinator** ([`flight`]): one computation per key, no
//!   matter how many sessions ask at once
//! - **Disciplines** ([`memo`]): copy-on-read values and shared-identity resources
//! - **Invocation Context** ([`context`]): per-rerun span and hit/miss summary
//!
//! ## Disciplines
//!
//! | | VALUE | RESOURCE |
//! |---|---|---|
//! | caller gets | a clone | the same `Arc` |
//! | evicted under bounds | yes (LRU) | never |
//! | TTL | optional | never |
//! | code fingerprint change | dropped | kept |
//! | `clear` | dropped | dropped |
//!
//! ## Example
//!
//! ```rust,no_run
//! use rerun_cache::{CacheConfig, ClearTarget, Content, FunctionSpec, MemoCache};
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = CacheConfig::builder()
//!     .max_entries(500)
//!     .computation_timeout(Duration::from_secs(30))
//!     .build();
//! let cache = MemoCache::new(config)?;
//!
//! let total = cache.register_value(
//!     FunctionSpec::new("total").version("v1"),
//!     |rows: Content<Vec<f64>>| async move { Ok(rows.iter().sum::<f64>()) },
//! )?;
//!
//! let sum = total.call(Content(vec![1.0, 2.0, 3.5])).await?;
//! assert_eq!(sum, 6.5);
//!
//! cache.clear(ClearTarget::All)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod entry;
pub mod flight;
pub mod invalidation;
pub mod key;
pub mod memo;
pub mod store;
pub mod types;

pub use config::{CacheConfig, CacheConfigBuilder};
pub use context::{InvocationContext, RerunSummary};
pub use entry::{CacheEntry, CacheMetadata, Payload};
pub use flight::{Origin, SingleFlight};
pub use invalidation::{InvalidationEvent, InvalidationReason, InvalidationScope};
pub use key::{derive as derive_key, ArgValue, CacheArg, CacheArgs, CacheKey, Content, FunctionId};
pub use memo::{ClearTarget, FunctionSpec, MemoCache, ResourceFn, ValueFn};
pub use store::CacheStore;
pub use types::{CacheStats, Discipline, Fingerprint};
