//! Registration, call and management interfaces
//!
//! A [`MemoCache`] is shared by every session of one computation graph. Scripts
//! register their expensive functions once per rerun (re-registration with an
//! unchanged fingerprint is free) and call them through typed handles:
//!
//! - [`ValueFn`]: copy-on-read. Each call gets its own clone of the cached
//!   result, so mutating it never leaks into other callers.
//! - [`ResourceFn`]: shared identity. Every call gets the same `Arc`; the cache
//!   makes no isolation guarantee.
//!
//! ```rust,no_run
//! use rerun_cache::{CacheConfig, FunctionSpec, MemoCache};
//!
//! # async fn example() -> rerun_cache::Result<()> {
//! let cache = MemoCache::new(CacheConfig::default())?;
//! let double = cache.register_value(FunctionSpec::new("double"), |n: i64| async move {
//!     anyhow::ensure!(n != 0, "n must be non-zero");
//!     Ok(n * 2)
//! })?;
//!
//! assert_eq!(double.call(4).await?, 8);
//! # Ok(())
//! # }
//! ```

use crate::cache::{
    config::CacheConfig,
    entry::Payload,
    flight::{ComputeFuture, ComputeRequest, Origin, SingleFlight},
    invalidation::{InvalidationEvent, InvalidationReason, InvalidationScope},
    key::{derive, CacheArgs, FunctionId},
    store::CacheStore,
    types::{CacheStats, Discipline, Fingerprint},
};
use crate::error::{CacheError, Result};
use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Handler<A> = Arc<dyn Fn(A) -> ComputeFuture + Send + Sync>;

/// Declared identity of a cached function
#[derive(Debug, Clone)]
pub struct FunctionSpec {
    id: FunctionId,
    fingerprint: Fingerprint,
    ttl: Option<Duration>,
    timeout: Option<Duration>,
}

impl FunctionSpec {
    pub fn new(id: impl Into<FunctionId>) -> Self {
        Self {
            id: id.into(),
            fingerprint: Fingerprint::default(),
            ttl: None,
            timeout: None,
        }
    }

    /// Identity of the function's code. Changing it drops cached values.
    pub fn fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    /// Shorthand for `fingerprint(Fingerprint::new(version))`
    pub fn version(self, version: &str) -> Self {
        self.fingerprint(Fingerprint::new(version))
    }

    /// Expire cached values after `ttl` (value functions only)
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Fail a computation that runs longer than `timeout`
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn id(&self) -> &FunctionId {
        &self.id
    }
}

/// Target of a management `clear`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearTarget {
    /// Every entry of one function, resources included
    Function(FunctionId),
    /// Every entry, resources included
    All,
}

struct Registration {
    discipline: Discipline,
    fingerprint: Fingerprint,
    ttl: Option<Duration>,
    timeout: Option<Duration>,
    handler: Arc<dyn Any + Send + Sync>,
    signature: TypeId,
    signature_name: &'static str,
}

enum Registered {
    New,
    Unchanged,
    CodeChanged { from: Fingerprint },
}

/// Memoized computation cache shared by all sessions
#[derive(Clone)]
pub struct MemoCache {
    inner: Arc<MemoInner>,
}

struct MemoInner {
    config: CacheConfig,
    store: Arc<CacheStore>,
    flight: SingleFlight,
    registry: RwLock<HashMap<FunctionId, Registration>>,
}

impl MemoCache {
    /// Create a cache after validating `config`
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        info!(
            "Creating memo cache (max {} value entries, {} bytes)",
            config.max_entries, config.max_size_bytes
        );

        Ok(Self {
            inner: Arc::new(MemoInner {
                store: Arc::new(CacheStore::new(&config)),
                config,
                flight: SingleFlight::new(),
                registry: RwLock::new(HashMap::new()),
            }),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Register a copy-on-read function.
    ///
    /// The result type must be `Serialize` so its size can be estimated for
    /// the size bound.
    pub fn register_value<A, T, F, Fut>(&self, spec: FunctionSpec, func: F) -> Result<ValueFn<A, T>>
    where
        A: CacheArgs + Send + 'static,
        T: Clone + Serialize + Send + Sync + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let func = Arc::new(func);
        let handler: Handler<A> = Arc::new(move |args: A| {
            let func = Arc::clone(&func);
            async move {
                let value = func(args).await?;
                let size = estimate_size(&value);
                Ok::<_, anyhow::Error>((Arc::new(value) as Payload, size))
            }
            .boxed()
        });

        let id = spec.id.clone();
        self.register::<A, T>(spec, Discipline::Value, handler)?;
        Ok(ValueFn::bind(self.clone(), id))
    }

    /// Register a shared-identity function
    pub fn register_resource<A, T, F, Fut>(
        &self,
        spec: FunctionSpec,
        func: F,
    ) -> Result<ResourceFn<A, T>>
    where
        A: CacheArgs + Send + 'static,
        T: Send + Sync + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        if spec.ttl.is_some() {
            return Err(CacheError::config(format!(
                "resource function `{}` cannot declare a TTL; resources never expire",
                spec.id
            )));
        }

        let func = Arc::new(func);
        let handler: Handler<A> = Arc::new(move |args: A| {
            let func = Arc::clone(&func);
            async move {
                let resource = func(args).await?;
                Ok::<_, anyhow::Error>((Arc::new(resource) as Payload, 0))
            }
            .boxed()
        });

        let id = spec.id.clone();
        self.register::<A, T>(spec, Discipline::Resource, handler)?;
        Ok(ResourceFn::bind(self.clone(), id))
    }

    fn register<A, T>(&self, spec: FunctionSpec, discipline: Discipline, handler: Handler<A>) -> Result<()>
    where
        A: 'static,
        T: 'static,
    {
        let signature = TypeId::of::<(A, T)>();
        let signature_name = std::any::type_name::<fn(A) -> T>();
        let id = spec.id.clone();

        let registered = {
            let mut registry = self.inner.registry.write();

            let registered = match registry.get(&id) {
                Some(existing) if existing.discipline != discipline => {
                    return Err(CacheError::config(format!(
                        "`{}` is already registered as a {} function",
                        id, existing.discipline
                    )));
                }
                Some(existing) if existing.fingerprint == spec.fingerprint => {
                    if existing.signature != signature {
                        return Err(CacheError::config(format!(
                            "`{}` was re-registered as {} under unchanged fingerprint {}; it is registered as {}",
                            id, signature_name, spec.fingerprint, existing.signature_name
                        )));
                    }
                    Registered::Unchanged
                }
                Some(existing) => Registered::CodeChanged {
                    from: existing.fingerprint.clone(),
                },
                None => Registered::New,
            };

            if !matches!(registered, Registered::Unchanged) {
                let ttl = match discipline {
                    Discipline::Value => spec.ttl.or(self.inner.config.default_ttl),
                    Discipline::Resource => None,
                };
                registry.insert(
                    id.clone(),
                    Registration {
                        discipline,
                        fingerprint: spec.fingerprint.clone(),
                        ttl,
                        timeout: spec.timeout.or(self.inner.config.computation_timeout),
                        handler: Arc::new(handler),
                        signature,
                        signature_name,
                    },
                );
            }

            registered
        };

        match registered {
            Registered::New => debug!("Registered {} function `{}`", discipline, id),
            Registered::Unchanged => {}
            Registered::CodeChanged { from } => {
                info!(
                    "Code of `{}` changed ({} -> {})",
                    id, from, spec.fingerprint
                );
                if discipline.is_evictable() {
                    let scope = InvalidationScope::FunctionValues(id.clone());
                    let event = self.inner.flight.fence(&scope, || {
                        self.inner.store.invalidate(
                            &scope,
                            InvalidationReason::CodeChanged {
                                function: id.to_string(),
                            },
                        )
                    });
                    self.inner.store.record(event);
                }
            }
        }

        Ok(())
    }

    /// Typed handle to a value function registered under `id`
    pub fn value_fn<A, T>(&self, id: impl Into<FunctionId>) -> Result<ValueFn<A, T>>
    where
        A: CacheArgs + Send + 'static,
        T: Clone + Send + Sync + 'static,
    {
        let id = id.into();
        self.lookup::<A, T>(&id, Discipline::Value)?;
        Ok(ValueFn::bind(self.clone(), id))
    }

    /// Typed handle to a resource function registered under `id`
    pub fn resource_fn<A, T>(&self, id: impl Into<FunctionId>) -> Result<ResourceFn<A, T>>
    where
        A: CacheArgs + Send + 'static,
        T: Send + Sync + 'static,
    {
        let id = id.into();
        self.lookup::<A, T>(&id, Discipline::Resource)?;
        Ok(ResourceFn::bind(self.clone(), id))
    }

    fn lookup<A, T>(&self, id: &FunctionId, discipline: Discipline) -> Result<(ComputeRequest, Handler<A>)>
    where
        A: 'static,
        T: 'static,
    {
        let registry = self.inner.registry.read();
        let registration = registry
            .get(id)
            .ok_or_else(|| CacheError::UnknownFunction(id.to_string()))?;

        if registration.discipline != discipline {
            return Err(CacheError::config(format!(
                "`{}` is a {} function, not a {} function",
                id, registration.discipline, discipline
            )));
        }

        let handler = registration
            .handler
            .downcast_ref::<Handler<A>>()
            .filter(|_| registration.signature == TypeId::of::<(A, T)>())
            .cloned()
            .ok_or_else(|| {
                CacheError::config(format!(
                    "`{}` is registered as {}, not {}",
                    id,
                    registration.signature_name,
                    std::any::type_name::<fn(A) -> T>()
                ))
            })?;

        let request = ComputeRequest {
            function: id.clone(),
            discipline,
            fingerprint: registration.fingerprint.clone(),
            ttl: registration.ttl,
            timeout: registration.timeout,
        };

        Ok((request, handler))
    }

    /// Resolve one call: derive the key, then hit, join or compute
    async fn resolve<A>(&self, request: ComputeRequest, handler: Handler<A>, args: A) -> Result<(Payload, Origin)>
    where
        A: CacheArgs + Send + 'static,
    {
        let key = derive(&request.function, &args.to_args()?)?;
        let resolved = self
            .inner
            .flight
            .get_or_compute(&self.inner.store, key, request, move || handler(args))
            .await?;

        Ok((resolved.payload, resolved.origin))
    }

    /// Drop cached entries, resources included. Synchronous: the next call in
    /// any session recomputes.
    pub fn clear(&self, target: ClearTarget) -> Result<InvalidationEvent> {
        let (scope, context) = match target {
            ClearTarget::Function(id) => {
                if !self.inner.registry.read().contains_key(&id) {
                    return Err(CacheError::UnknownFunction(id.to_string()));
                }
                let context = format!("clear `{}`", id);
                (InvalidationScope::Function(id), context)
            }
            ClearTarget::All => (InvalidationScope::All, "clear all".to_string()),
        };

        let event = self
            .inner
            .flight
            .fence(&scope, || self.inner.store.invalidate(&scope, InvalidationReason::Manual))
            .with_context(context);
        self.inner.store.record(event.clone());
        Ok(event)
    }

    /// Remove expired value entries now
    pub fn cleanup_expired(&self) -> Option<InvalidationEvent> {
        let event = self.inner.store.cleanup_expired()?;
        self.inner.store.record(event.clone());
        Some(event)
    }

    /// Sweep expired entries every `cleanup_interval` until the cache is dropped
    pub fn start_auto_cleanup(&self) -> JoinHandle<()> {
        let interval = self.inner.config.cleanup_interval;
        let weak: Weak<MemoInner> = Arc::downgrade(&self.inner);

        info!("Starting automatic cache cleanup task (interval: {:?})", interval);

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                let Some(inner) = weak.upgrade() else {
                    debug!("Memo cache dropped, stopping cleanup task");
                    break;
                };
                let cache = MemoCache { inner };
                if let Some(event) = cache.cleanup_expired() {
                    debug!("Auto cleanup removed {} entries", event.count());
                }
            }
        })
    }

    /// Combined store and coordinator counters
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.inner.store.stats();
        let flight = self.inner.flight.stats();
        stats.coalesced = flight.coalesced;
        stats.computations = flight.computations;
        stats.failed_computations = flight.failed;
        stats
    }

    /// Number of computations currently running
    pub fn in_flight(&self) -> usize {
        self.inner.flight.in_flight()
    }

    /// Most recent invalidation events (clears, code changes, expiry and
    /// LRU evictions), oldest first. Empty unless `enable_metrics` is set.
    pub fn recent_events(&self) -> Vec<InvalidationEvent> {
        self.inner.store.recent_events()
    }

    /// Number of stored entries (both disciplines)
    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }
}

impl fmt::Debug for MemoCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoCache")
            .field("config", &self.inner.config)
            .field("entries", &self.inner.store.len())
            .field("functions", &self.inner.registry.read().len())
            .finish()
    }
}

/// Copy-on-read handle to a registered value function
pub struct ValueFn<A, T> {
    cache: MemoCache,
    id: FunctionId,
    _signature: PhantomData<fn(A) -> T>,
}

impl<A, T> ValueFn<A, T> {
    fn bind(cache: MemoCache, id: FunctionId) -> Self {
        Self {
            cache,
            id,
            _signature: PhantomData,
        }
    }

    pub fn id(&self) -> &FunctionId {
        &self.id
    }
}

impl<A, T> Clone for ValueFn<A, T> {
    fn clone(&self) -> Self {
        Self::bind(self.cache.clone(), self.id.clone())
    }
}

impl<A, T> ValueFn<A, T>
where
    A: CacheArgs + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Call the function, returning an independent copy of the cached result
    pub async fn call(&self, args: A) -> Result<T> {
        self.call_traced(args).await.map(|(value, _)| value)
    }

    /// Like [`call`](Self::call), also reporting how the call was satisfied
    pub async fn call_traced(&self, args: A) -> Result<(T, Origin)> {
        let (request, handler) = self.cache.lookup::<A, T>(&self.id, Discipline::Value)?;
        let (payload, origin) = self.cache.resolve(request, handler, args).await?;

        let value = payload.downcast_ref::<T>().cloned().ok_or_else(|| {
            CacheError::config(format!(
                "cached result of `{}` is not a {}",
                self.id,
                std::any::type_name::<T>()
            ))
        })?;
        Ok((value, origin))
    }
}

/// Shared-identity handle to a registered resource function
pub struct ResourceFn<A, T> {
    cache: MemoCache,
    id: FunctionId,
    _signature: PhantomData<fn(A) -> T>,
}

impl<A, T> ResourceFn<A, T> {
    fn bind(cache: MemoCache, id: FunctionId) -> Self {
        Self {
            cache,
            id,
            _signature: PhantomData,
        }
    }

    pub fn id(&self) -> &FunctionId {
        &self.id
    }
}

impl<A, T> Clone for ResourceFn<A, T> {
    fn clone(&self) -> Self {
        Self::bind(self.cache.clone(), self.id.clone())
    }
}

impl<A, T> ResourceFn<A, T>
where
    A: CacheArgs + Send + 'static,
    T: Send + Sync + 'static,
{
    /// Call the function, returning the shared live instance
    pub async fn call(&self, args: A) -> Result<Arc<T>> {
        self.call_traced(args).await.map(|(resource, _)| resource)
    }

    pub async fn call_traced(&self, args: A) -> Result<(Arc<T>, Origin)> {
        let (request, handler) = self.cache.lookup::<A, T>(&self.id, Discipline::Resource)?;
        let (payload, origin) = self.cache.resolve(request, handler, args).await?;

        let resource = payload.downcast::<T>().map_err(|_| {
            CacheError::config(format!(
                "cached resource of `{}` is not a {}",
                self.id,
                std::any::type_name::<T>()
            ))
        })?;
        Ok((resource, origin))
    }
}

/// `io::Write` sink that only counts bytes
struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Size estimate of a value: its serialized JSON length
fn estimate_size<T: Serialize>(value: &T) -> usize {
    let mut counter = ByteCounter(0);
    match serde_json::to_writer(&mut counter, value) {
        Ok(()) => counter.0.max(std::mem::size_of::<T>()),
        Err(e) => {
            warn!("Could not estimate size of {}: {}", std::any::type_name::<T>(), e);
            std::mem::size_of::<T>()
        }
    }
}
