//! Single-flight computation coordinator
//!
//! The first caller to miss on a key opens a slot and starts the computation;
//! every caller that arrives while the slot is open waits on it instead of
//! starting a second computation. The computation runs on its own task, so a
//! waiter that is dropped (its session torn down) never aborts it.
//!
//! Slot lifecycle:
//! 1. Miss under the slots lock: open a slot, spawn the computation
//! 2. Computation finishes: under the slots lock, if its slot is still the
//!    current one for the key, install a success into the store and close it
//! 3. Publish the outcome to every waiter
//!
//! Lock order is always slots, then store. A clear detaches the slots it
//! covers under the slots lock: their computations still answer the callers
//! already waiting, but never install, and the next caller starts afresh.

use crate::cache::{
    entry::{CacheEntry, Payload},
    invalidation::InvalidationScope,
    key::{CacheKey, FunctionId},
    store::CacheStore,
    types::{Discipline, Fingerprint},
};
use crate::error::{CacheError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, debug_span, warn, Instrument};

/// A computation: the produced payload and its size estimate in bytes
pub type ComputeFuture = BoxFuture<'static, anyhow::Result<(Payload, usize)>>;

type Outcome = std::result::Result<Payload, CacheError>;

tokio::task_local! {
    /// Keys being computed on the current logical call chain
    static CALL_CHAIN: Arc<HashSet<CacheKey>>;
}

/// How a call was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Served from the store
    Hit,
    /// This caller started the computation
    Computed,
    /// Joined a computation started by another caller
    Coalesced,
}

/// A payload together with how it was obtained
#[derive(Clone)]
pub struct Resolved {
    pub payload: Payload,
    pub origin: Origin,
}

/// Everything the coordinator needs to know about the function being called
#[derive(Debug, Clone)]
pub struct ComputeRequest {
    pub function: FunctionId,
    pub discipline: Discipline,
    pub fingerprint: Fingerprint,
    pub ttl: Option<Duration>,
    pub timeout: Option<Duration>,
}

struct Slot {
    fingerprint: Fingerprint,
    generation: u64,
    receiver: watch::Receiver<Option<Outcome>>,
}

/// Counters kept by the coordinator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlightStats {
    pub in_flight: usize,
    pub computations: u64,
    pub coalesced: u64,
    pub failed: u64,
}

/// Deduplicates concurrent computations of the same key
#[derive(Clone, Default)]
pub struct SingleFlight {
    shared: Arc<FlightShared>,
}

#[derive(Default)]
struct FlightShared {
    slots: Mutex<HashMap<CacheKey, Slot>>,
    generation: AtomicU64,
    computations: AtomicU64,
    coalesced: AtomicU64,
    failed: AtomicU64,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the stored result for `key`, or compute it exactly once no
    /// matter how many callers ask concurrently.
    ///
    /// Errors are delivered to every caller waiting at the time and are never
    /// stored: the next call after a failure computes again.
    pub async fn get_or_compute<F>(
        &self,
        store: &Arc<CacheStore>,
        key: CacheKey,
        request: ComputeRequest,
        compute: F,
    ) -> Result<Resolved>
    where
        F: FnOnce() -> ComputeFuture + Send + 'static,
    {
        let chain = CALL_CHAIN.try_with(Arc::clone).ok();
        if chain.as_ref().map_or(false, |chain| chain.contains(&key)) {
            warn!("Reentrant request for {} on its own call chain", key);
            return Err(CacheError::ReentrancyError {
                function: request.function.to_string(),
                key: key.to_string(),
            });
        }

        let (mut receiver, origin) = {
            let mut slots = self.shared.slots.lock();

            if let Some(entry) = store.get(&key, &request.fingerprint) {
                return Ok(Resolved {
                    payload: entry.payload,
                    origin: Origin::Hit,
                });
            }

            let joinable = slots.get(&key).filter(|slot| {
                request.discipline == Discipline::Resource
                    || slot.fingerprint == request.fingerprint
            });

            match joinable {
                Some(slot) => {
                    self.shared.coalesced.fetch_add(1, Ordering::Relaxed);
                    debug!("Waiting on in-flight computation: {}", key);
                    (slot.receiver.clone(), Origin::Coalesced)
                }
                None => {
                    let receiver =
                        self.launch(&mut slots, store, key.clone(), request, chain, compute);
                    (receiver, Origin::Computed)
                }
            }
        };

        let outcome = match receiver.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };

        match outcome {
            Some(Ok(payload)) => Ok(Resolved { payload, origin }),
            Some(Err(error)) => Err(error),
            None => Err(CacheError::computation(
                key.function().as_str(),
                anyhow::anyhow!("computation for {} was abandoned before completing", key),
            )),
        }
    }

    /// Open a slot for `key` and spawn its computation. Called with the slots
    /// lock held.
    fn launch<F>(
        &self,
        slots: &mut HashMap<CacheKey, Slot>,
        store: &Arc<CacheStore>,
        key: CacheKey,
        request: ComputeRequest,
        chain: Option<Arc<HashSet<CacheKey>>>,
        compute: F,
    ) -> watch::Receiver<Option<Outcome>>
    where
        F: FnOnce() -> ComputeFuture + Send + 'static,
    {
        let (sender, receiver) = watch::channel(None);
        let generation = self.shared.generation.fetch_add(1, Ordering::Relaxed);

        slots.insert(
            key.clone(),
            Slot {
                fingerprint: request.fingerprint.clone(),
                generation,
                receiver: receiver.clone(),
            },
        );
        self.shared.computations.fetch_add(1, Ordering::Relaxed);
        debug!("Starting computation: {}", key);

        let mut chain = chain.map(|c| (*c).clone()).unwrap_or_default();
        chain.insert(key.clone());

        let span = debug_span!("compute", function = %request.function, key = %key.short_hash());
        let completion = Completion {
            store: Arc::clone(store),
            key,
            request,
            generation,
        };
        let shared = Arc::clone(&self.shared);

        tokio::spawn(
            CALL_CHAIN
                .scope(Arc::new(chain), async move {
                    let result = completion.run(compute).await;
                    let outcome = shared.finish(&completion, result);
                    sender.send_replace(Some(outcome));
                })
                .instrument(span),
        );

        receiver
    }

    /// Detach the in-flight computations covered by `scope`, then run `f`
    /// under the slots lock.
    ///
    /// A detached computation still answers the callers waiting on it but
    /// does not install into the store, so nothing `f` removes can reappear.
    /// Callers arriving after the fence start a fresh computation. Slots
    /// outside `scope` are untouched.
    pub fn fence<R>(&self, scope: &InvalidationScope, f: impl FnOnce() -> R) -> R {
        let mut slots = self.shared.slots.lock();
        let before = slots.len();
        slots.retain(|key, _| !scope.covers(key));
        let detached = before - slots.len();
        if detached > 0 {
            debug!("Detached {} in-flight computations", detached);
        }
        f()
    }

    /// Number of computations currently in flight
    pub fn in_flight(&self) -> usize {
        self.shared.slots.lock().len()
    }

    pub fn stats(&self) -> FlightStats {
        FlightStats {
            in_flight: self.in_flight(),
            computations: self.shared.computations.load(Ordering::Relaxed),
            coalesced: self.shared.coalesced.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
        }
    }
}

impl FlightShared {
    /// Install a success and close the slot, both under the slots lock
    fn finish(
        &self,
        completion: &Completion,
        result: std::result::Result<(Payload, usize), CacheError>,
    ) -> Outcome {
        let mut slots = self.slots.lock();
        let key = &completion.key;

        // A cleared or superseded slot no longer belongs to this computation
        let current = slots
            .get(key)
            .map_or(false, |slot| slot.generation == completion.generation);
        if current {
            slots.remove(key);
        }

        match result {
            Ok((payload, size_estimate)) => {
                if current {
                    let request = &completion.request;
                    let entry = CacheEntry::new(
                        key.clone(),
                        Arc::clone(&payload),
                        request.discipline,
                        request.fingerprint.clone(),
                        size_estimate,
                    )
                    .with_ttl(request.ttl);
                    if let Some(event) = completion.store.put(entry) {
                        debug!("Storing {} evicted {} entries", key, event.count());
                    }
                } else {
                    debug!("Slot for {} was detached while computing, not storing", key);
                }
                Ok(payload)
            }
            Err(error) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                Err(error)
            }
        }
    }
}

/// What a finished computation needs in order to install itself
struct Completion {
    store: Arc<CacheStore>,
    key: CacheKey,
    request: ComputeRequest,
    generation: u64,
}

impl Completion {
    /// Run the computation under the deadline, turning panics into errors
    async fn run<F>(&self, compute: F) -> std::result::Result<(Payload, usize), CacheError>
    where
        F: FnOnce() -> ComputeFuture + Send + 'static,
    {
        let function = self.request.function.as_str();
        let guarded = AssertUnwindSafe(async move { compute().await }).catch_unwind();

        let result = match self.request.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, guarded).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Computation {} timed out after {:?}", self.key, timeout);
                    return Err(CacheError::TimeoutError {
                        function: function.to_string(),
                        timeout,
                    });
                }
            },
            None => guarded.await,
        };

        match result {
            Ok(Ok(computed)) => Ok(computed),
            Ok(Err(error)) => {
                debug!("Computation {} failed: {:#}", self.key, error);
                Err(CacheError::computation(function, error))
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic payload".to_string());
                warn!("Computation {} panicked: {}", self.key, message);
                Err(CacheError::computation(
                    function,
                    anyhow::anyhow!("panicked: {}", message),
                ))
            }
        }
    }
}
