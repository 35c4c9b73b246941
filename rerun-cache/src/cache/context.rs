//! Per-rerun invocation context
//!
//! One [`InvocationContext`] represents one rerun of one session. Cached calls
//! made through it run inside the rerun's tracing span and are tallied into a
//! [`RerunSummary`], which is how a dashboard reports "3 cached, 1 computed".

use crate::cache::flight::Origin;
use crate::cache::key::CacheArgs;
use crate::cache::memo::{MemoCache, ResourceFn, ValueFn};
use crate::error::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, info_span, Instrument, Span};
use uuid::Uuid;

/// Cache outcomes of one rerun
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RerunSummary {
    pub session: Uuid,
    pub rerun: u64,
    pub started_at: DateTime<Utc>,
    pub hits: u64,
    pub computed: u64,
    pub coalesced: u64,
    pub errors: u64,
}

impl RerunSummary {
    fn new(session: Uuid, rerun: u64) -> Self {
        Self {
            session,
            rerun,
            started_at: Utc::now(),
            hits: 0,
            computed: 0,
            coalesced: 0,
            errors: 0,
        }
    }

    /// Total cached calls made during the rerun
    pub fn calls(&self) -> u64 {
        self.hits + self.computed + self.coalesced + self.errors
    }

    fn note(&mut self, outcome: std::result::Result<Origin, ()>) {
        match outcome {
            Ok(Origin::Hit) => self.hits += 1,
            Ok(Origin::Computed) => self.computed += 1,
            Ok(Origin::Coalesced) => self.coalesced += 1,
            Err(()) => self.errors += 1,
        }
    }
}

impl fmt::Display for RerunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rerun {}: {} cached, {} computed, {} joined, {} failed",
            self.rerun, self.hits, self.computed, self.coalesced, self.errors
        )
    }
}

/// One rerun of one session
pub struct InvocationContext {
    cache: MemoCache,
    span: Span,
    summary: Mutex<RerunSummary>,
}

impl InvocationContext {
    pub fn new(cache: MemoCache, session: Uuid, rerun: u64) -> Self {
        let span = info_span!("rerun", session = %session, rerun);
        Self {
            cache,
            span,
            summary: Mutex::new(RerunSummary::new(session, rerun)),
        }
    }

    pub fn cache(&self) -> &MemoCache {
        &self.cache
    }

    pub fn session(&self) -> Uuid {
        self.summary.lock().session
    }

    pub fn rerun(&self) -> u64 {
        self.summary.lock().rerun
    }

    /// Span every cached call of this rerun runs in
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Call a value function, returning an independent copy
    pub async fn value<A, T>(&self, function: &ValueFn<A, T>, args: A) -> Result<T>
    where
        A: CacheArgs + Send + 'static,
        T: Clone + Send + Sync + 'static,
    {
        let result = function
            .call_traced(args)
            .instrument(self.span.clone())
            .await;
        self.summary
            .lock()
            .note(result.as_ref().map(|(_, origin)| *origin).map_err(|_| ()));
        result.map(|(value, _)| value)
    }

    /// Call a resource function, returning the shared instance
    pub async fn resource<A, T>(&self, function: &ResourceFn<A, T>, args: A) -> Result<Arc<T>>
    where
        A: CacheArgs + Send + 'static,
        T: Send + Sync + 'static,
    {
        let result = function
            .call_traced(args)
            .instrument(self.span.clone())
            .await;
        self.summary
            .lock()
            .note(result.as_ref().map(|(_, origin)| *origin).map_err(|_| ()));
        result.map(|(resource, _)| resource)
    }

    /// Counters so far
    pub fn summary(&self) -> RerunSummary {
        self.summary.lock().clone()
    }

    /// End the rerun and log its summary
    pub fn finish(self) -> RerunSummary {
        let summary = self.summary.into_inner();
        let elapsed = Utc::now() - summary.started_at;
        self.span.in_scope(|| {
            info!(
                "Rerun finished in {}ms: {}",
                elapsed.num_milliseconds(),
                summary
            )
        });
        summary
    }
}
