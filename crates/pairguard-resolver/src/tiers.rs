//! Resolution tiers.
//!
//! Each tier receives the objects no earlier tier resolved and returns the
//! verdicts it is able to give. Whatever it leaves out is deferred to the
//! next tier.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use pairguard_index::ExistenceIndex;
use pairguard_transport::ObjectStore;
use pairguard_types::{Existence, ObjectRef};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::metrics::ResolverMetrics;
use crate::resolver::{exists, exists_batch, exists_single};
use crate::retry::RetryPolicy;

#[async_trait]
pub trait ResolutionTier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Verdicts for the subset of `pending` this tier can decide.
    async fn resolve(&self, pending: &[ObjectRef]) -> HashMap<ObjectRef, Existence>;
}

/// Index membership. Never issues a remote call and never says `Absent`.
pub struct IndexTier {
    index: Option<Arc<ExistenceIndex>>,
    metrics: ResolverMetrics,
}

impl IndexTier {
    pub fn new(index: Option<Arc<ExistenceIndex>>, metrics: ResolverMetrics) -> Self {
        Self { index, metrics }
    }
}

#[async_trait]
impl ResolutionTier for IndexTier {
    fn name(&self) -> &'static str {
        "index"
    }

    async fn resolve(&self, pending: &[ObjectRef]) -> HashMap<ObjectRef, Existence> {
        let Some(index) = self.index.as_deref() else {
            return HashMap::new();
        };
        let hits: HashMap<ObjectRef, Existence> = pending
            .iter()
            .filter(|r| exists(r, index))
            .map(|r| (r.clone(), Existence::Present))
            .collect();
        self.metrics.record_index_hits(hits.len() as u64);
        hits
    }
}

/// One bulk query over everything still pending. Confirms presence only; a
/// failed or timed-out query resolves nothing.
pub struct BatchTier {
    store: Arc<dyn ObjectStore>,
    scope: Option<String>,
    timeout: Duration,
    metrics: ResolverMetrics,
}

impl BatchTier {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        scope: Option<String>,
        timeout: Duration,
        metrics: ResolverMetrics,
    ) -> Self {
        Self {
            store,
            scope,
            timeout,
            metrics,
        }
    }
}

#[async_trait]
impl ResolutionTier for BatchTier {
    fn name(&self) -> &'static str {
        "batch"
    }

    async fn resolve(&self, pending: &[ObjectRef]) -> HashMap<ObjectRef, Existence> {
        if pending.is_empty() {
            return HashMap::new();
        }
        match exists_batch(self.store.as_ref(), pending, self.scope.as_deref(), self.timeout).await {
            Ok(found) => {
                self.metrics.record_batch_call(found.len() as u64);
                debug!(requested = pending.len(), found = found.len(), "batch tier");
                found.into_iter().map(|r| (r, Existence::Present)).collect()
            }
            Err(e) => {
                self.metrics.record_batch_failure();
                warn!(requested = pending.len(), "batch query failed, deferring to point queries: {:#}", e);
                HashMap::new()
            }
        }
    }
}

/// Retried point query per object. Decides every object it is given.
pub struct PointTier {
    store: Arc<dyn ObjectStore>,
    scope: Option<String>,
    policy: RetryPolicy,
    workers: usize,
    metrics: ResolverMetrics,
}

impl PointTier {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        scope: Option<String>,
        policy: RetryPolicy,
        workers: usize,
        metrics: ResolverMetrics,
    ) -> Self {
        Self {
            store,
            scope,
            policy,
            workers: workers.max(1),
            metrics,
        }
    }

    /// Point query for a single object, recorded in the metrics.
    pub async fn resolve_one(&self, object: &ObjectRef) -> Existence {
        let outcome = exists_single(self.store.as_ref(), object, self.scope.as_deref(), &self.policy).await;
        self.metrics
            .record_point_query(outcome.attempts, outcome.existence == Existence::Unknown);
        if outcome.existence == Existence::Unknown {
            warn!(object = %object, attempts = outcome.attempts, "existence unknown after retries");
        }
        outcome.existence
    }
}

#[async_trait]
impl ResolutionTier for PointTier {
    fn name(&self) -> &'static str {
        "point"
    }

    async fn resolve(&self, pending: &[ObjectRef]) -> HashMap<ObjectRef, Existence> {
        let queries: Vec<_> = pending
            .iter()
            .cloned()
            .map(|object| async move {
                let verdict = self.resolve_one(&object).await;
                (object, verdict)
            })
            .collect();
        stream::iter(queries).buffer_unordered(self.workers).collect().await
    }
}
