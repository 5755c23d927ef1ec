use anyhow::{anyhow, Result};
use pairguard_index::ExistenceIndex;
use pairguard_transport::ObjectStore;
use pairguard_types::{Existence, ObjectRef};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::metrics::ResolverMetrics;
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::tiers::{BatchTier, IndexTier, PointTier, ResolutionTier};

/// Index membership. No remote call.
pub fn exists(object: &ObjectRef, index: &ExistenceIndex) -> bool {
    index.contains(object)
}

/// One bulk existence query bounded by `timeout`.
pub async fn exists_batch(
    store: &dyn ObjectStore,
    refs: &[ObjectRef],
    scope: Option<&str>,
    timeout: Duration,
) -> Result<HashSet<ObjectRef>> {
    tokio::time::timeout(timeout, store.exists_batch(refs, scope))
        .await
        .map_err(|_| anyhow!("batch query timed out after {}s", timeout.as_secs()))?
}

/// Retried point query. Never fails: exhausted retries come back `Unknown`.
pub async fn exists_single(
    store: &dyn ObjectStore,
    object: &ObjectRef,
    scope: Option<&str>,
    policy: &RetryPolicy,
) -> RetryOutcome {
    policy.run(object.as_str(), || store.stat(object, scope)).await
}

/// Verdicts produced by the bulk tiers ahead of per-object dispatch.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    verdicts: HashMap<ObjectRef, Existence>,
}

impl Resolution {
    pub fn get(&self, object: &ObjectRef) -> Option<Existence> {
        self.verdicts.get(object).copied()
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }
}

/// Ordered chain of bulk tiers terminated by the point tier.
pub struct TieredResolver {
    tiers: Vec<Box<dyn ResolutionTier>>,
    point: PointTier,
    metrics: ResolverMetrics,
}

impl TieredResolver {
    /// `batch_timeout: None` disables the bulk-query tier.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        index: Option<Arc<ExistenceIndex>>,
        scope: Option<String>,
        policy: RetryPolicy,
        workers: usize,
        batch_timeout: Option<Duration>,
    ) -> Self {
        let metrics = ResolverMetrics::default();
        let mut tiers: Vec<Box<dyn ResolutionTier>> = Vec::new();
        if index.is_some() {
            tiers.push(Box::new(IndexTier::new(index, metrics.clone())));
        }
        if let Some(timeout) = batch_timeout {
            tiers.push(Box::new(BatchTier::new(
                store.clone(),
                scope.clone(),
                timeout,
                metrics.clone(),
            )));
        }
        let point = PointTier::new(store, scope, policy, workers, metrics.clone());
        Self {
            tiers,
            point,
            metrics,
        }
    }

    pub fn metrics(&self) -> &ResolverMetrics {
        &self.metrics
    }

    /// Run the bulk tiers over `refs` in order, each seeing only what the
    /// previous ones left unresolved.
    pub async fn prefetch(&self, refs: &[ObjectRef]) -> Resolution {
        let mut seen = HashSet::new();
        let mut pending: Vec<ObjectRef> = refs.iter().filter(|r| seen.insert(*r)).cloned().collect();
        let mut verdicts = HashMap::new();
        for tier in &self.tiers {
            if pending.is_empty() {
                break;
            }
            let resolved = tier.resolve(&pending).await;
            debug!(
                tier = tier.name(),
                pending = pending.len(),
                resolved = resolved.len(),
                "tier finished"
            );
            pending.retain(|r| !resolved.contains_key(r));
            verdicts.extend(resolved);
        }
        Resolution { verdicts }
    }

    /// Full chain over a set of objects, point queries bounded by `workers`.
    pub async fn resolve_all(&self, refs: &[ObjectRef]) -> HashMap<ObjectRef, Existence> {
        let prefetched = self.prefetch(refs).await;
        let mut seen = HashSet::new();
        let remaining: Vec<ObjectRef> = refs
            .iter()
            .filter(|r| prefetched.get(r).is_none() && seen.insert(*r))
            .cloned()
            .collect();
        debug!(
            prefetched = prefetched.len(),
            point = remaining.len(),
            "dispatching point queries"
        );
        let mut verdicts = prefetched.verdicts;
        verdicts.extend(self.point.resolve(&remaining).await);
        verdicts
    }
}
