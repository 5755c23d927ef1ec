//! In-process object store.
//!
//! Holds a set of existing objects and counts every call made against it, so
//! tests can assert which tier answered. Individual objects can be made flaky
//! (fail N times before answering) or slow (delay every point query).

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use pairguard_types::ObjectRef;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::ObjectStore;

/// Snapshot of calls made against a [`MemoryStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCallCounts {
    pub list: u64,
    pub batch: u64,
    pub stat: u64,
}

impl StoreCallCounts {
    pub fn total(&self) -> u64 {
        self.list + self.batch + self.stat
    }
}

/// In-memory [`ObjectStore`]. `Default` starts out unavailable (failing
/// `probe`); use [`MemoryStore::new`] or [`MemoryStore::with_objects`].
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeSet<ObjectRef>>,
    /// Remaining transient failures per object.
    flaky: Mutex<HashMap<ObjectRef, usize>>,
    /// Per-object point-query latency.
    delays: RwLock<HashMap<ObjectRef, Duration>>,
    fail_listing: AtomicBool,
    fail_batch: AtomicBool,
    available: AtomicBool,
    list_calls: AtomicU64,
    batch_calls: AtomicU64,
    stat_calls: AtomicU64,
    stat_log: Mutex<Vec<ObjectRef>>,
}

impl MemoryStore {
    /// Empty, available store.
    pub fn new() -> Self {
        Self::with_objects(std::iter::empty::<ObjectRef>())
    }

    /// Store containing exactly `objects`.
    pub fn with_objects<I, S>(objects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ObjectRef>,
    {
        let store = Self::default();
        store.available.store(true, Ordering::Relaxed);
        store.objects.write().extend(objects.into_iter().map(Into::into));
        store
    }

    pub fn insert(&self, object: impl Into<ObjectRef>) {
        self.objects.write().insert(object.into());
    }

    pub fn remove(&self, object: &ObjectRef) {
        self.objects.write().remove(object);
    }

    /// Fail the next `failures` point queries for `object` with a transient error.
    pub fn set_flaky(&self, object: impl Into<ObjectRef>, failures: usize) {
        self.flaky.lock().insert(object.into(), failures);
    }

    /// Delay every point query for `object`.
    pub fn set_delay(&self, object: impl Into<ObjectRef>, delay: Duration) {
        self.delays.write().insert(object.into(), delay);
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_batch(&self, fail: bool) {
        self.fail_batch.store(fail, Ordering::Relaxed);
    }

    /// Make `probe` fail, as if credentials were missing.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    pub fn calls(&self) -> StoreCallCounts {
        StoreCallCounts {
            list: self.list_calls.load(Ordering::Relaxed),
            batch: self.batch_calls.load(Ordering::Relaxed),
            stat: self.stat_calls.load(Ordering::Relaxed),
        }
    }

    /// Objects that received a point query, in call order.
    pub fn stat_log(&self) -> Vec<ObjectRef> {
        self.stat_log.lock().clone()
    }

    pub fn reset_calls(&self) {
        self.list_calls.store(0, Ordering::Relaxed);
        self.batch_calls.store(0, Ordering::Relaxed);
        self.stat_calls.store(0, Ordering::Relaxed);
        self.stat_log.lock().clear();
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn probe(&self) -> Result<()> {
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(anyhow!("memory store marked unavailable"))
        }
    }

    async fn list_prefix(&self, prefix: &str, _scope: Option<&str>) -> Result<Vec<ObjectRef>> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_listing.load(Ordering::Relaxed) {
            return Err(anyhow!("listing unavailable"));
        }
        Ok(self
            .objects
            .read()
            .iter()
            .filter(|o| o.as_str().starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn exists_batch(&self, refs: &[ObjectRef], _scope: Option<&str>) -> Result<HashSet<ObjectRef>> {
        self.batch_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_batch.load(Ordering::Relaxed) {
            return Err(anyhow!("batch query unavailable"));
        }
        let objects = self.objects.read();
        Ok(refs.iter().filter(|r| objects.contains(*r)).cloned().collect())
    }

    async fn stat(&self, object: &ObjectRef, _scope: Option<&str>) -> Result<bool> {
        self.stat_calls.fetch_add(1, Ordering::Relaxed);
        self.stat_log.lock().push(object.clone());

        let delay = self.delays.read().get(object).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut flaky = self.flaky.lock();
            if let Some(remaining) = flaky.get_mut(object) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(anyhow!("transient failure for {}", object));
                }
            }
        }

        Ok(self.objects.read().contains(object))
    }
}
