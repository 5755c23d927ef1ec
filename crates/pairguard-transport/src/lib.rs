//! pairguard transport layer
//!
//! Remote object-existence capability, invoked three ways: list objects under a
//! prefix, batch-check a set of references, and check one reference.
//!
//! This crate provides:
//! - [`ObjectStore`]: the capability trait every backend implements
//! - [`gsutil`]: backend driving the `gsutil` CLI (`stat`, multi-URL `ls`, `ls -r`)
//! - [`gcs_json`]: backend for the Cloud Storage JSON API over HTTP
//! - [`memory`]: in-process store with call accounting, for tests and dry runs
//!
//! # Example
//!
//! ```ignore
//! use pairguard_transport::{GsutilStore, ObjectStore};
//!
//! let store = GsutilStore::new();
//! store.probe().await?;
//! let exists = store.stat(&"gs://bucket/a.bam".into(), Some("my-project")).await?;
//! ```

pub mod gcs_json;
pub mod gsutil;
pub mod memory;

pub use gcs_json::GcsJsonStore;
pub use gsutil::GsutilStore;
pub use memory::{MemoryStore, StoreCallCounts};

use anyhow::Result;
use async_trait::async_trait;
use pairguard_types::ObjectRef;
use std::collections::HashSet;

/// A remote store that can answer existence questions.
///
/// `scope` is the billing/project identifier some stores require for access
/// accounting (requester-pays buckets). Implementations never mutate the store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Verify the backend is usable (binary present, credentials available).
    async fn probe(&self) -> Result<()>;

    /// Every object under `prefix` (recursive).
    async fn list_prefix(&self, prefix: &str, scope: Option<&str>) -> Result<Vec<ObjectRef>>;

    /// Subset of `refs` that exist, answered with as few round trips as the
    /// backend allows.
    async fn exists_batch(&self, refs: &[ObjectRef], scope: Option<&str>) -> Result<HashSet<ObjectRef>>;

    /// Single point query. `Ok(false)` means the store answered "not found";
    /// `Err` is a transient or transport failure.
    async fn stat(&self, object: &ObjectRef, scope: Option<&str>) -> Result<bool>;
}
