//! Remote object references.
//!
//! An [`ObjectRef`] is kept as the exact string found in the manifest. Two
//! references are the same object only if their strings are identical; no
//! normalization is applied, since the remote store itself is case- and
//! slash-sensitive.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque remote-object identifier, e.g. `gs://bucket/path/to/SAMPLE.bam`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectRef(String);

impl ObjectRef {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Scheme without the `://` separator (`"gs"`), if the ref is remote-style.
    pub fn scheme(&self) -> Option<&str> {
        self.0.split_once("://").map(|(scheme, _)| scheme)
    }

    /// True for `scheme://bucket/...` references.
    pub fn is_remote(&self) -> bool {
        matches!(self.bucket(), Some(b) if !b.is_empty())
    }

    /// Bucket name for remote-style references.
    pub fn bucket(&self) -> Option<&str> {
        let (_, rest) = self.0.split_once("://")?;
        Some(rest.split('/').next().unwrap_or(rest))
    }

    /// Object key inside the bucket (no leading slash).
    pub fn key(&self) -> Option<&str> {
        let (_, rest) = self.0.split_once("://")?;
        rest.split_once('/').map(|(_, key)| key)
    }

    /// Last path segment.
    pub fn basename(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Containing "folder" including the trailing slash:
    /// `gs://b/a/x.bam` -> `gs://b/a/`. None for non-remote refs or refs at the
    /// bucket root with no key.
    pub fn parent_prefix(&self) -> Option<String> {
        if !self.is_remote() {
            return None;
        }
        let key = self.key()?;
        let idx = self.0.rfind('/')?;
        if key.is_empty() {
            return None;
        }
        Some(self.0[..=idx].to_string())
    }

    /// Sample identifier: basename up to the first `.`.
    ///
    /// `gs://b/GTEX-1.Aligned.bam` -> `GTEX-1`.
    pub fn sample_id(&self) -> &str {
        let base = self.basename();
        base.split('.').next().unwrap_or(base)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ObjectRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}
