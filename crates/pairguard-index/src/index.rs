//! Existence index: a listing snapshot queried by membership.
//!
//! Membership means the object existed at `created_at`. Absence means nothing:
//! the listing may be partial or stale, so a miss only licenses a fallback
//! check by the resolver.
//!
//! # Cache file format
//!
//! gzip-compressed JSON:
//! ```json
//! {
//!   "version": 1,
//!   "created_at": "2026-01-01T00:00:00Z",
//!   "scope": "my-billing-project",
//!   "source": "gsutil",
//!   "prefixes": ["gs://bucket/dir/"],
//!   "object_count": 2,
//!   "objects": ["gs://bucket/dir/a.bam", "gs://bucket/dir/a.bam.bai"]
//! }
//! ```

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use pairguard_transport::ObjectStore;
use pairguard_types::{Manifest, ObjectRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::paths::atomic_write;

/// Bumped whenever the on-disk layout changes; other versions load as absent.
pub const INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct ExistenceIndex {
    objects: HashSet<ObjectRef>,
    pub prefixes: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub scope: Option<String>,
    /// Backend whose listing produced the snapshot.
    pub source: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    created_at: DateTime<Utc>,
    scope: Option<String>,
    source: Option<String>,
    prefixes: Vec<String>,
    object_count: usize,
    objects: Vec<ObjectRef>,
}

impl ExistenceIndex {
    pub fn new<I>(objects: I, prefixes: BTreeSet<String>, scope: Option<String>) -> Self
    where
        I: IntoIterator<Item = ObjectRef>,
    {
        Self {
            objects: objects.into_iter().collect(),
            prefixes,
            created_at: Utc::now(),
            scope,
            source: None,
        }
    }

    pub fn contains(&self, object: &ObjectRef) -> bool {
        self.objects.contains(object)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Persist as gzip JSON, objects sorted so identical snapshots produce
    /// identical files. The file is replaced wholesale.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut objects: Vec<ObjectRef> = self.objects.iter().cloned().collect();
        objects.sort();
        let file = IndexFile {
            version: INDEX_FORMAT_VERSION,
            created_at: self.created_at,
            scope: self.scope.clone(),
            source: self.source.clone(),
            prefixes: self.prefixes.iter().cloned().collect(),
            object_count: objects.len(),
            objects,
        };
        let json = serde_json::to_vec(&file).context("serialize existence index")?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json).context("compress existence index")?;
        let bytes = encoder.finish().context("compress existence index")?;
        atomic_write(path, &bytes)?;
        info!(
            path = %path.display(),
            objects = file.object_count,
            "saved existence index"
        );
        Ok(())
    }

    /// Load a cached index. Missing, unreadable, corrupt, or wrong-version
    /// files all yield `None`.
    pub fn load(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        match Self::read(path) {
            Ok(index) => {
                debug!(path = %path.display(), objects = index.len(), "loaded existence index");
                Some(index)
            }
            Err(e) => {
                warn!(path = %path.display(), "ignoring unreadable index cache: {:#}", e);
                None
            }
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
        let decoder = GzDecoder::new(std::io::BufReader::new(file));
        let parsed: IndexFile = serde_json::from_reader(decoder).context("decode existence index")?;
        if parsed.version != INDEX_FORMAT_VERSION {
            return Err(anyhow!(
                "index format version {} (expected {})",
                parsed.version,
                INDEX_FORMAT_VERSION
            ));
        }
        Ok(Self {
            objects: parsed.objects.into_iter().collect(),
            prefixes: parsed.prefixes.into_iter().collect(),
            created_at: parsed.created_at,
            scope: parsed.scope,
            source: parsed.source,
        })
    }
}

/// Build an index by listing `prefixes`, trying `sources` in order.
///
/// The first source whose listing yields at least one object wins. Listing
/// errors and timeouts are logged and move on to the next source. When every
/// source comes back empty the result is an empty index, not an error.
pub async fn build(
    prefixes: &BTreeSet<String>,
    scope: Option<&str>,
    sources: &[Arc<dyn ObjectStore>],
    list_timeout: Duration,
) -> ExistenceIndex {
    for source in sources {
        let mut found: HashSet<ObjectRef> = HashSet::new();
        for prefix in prefixes {
            match tokio::time::timeout(list_timeout, source.list_prefix(prefix, scope)).await {
                Ok(Ok(objects)) => {
                    debug!(source = source.name(), %prefix, objects = objects.len(), "listed prefix");
                    found.extend(objects);
                }
                Ok(Err(e)) => {
                    warn!(source = source.name(), %prefix, "listing failed: {:#}", e);
                }
                Err(_) => {
                    warn!(source = source.name(), %prefix, timeout_secs = list_timeout.as_secs(), "listing timed out");
                }
            }
        }
        if !found.is_empty() {
            info!(
                source = source.name(),
                prefixes = prefixes.len(),
                objects = found.len(),
                "built existence index"
            );
            let mut index = ExistenceIndex::new(found, prefixes.clone(), scope.map(str::to_string));
            index.source = Some(source.name().to_string());
            return index;
        }
    }
    warn!(prefixes = prefixes.len(), "no listing source returned objects; index is empty");
    ExistenceIndex::new(Vec::new(), prefixes.clone(), scope.map(str::to_string))
}

/// Containing folder of each manifest's first remote-style reference.
/// Manifests with no remote reference contribute nothing.
pub fn infer_prefixes<'a, I>(manifests: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a Manifest>,
{
    manifests
        .into_iter()
        .filter_map(|m| m.first_remote_ref())
        .filter_map(ObjectRef::parent_prefix)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairguard_transport::MemoryStore;
    use pairguard_types::{ManifestDocument, ManifestKeys, PairingMode};
    use serde_json::json;
    use tempfile::TempDir;

    fn manifest(name: &str, bams: &[&str]) -> Manifest {
        let bais: Vec<String> = bams.iter().map(|b| format!("{}.bai", b)).collect();
        ManifestDocument::from_value(
            name,
            json!({"SplicingAnalysis.bam_files": bams, "SplicingAnalysis.bai_files": bais}),
            ManifestKeys::default(),
        )
        .unwrap()
        .into_manifest(PairingMode::Strict)
        .unwrap()
    }

    #[test]
    fn test_save_load_roundtrip_sorted() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("idx.json.gz");
        let index = ExistenceIndex::new(
            vec![ObjectRef::from("gs://b/z"), ObjectRef::from("gs://b/a")],
            BTreeSet::from(["gs://b/".to_string()]),
            Some("proj".to_string()),
        );
        index.save(&path)?;

        let loaded = ExistenceIndex::load(&path).expect("cache should load");
        assert_eq!(loaded.len(), 2);
        assert!(loaded.contains(&ObjectRef::from("gs://b/a")));
        assert_eq!(loaded.scope.as_deref(), Some("proj"));
        assert_eq!(loaded.created_at, index.created_at);

        let raw: serde_json::Value =
            serde_json::from_reader(GzDecoder::new(std::fs::File::open(&path)?))?;
        assert_eq!(raw["objects"], json!(["gs://b/a", "gs://b/z"]));
        Ok(())
    }

    #[test]
    fn test_load_absent_or_corrupt() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("idx.json.gz");
        assert!(ExistenceIndex::load(&path).is_none());

        std::fs::write(&path, b"not gzip at all")?;
        assert!(ExistenceIndex::load(&path).is_none());

        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(br#"{"version": 99}"#)?;
        std::fs::write(&path, enc.finish()?)?;
        assert!(ExistenceIndex::load(&path).is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_build_first_non_empty_source_wins() {
        let failing = Arc::new(MemoryStore::with_objects(["gs://b/d/a.bam"]));
        failing.set_fail_listing(true);
        let empty = Arc::new(MemoryStore::new());
        let good = Arc::new(MemoryStore::with_objects(["gs://b/d/a.bam", "gs://b/other/x"]));
        let unused = Arc::new(MemoryStore::with_objects(["gs://b/d/zzz"]));

        let sources: Vec<Arc<dyn ObjectStore>> =
            vec![failing.clone(), empty.clone(), good.clone(), unused.clone()];
        let prefixes = BTreeSet::from(["gs://b/d/".to_string()]);
        let index = build(&prefixes, Some("proj"), &sources, Duration::from_secs(5)).await;

        assert_eq!(index.len(), 1);
        assert!(index.contains(&ObjectRef::from("gs://b/d/a.bam")));
        assert_eq!(index.source.as_deref(), Some("memory"));
        assert_eq!(index.scope.as_deref(), Some("proj"));
        assert_eq!(unused.calls().list, 0);
        assert_eq!(failing.calls().list, 1);
    }

    #[tokio::test]
    async fn test_build_all_empty_is_not_an_error() {
        let sources: Vec<Arc<dyn ObjectStore>> = vec![Arc::new(MemoryStore::new())];
        let index = build(
            &BTreeSet::from(["gs://b/".to_string()]),
            None,
            &sources,
            Duration::from_secs(5),
        )
        .await;
        assert!(index.is_empty());
        assert_eq!(index.prefixes.len(), 1);
    }

    #[test]
    fn test_infer_prefixes() {
        let manifests = vec![
            manifest("a", &["gs://b/dir1/s1.bam", "gs://b/dir2/s2.bam"]),
            manifest("b", &["gs://b/dir1/s3.bam"]),
            manifest("c", &["local/s4.bam"]),
            manifest("d", &[]),
        ];
        let prefixes = infer_prefixes(&manifests);
        assert_eq!(prefixes, BTreeSet::from(["gs://b/dir1/".to_string()]));
    }
}
