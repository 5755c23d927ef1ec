//! Run-level driver.
//!
//! Discovers manifests, settles resumption skips, prepares the existence
//! index only when some manifest still needs the store, validates the rest on
//! a bounded pool of tasks and folds every report into the [`OverallSummary`].

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use pairguard_index::{atomic_write_json, infer_prefixes, ExistenceIndex};
use pairguard_resolver::RetryPolicy;
use pairguard_transport::ObjectStore;
use pairguard_types::{Manifest, PairingMode};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::ValidatorConfig;
use crate::report::{self, OverallSummary};
use crate::validator::{manifest_name, prior_result, read_manifest, ManifestReport, ManifestValidator};

/// Where manifest tasks get their index from.
#[derive(Debug, Clone)]
pub enum IndexSource {
    /// Index tier off.
    Disabled,
    /// In-memory index shared by every task.
    Shared(Arc<ExistenceIndex>),
    /// Cache file, read at most once by each manifest worker.
    Cached(PathBuf),
    /// Loaded or built on first need. A run whose manifests are all skipped
    /// never lists or reads anything.
    Lazy(IndexOptions),
}

/// How to obtain the index for a run.
#[derive(Clone)]
pub struct IndexOptions {
    pub path: PathBuf,
    /// Rebuild even when a readable cache exists.
    pub refresh: bool,
    /// Explicit listing prefixes; inferred from the manifests when empty.
    pub prefixes: Vec<String>,
    /// Listing backends, tried in order.
    pub sources: Vec<Arc<dyn ObjectStore>>,
}

impl fmt::Debug for IndexOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sources: Vec<&str> = self.sources.iter().map(|s| s.name()).collect();
        f.debug_struct("IndexOptions")
            .field("path", &self.path)
            .field("refresh", &self.refresh)
            .field("prefixes", &self.prefixes)
            .field("sources", &sources)
            .finish()
    }
}

/// Read the cache file, counting successful decodes in `loads`.
fn load_index(path: &Path, loads: &AtomicUsize) -> Option<Arc<ExistenceIndex>> {
    let index = ExistenceIndex::load(path)?;
    loads.fetch_add(1, Ordering::Relaxed);
    Some(Arc::new(index))
}

/// Index handle owned by one manifest worker.
#[derive(Default)]
struct WorkerSlot {
    loaded: bool,
    index: Option<Arc<ExistenceIndex>>,
}

/// One slot per manifest worker. A task checks a slot out after taking its
/// permit and returns it when done, so the next manifest on that worker reuses
/// whatever the slot already loaded.
struct WorkerSlots {
    source: IndexSource,
    loads: Arc<AtomicUsize>,
    free: Mutex<Vec<WorkerSlot>>,
}

impl WorkerSlots {
    fn new(
        source: IndexSource,
        workers: usize,
        seed: Option<Arc<ExistenceIndex>>,
        loads: Arc<AtomicUsize>,
    ) -> Self {
        let mut free: Vec<WorkerSlot> = (0..workers).map(|_| WorkerSlot::default()).collect();
        if let (Some(index), Some(slot)) = (seed, free.last_mut()) {
            slot.loaded = true;
            slot.index = Some(index);
        }
        Self {
            source,
            loads,
            free: Mutex::new(free),
        }
    }

    fn checkout(&self) -> WorkerSlot {
        self.free.lock().pop().unwrap_or_default()
    }

    fn checkin(&self, slot: WorkerSlot) {
        self.free.lock().push(slot);
    }

    fn index(&self, slot: &mut WorkerSlot) -> Option<Arc<ExistenceIndex>> {
        match &self.source {
            IndexSource::Disabled | IndexSource::Lazy(_) => None,
            IndexSource::Shared(index) => Some(Arc::clone(index)),
            IndexSource::Cached(path) => {
                if !slot.loaded {
                    slot.index = load_index(path, &self.loads);
                    slot.loaded = true;
                }
                slot.index.clone()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    /// One manifest by name (file stem) or file name.
    Named(String),
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub summary: OverallSummary,
    /// Per-manifest reports sorted by manifest name.
    pub reports: Vec<ManifestReport>,
}

/// Manifest files in `dir`: `*.json`, not hidden, sorted by file name.
pub fn list_manifests(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("read input directory {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read input directory {}", dir.display()))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if path.is_file() && name.ends_with(".json") && !name.starts_with('.') {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub struct Orchestrator {
    store: Arc<dyn ObjectStore>,
    config: ValidatorConfig,
    policy: Option<RetryPolicy>,
    index_loads: Arc<AtomicUsize>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn ObjectStore>, config: ValidatorConfig) -> Self {
        Self {
            store,
            config,
            policy: None,
            index_loads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Override the retry policy used by every manifest task.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Index cache files decoded so far by this orchestrator.
    pub fn index_loads(&self) -> usize {
        self.index_loads.load(Ordering::Relaxed)
    }

    fn validator(&self) -> ManifestValidator {
        let validator = ManifestValidator::new(Arc::clone(&self.store), &self.config);
        match &self.policy {
            Some(policy) => validator.with_policy(policy.clone()),
            None => validator,
        }
    }

    pub fn select(&self, selection: &Selection) -> Result<Vec<PathBuf>> {
        match selection {
            Selection::All => list_manifests(&self.config.input_dir),
            Selection::Named(name) => {
                let file_name = if name.ends_with(".json") {
                    name.clone()
                } else {
                    format!("{}.json", name)
                };
                let path = self.config.input_dir.join(file_name);
                if !path.is_file() {
                    return Err(anyhow!("manifest {} not found", path.display()));
                }
                Ok(vec![path])
            }
        }
    }

    /// Listing prefixes: the explicit ones, else inferred from `files`.
    /// Unreadable manifests contribute nothing.
    pub fn index_prefixes(&self, files: &[PathBuf], explicit: &[String]) -> BTreeSet<String> {
        if !explicit.is_empty() {
            return explicit.iter().cloned().collect();
        }
        let manifests: Vec<Manifest> = files
            .iter()
            .filter_map(|p| read_manifest(p, &self.config.keys, PairingMode::Truncate).ok())
            .collect();
        infer_prefixes(&manifests)
    }

    /// List the prefixes and build a fresh index (not saved).
    pub async fn build_index(&self, files: &[PathBuf], options: &IndexOptions) -> ExistenceIndex {
        let prefixes = self.index_prefixes(files, &options.prefixes);
        info!(prefixes = prefixes.len(), sources = options.sources.len(), "building existence index");
        pairguard_index::build(
            &prefixes,
            self.config.scope.as_deref(),
            &options.sources,
            self.config.list_timeout,
        )
        .await
    }

    /// Cached index when readable, else a fresh build saved to the cache.
    /// Never fails: every problem degrades to a weaker index source.
    ///
    /// A single manifest worker keeps what it loaded or built in memory. With
    /// more workers the cache path is handed out and the index already in hand
    /// is returned as the seed for the first worker.
    async fn prepare_index(
        &self,
        files: &[PathBuf],
        options: &IndexOptions,
    ) -> (IndexSource, Option<Arc<ExistenceIndex>>) {
        let share = self.config.manifest_workers <= 1;
        if !options.refresh {
            if let Some(index) = load_index(&options.path, &self.index_loads) {
                info!(
                    path = %options.path.display(),
                    objects = index.len(),
                    created_at = %index.created_at,
                    "using cached existence index"
                );
                return if share {
                    (IndexSource::Shared(index), None)
                } else {
                    (IndexSource::Cached(options.path.clone()), Some(index))
                };
            }
        }
        let index = self.build_index(files, options).await;
        if index.is_empty() {
            warn!("existence index is empty; falling back to bulk and point queries");
            return (IndexSource::Disabled, None);
        }
        let index = Arc::new(index);
        match index.save(&options.path) {
            Ok(()) if !share => (IndexSource::Cached(options.path.clone()), Some(index)),
            Ok(()) => (IndexSource::Shared(index), None),
            Err(e) => {
                warn!(path = %options.path.display(), "could not save index cache, using it in memory: {:#}", e);
                (IndexSource::Shared(index), None)
            }
        }
    }

    /// The prior report for `path` when resumption applies.
    fn prior_report(&self, path: &Path) -> Option<ManifestReport> {
        if !self.config.skip_existing {
            return None;
        }
        let name = manifest_name(path);
        let output_path = self.config.output_path(&output_file_name(path));
        let report = prior_result(&name, &output_path, &self.config.report_path(&name))?;
        info!(manifest = %name, valid = report.valid_count, original = report.original_count, "already validated, skipping");
        Some(report)
    }

    /// Validate the selected manifests, writing filtered manifests and
    /// per-manifest reports as each one finishes.
    pub async fn run(&self, selection: &Selection, index: IndexSource) -> Result<RunOutcome> {
        let files = self.select(selection)?;
        let validated_at = self.config.validated_at.unwrap_or_else(Utc::now);
        info!(
            manifests = files.len(),
            manifest_workers = self.config.manifest_workers,
            workers = self.config.workers,
            "starting validation run"
        );

        let mut summary = OverallSummary::new();
        let mut reports = Vec::new();
        let mut pending = Vec::new();
        for path in files {
            match self.prior_report(&path) {
                Some(report) => {
                    summary.fold(&report);
                    reports.push(report);
                }
                None => pending.push(path),
            }
        }

        let (index, seed) = match index {
            IndexSource::Lazy(options) if !pending.is_empty() => self.prepare_index(&pending, &options).await,
            IndexSource::Lazy(_) => (IndexSource::Disabled, None),
            other => (other, None),
        };
        let workers = self.config.manifest_workers.max(1);
        let slots = Arc::new(WorkerSlots::new(index, workers, seed, Arc::clone(&self.index_loads)));
        let validator = Arc::new(self.validator());
        let config = Arc::new(self.config.clone());
        let semaphore = Arc::new(Semaphore::new(workers));
        // Name travels with the result so a failed task can be identified.
        let mut join_set: JoinSet<(String, Result<ManifestReport>)> = JoinSet::new();

        for path in pending {
            let validator = Arc::clone(&validator);
            let config = Arc::clone(&config);
            let slots = Arc::clone(&slots);
            let semaphore = Arc::clone(&semaphore);
            let name = manifest_name(&path);
            join_set.spawn(async move {
                let result: Result<ManifestReport> = async {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| anyhow!("semaphore closed: {}", e))?;
                    let mut slot = slots.checkout();
                    let index = slots.index(&mut slot);
                    let result = process_manifest(&validator, &config, &path, index, validated_at).await;
                    slots.checkin(slot);
                    result
                }
                .await;
                (name, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, Ok(report))) => {
                    summary.fold(&report);
                    reports.push(report);
                }
                Ok((name, Err(e))) => {
                    error!(manifest = %name, "manifest failed: {:#}", e);
                    return Err(e.context(format!("manifest {}", name)));
                }
                Err(e) => return Err(anyhow!("manifest task failed: {}", e)),
            }
        }
        reports.sort_by(|a, b| a.manifest.cmp(&b.manifest));
        Ok(RunOutcome {
            summary: summary.finalize(validated_at),
            reports,
        })
    }

    /// Write `validation_summary.{json,csv,txt}` and the missing-files detail.
    pub fn write_summary(&self, outcome: &RunOutcome) -> Result<Vec<PathBuf>> {
        report::write_summary(&self.config.report_dir, &outcome.summary, &outcome.reports)
    }
}

fn output_file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{}.json", manifest_name(path)))
}

/// Validate one manifest file and write its outputs. Only I/O failures while
/// writing results are errors; everything else is in the returned report.
async fn process_manifest(
    validator: &ManifestValidator,
    config: &ValidatorConfig,
    path: &Path,
    index: Option<Arc<ExistenceIndex>>,
    validated_at: DateTime<Utc>,
) -> Result<ManifestReport> {
    let name = manifest_name(path);
    let output_path = config.output_path(&output_file_name(path));

    let manifest = match read_manifest(path, &config.keys, config.pairing) {
        Ok(m) => m,
        Err(e) => {
            warn!(manifest = %name, "rejecting manifest: {:#}", e);
            let report = ManifestReport::rejected(&name, format!("{:#}", e), validated_at);
            report::write_manifest_reports(&config.report_dir, &report)?;
            return Ok(report);
        }
    };

    let validation = validator.validate(&manifest, index, validated_at).await;
    match validation.filtered {
        Some(doc) => {
            atomic_write_json(&output_path, &Value::Object(doc))
                .with_context(|| format!("write filtered manifest {}", output_path.display()))?;
        }
        None => {
            info!(manifest = %name, "no valid pairs, no filtered output");
            if output_path.exists() {
                std::fs::remove_file(&output_path)
                    .with_context(|| format!("remove stale output {}", output_path.display()))?;
            }
        }
    }
    report::write_manifest_reports(&config.report_dir, &validation.report)?;
    Ok(validation.report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairguard_transport::MemoryStore;
    use tempfile::TempDir;

    #[test]
    fn test_list_manifests_filters_and_sorts() -> Result<()> {
        let dir = TempDir::new()?;
        for name in ["b.json", "a.json", ".hidden.json", "notes.txt"] {
            std::fs::write(dir.path().join(name), "{}")?;
        }
        std::fs::create_dir(dir.path().join("sub.json"))?;
        let files = list_manifests(dir.path())?;
        let names: Vec<String> = files.iter().map(|p| manifest_name(p)).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(list_manifests(&dir.path().join("missing")).is_err());
        Ok(())
    }

    #[test]
    fn test_select_named() -> Result<()> {
        let dir = TempDir::new()?;
        std::fs::write(dir.path().join("liver_5.json"), "{}")?;
        let config = ValidatorConfig::new(dir.path(), dir.path().join("out"), dir.path().join("rep"));
        let orch = Orchestrator::new(Arc::new(MemoryStore::new()), config);
        assert_eq!(orch.select(&Selection::Named("liver_5".into()))?.len(), 1);
        assert_eq!(orch.select(&Selection::Named("liver_5.json".into()))?.len(), 1);
        assert!(orch.select(&Selection::Named("kidney".into())).is_err());
        Ok(())
    }

    #[test]
    fn test_worker_slot_reads_cache_once() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("idx.json.gz");
        ExistenceIndex::new(vec![pairguard_types::ObjectRef::from("gs://b/a")], BTreeSet::new(), None).save(&path)?;
        let loads = Arc::new(AtomicUsize::new(0));
        let slots = WorkerSlots::new(IndexSource::Cached(path.clone()), 1, None, Arc::clone(&loads));

        for _ in 0..3 {
            let mut slot = slots.checkout();
            assert_eq!(slots.index(&mut slot).map(|i| i.len()), Some(1));
            slots.checkin(slot);
        }
        assert_eq!(loads.load(Ordering::Relaxed), 1);

        // A seeded slot never touches the file.
        std::fs::remove_file(&path)?;
        let seed = Arc::new(ExistenceIndex::new(Vec::<pairguard_types::ObjectRef>::new(), BTreeSet::new(), None));
        let seeded = WorkerSlots::new(IndexSource::Cached(path), 1, Some(seed), Arc::clone(&loads));
        let mut slot = seeded.checkout();
        assert!(seeded.index(&mut slot).is_some());
        assert_eq!(loads.load(Ordering::Relaxed), 1);
        Ok(())
    }

    #[test]
    fn test_worker_slot_without_index() {
        let loads = Arc::new(AtomicUsize::new(0));
        let slots = WorkerSlots::new(IndexSource::Disabled, 2, None, Arc::clone(&loads));
        let mut slot = slots.checkout();
        assert!(slots.index(&mut slot).is_none());
        let missing = WorkerSlots::new(IndexSource::Cached(PathBuf::from("/nonexistent/idx.json.gz")), 1, None, loads);
        let mut slot = missing.checkout();
        assert!(missing.index(&mut slot).is_none());
        assert!(slot.loaded);
    }
}
