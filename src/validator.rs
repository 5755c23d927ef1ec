//! Per-manifest validation.
//!
//! [`ManifestValidator::validate`] checks every pair of one manifest through a
//! [`TieredResolver`], partitions pairs into valid and failing, and produces
//! the filtered document plus a [`ManifestReport`]. Nothing in here returns an
//! error for a bad object or a bad manifest: those end up in the report.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pairguard_index::ExistenceIndex;
use pairguard_resolver::{ResolutionStats, RetryPolicy, TieredResolver};
use pairguard_transport::ObjectStore;
use pairguard_types::{
    Existence, Manifest, ManifestDocument, ManifestKeys, ObjectRef, PairingMode, ValidationOutcome,
    VALIDATION_METADATA_KEY,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{ValidatorConfig, VALIDATION_TOOL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManifestStatus {
    /// Every pair is valid (vacuously true for an empty manifest).
    Ok,
    /// At least one object is missing.
    Issues,
    /// A prior validated output was reused without contacting the store.
    Skipped,
    /// Not validated: unreadable, malformed, or mis-paired.
    Rejected,
}

impl ManifestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ManifestStatus::Ok => "OK",
            ManifestStatus::Issues => "ISSUES",
            ManifestStatus::Skipped => "SKIPPED",
            ManifestStatus::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for ManifestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much of a manifest was lost to missing objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    None,
    Minor,
    Moderate,
    Critical,
}

impl Severity {
    /// Over 30% of pairs failing is critical, over 10% moderate.
    pub fn classify(original: usize, valid: usize) -> Self {
        if original == 0 || valid >= original {
            return Severity::None;
        }
        let share = (original - valid) as f64 / original as f64;
        if share > 0.30 {
            Severity::Critical
        } else if share > 0.10 {
            Severity::Moderate
        } else {
            Severity::Minor
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::None => "NONE",
            Severity::Minor => "MINOR",
            Severity::Moderate => "MODERATE",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failing pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub index: usize,
    pub sample_id: String,
    pub primary_missing: bool,
    pub secondary_missing: bool,
    /// Missing because retries ran out, not because the store said so.
    #[serde(default)]
    pub primary_unknown: bool,
    #[serde(default)]
    pub secondary_unknown: bool,
    pub primary: ObjectRef,
    pub secondary: ObjectRef,
}

impl From<&ValidationOutcome> for FailureEntry {
    fn from(o: &ValidationOutcome) -> Self {
        Self {
            index: o.pair.index,
            sample_id: o.pair.sample_id.clone(),
            primary_missing: !o.primary_exists(),
            secondary_missing: !o.secondary_exists(),
            primary_unknown: o.primary == Existence::Unknown,
            secondary_unknown: o.secondary == Existence::Unknown,
            primary: o.pair.primary.clone(),
            secondary: o.pair.secondary.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestReport {
    pub manifest: String,
    pub status: ManifestStatus,
    pub severity: Severity,
    pub original_count: usize,
    pub valid_count: usize,
    pub missing_primary_count: usize,
    pub missing_secondary_count: usize,
    /// Objects whose existence could not be determined.
    #[serde(default)]
    pub unknown_count: usize,
    pub success_rate: f64,
    pub validation_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub missing_primary: Vec<ObjectRef>,
    #[serde(default)]
    pub missing_secondary: Vec<ObjectRef>,
    /// Failing pairs, sorted by input position.
    #[serde(default)]
    pub failures: Vec<FailureEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ResolutionStats>,
}

pub fn success_rate(valid: usize, original: usize) -> f64 {
    if original == 0 {
        0.0
    } else {
        valid as f64 / original as f64
    }
}

impl ManifestReport {
    /// Build a report from outcomes already sorted by pair index.
    pub fn from_outcomes(
        manifest: &str,
        outcomes: &[ValidationOutcome],
        resolution: Option<ResolutionStats>,
        validated_at: DateTime<Utc>,
    ) -> Self {
        let failures: Vec<FailureEntry> = outcomes
            .iter()
            .filter(|o| !o.is_valid())
            .map(FailureEntry::from)
            .collect();
        let missing_primary: Vec<ObjectRef> = failures
            .iter()
            .filter(|f| f.primary_missing)
            .map(|f| f.primary.clone())
            .collect();
        let missing_secondary: Vec<ObjectRef> = failures
            .iter()
            .filter(|f| f.secondary_missing)
            .map(|f| f.secondary.clone())
            .collect();
        let unknown_count = failures
            .iter()
            .map(|f| usize::from(f.primary_unknown) + usize::from(f.secondary_unknown))
            .sum();
        let original_count = outcomes.len();
        let valid_count = original_count - failures.len();
        let status = if missing_primary.is_empty() && missing_secondary.is_empty() {
            ManifestStatus::Ok
        } else {
            ManifestStatus::Issues
        };
        Self {
            manifest: manifest.to_string(),
            status,
            severity: Severity::classify(original_count, valid_count),
            original_count,
            valid_count,
            missing_primary_count: missing_primary.len(),
            missing_secondary_count: missing_secondary.len(),
            unknown_count,
            success_rate: success_rate(valid_count, original_count),
            validation_date: validated_at,
            rejection_reason: None,
            missing_primary,
            missing_secondary,
            failures,
            resolution,
        }
    }

    pub fn rejected(manifest: &str, reason: impl Into<String>, validated_at: DateTime<Utc>) -> Self {
        Self {
            manifest: manifest.to_string(),
            status: ManifestStatus::Rejected,
            severity: Severity::None,
            original_count: 0,
            valid_count: 0,
            missing_primary_count: 0,
            missing_secondary_count: 0,
            unknown_count: 0,
            success_rate: 0.0,
            validation_date: validated_at,
            rejection_reason: Some(reason.into()),
            missing_primary: Vec::new(),
            missing_secondary: Vec::new(),
            failures: Vec::new(),
            resolution: None,
        }
    }

    /// Counts reconstructed from a filtered output's provenance block.
    pub fn from_provenance(manifest: &str, metadata: &Map<String, Value>) -> Option<Self> {
        let count = |key: &str| metadata.get(key).and_then(Value::as_u64).map(|n| n as usize);
        let original_count = count("original_sample_count")?;
        let valid_count = count("filtered_sample_count")?;
        let missing_primary_count = count("missing_primary_count").unwrap_or(0);
        let missing_secondary_count = count("missing_secondary_count")
            .or_else(|| count("missing_files").map(|n| n.saturating_sub(missing_primary_count)))
            .unwrap_or(0);
        let validation_date = metadata
            .get("validation_date")
            .and_then(|v| serde_json::from_value::<DateTime<Utc>>(v.clone()).ok())
            .unwrap_or_else(Utc::now);
        Some(Self {
            manifest: manifest.to_string(),
            status: ManifestStatus::Skipped,
            severity: Severity::classify(original_count, valid_count),
            original_count,
            valid_count,
            missing_primary_count,
            missing_secondary_count,
            unknown_count: 0,
            success_rate: success_rate(valid_count, original_count),
            validation_date,
            rejection_reason: None,
            missing_primary: Vec::new(),
            missing_secondary: Vec::new(),
            failures: Vec::new(),
            resolution: None,
        })
    }

    pub fn missing_files(&self) -> usize {
        self.missing_primary_count + self.missing_secondary_count
    }

    pub fn has_issues(&self) -> bool {
        self.status == ManifestStatus::Issues
    }
}

/// Provenance block recorded in every filtered manifest.
pub fn provenance(report: &ManifestReport) -> Value {
    json!({
        "original_sample_count": report.original_count,
        "filtered_sample_count": report.valid_count,
        "missing_files": report.missing_files(),
        "missing_primary_count": report.missing_primary_count,
        "missing_secondary_count": report.missing_secondary_count,
        "validation_date": report.validation_date,
        "validation_tool": VALIDATION_TOOL,
    })
}

/// Result of validating one manifest.
#[derive(Debug, Clone)]
pub struct Validation {
    /// Present only when at least one pair is valid.
    pub filtered: Option<Map<String, Value>>,
    pub report: ManifestReport,
}

pub struct ManifestValidator {
    store: Arc<dyn ObjectStore>,
    policy: RetryPolicy,
    workers: usize,
    batch_timeout: Option<Duration>,
    scope: Option<String>,
}

impl ManifestValidator {
    pub fn new(store: Arc<dyn ObjectStore>, config: &ValidatorConfig) -> Self {
        Self {
            store,
            policy: RetryPolicy::new(config.retry),
            workers: config.workers.max(1),
            batch_timeout: config.batch_timeout,
            scope: config.scope.clone(),
        }
    }

    /// Replace the retry policy (tests inject a fake clock here).
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn validate(
        &self,
        manifest: &Manifest,
        index: Option<Arc<ExistenceIndex>>,
        validated_at: DateTime<Utc>,
    ) -> Validation {
        let resolver = TieredResolver::new(
            self.store.clone(),
            index,
            self.scope.clone(),
            self.policy.clone(),
            self.workers,
            self.batch_timeout,
        );
        info!(
            manifest = %manifest.name,
            pairs = manifest.pairs.len(),
            workers = self.workers,
            "validating manifest"
        );

        // Each distinct object is resolved once, however many pairs share it.
        let verdicts = resolver.resolve_all(&manifest.object_refs()).await;
        let verdict = |object: &ObjectRef| verdicts.get(object).copied().unwrap_or(Existence::Unknown);
        let outcomes: Vec<ValidationOutcome> = manifest
            .pairs
            .iter()
            .map(|pair| ValidationOutcome {
                pair: pair.clone(),
                primary: verdict(&pair.primary),
                secondary: verdict(&pair.secondary),
            })
            .collect();

        let stats = resolver.metrics().snapshot();
        debug!(manifest = %manifest.name, ?stats, "resolution finished");
        let report = ManifestReport::from_outcomes(&manifest.name, &outcomes, Some(stats), validated_at);

        let filtered = if report.valid_count > 0 {
            let mut doc = manifest.document_with_pairs(
                outcomes.iter().filter(|o| o.is_valid()).map(|o| &o.pair),
            );
            doc.insert(VALIDATION_METADATA_KEY.to_string(), provenance(&report));
            Some(doc)
        } else {
            None
        };

        info!(
            manifest = %manifest.name,
            valid = report.valid_count,
            original = report.original_count,
            missing_primary = report.missing_primary_count,
            missing_secondary = report.missing_secondary_count,
            unknown = report.unknown_count,
            status = %report.status,
            "manifest validated"
        );
        Validation { filtered, report }
    }
}

/// Manifest name: the file stem.
pub fn manifest_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Read and pair a manifest file.
pub fn read_manifest(path: &Path, keys: &ManifestKeys, mode: PairingMode) -> Result<Manifest> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
    let doc = ManifestDocument::from_value(manifest_name(path), value, keys.clone())
        .with_context(|| path.display().to_string())?;
    let (np, ns) = (doc.primary.len(), doc.secondary.len());
    let manifest = doc.into_manifest(mode)?;
    if np != ns {
        warn!(
            manifest = %manifest.name,
            primary = np,
            secondary = ns,
            dropped = np.max(ns) - np.min(ns),
            "count mismatch, truncating to shorter list"
        );
    }
    Ok(manifest)
}

/// Prior result for a manifest whose validated output already exists.
///
/// Requires the output file to carry a provenance block. A prior per-manifest
/// report is reused whole; otherwise counts come from the provenance block.
pub fn prior_result(manifest: &str, output_path: &Path, report_path: &Path) -> Option<ManifestReport> {
    let text = std::fs::read_to_string(output_path).ok()?;
    let doc: Value = serde_json::from_str(&text).ok()?;
    let metadata = doc.get(VALIDATION_METADATA_KEY)?.as_object()?;

    let prior_report = std::fs::read_to_string(report_path)
        .ok()
        .and_then(|t| serde_json::from_str::<ManifestReport>(&t).ok())
        .filter(|r| r.manifest == manifest);
    match prior_report {
        Some(mut report) => {
            report.status = ManifestStatus::Skipped;
            Some(report)
        }
        None => ManifestReport::from_provenance(manifest, metadata),
    }
}
