//! Resolved run configuration.
//!
//! The CLI builds a [`ValidatorConfig`] from flags and environment; the
//! library only ever sees this value.

use chrono::{DateTime, Utc};
use pairguard_types::{ManifestKeys, PairingMode, RetryConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Recorded in every provenance block and report.
pub const VALIDATION_TOOL: &str = concat!("pairguard ", env!("CARGO_PKG_VERSION"));

pub const DEFAULT_WORKERS: usize = 32;
pub const DEFAULT_MANIFEST_WORKERS: usize = 1;
/// Bulk queries and listings cover whole folders, so they get a longer bound
/// than a single point query.
pub const DEFAULT_BULK_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Directory of input manifests (`*.json`).
    pub input_dir: PathBuf,
    /// Filtered manifests land here under their input file name.
    pub output_dir: PathBuf,
    /// Per-manifest and overall reports.
    pub report_dir: PathBuf,
    /// Per-object worker pool size inside one manifest.
    pub workers: usize,
    /// Manifests validated concurrently.
    pub manifest_workers: usize,
    pub retry: RetryConfig,
    /// Bound for bulk queries; `None` disables the bulk-query tier.
    pub batch_timeout: Option<Duration>,
    /// Bound for each prefix listing during an index build.
    pub list_timeout: Duration,
    /// Billing / project identifier passed to the store.
    pub scope: Option<String>,
    pub skip_existing: bool,
    pub pairing: PairingMode,
    pub keys: ManifestKeys,
    /// Fixed validation timestamp; `None` stamps the run with the current time.
    pub validated_at: Option<DateTime<Utc>>,
}

impl ValidatorConfig {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>, report_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            report_dir: report_dir.into(),
            workers: DEFAULT_WORKERS,
            manifest_workers: DEFAULT_MANIFEST_WORKERS,
            retry: RetryConfig::default(),
            batch_timeout: Some(Duration::from_secs(DEFAULT_BULK_TIMEOUT_SECS)),
            list_timeout: Duration::from_secs(DEFAULT_BULK_TIMEOUT_SECS),
            scope: None,
            skip_existing: false,
            pairing: PairingMode::Strict,
            keys: ManifestKeys::default(),
            validated_at: None,
        }
    }

    /// Filtered-manifest path for the input file `file_name`.
    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.output_dir.join(file_name)
    }

    /// Per-manifest JSON report, also read back when skipping.
    pub fn report_path(&self, manifest: &str) -> PathBuf {
        self.report_dir.join(format!("{}_validation_report.json", manifest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_paths() {
        let config = ValidatorConfig::new("in", "out", "reports");
        assert_eq!(config.workers, 32);
        assert_eq!(config.manifest_workers, 1);
        assert_eq!(config.retry.retries, 3);
        assert_eq!(config.retry.attempt_timeout, Duration::from_secs(20));
        assert_eq!(config.pairing, PairingMode::Strict);
        assert_eq!(config.output_path("liver_12.json"), PathBuf::from("out/liver_12.json"));
        assert_eq!(
            config.report_path("liver_12"),
            PathBuf::from("reports/liver_12_validation_report.json")
        );
        assert!(VALIDATION_TOOL.starts_with("pairguard "));
    }
}
