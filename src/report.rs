//! Report aggregation and rendering.
//!
//! [`OverallSummary`] is folded from per-manifest reports and serialized as
//! `validation_summary.json`, the source of truth. The CSV and text files are
//! projections of the same data.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pairguard_index::{atomic_write, atomic_write_json};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::validator::{success_rate, ManifestReport, ManifestStatus};

/// Failing samples listed per manifest in its text summary.
const TEXT_FAILURE_LIMIT: usize = 50;
/// Manifests with issues listed in the console summary.
const CONSOLE_ISSUE_LIMIT: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverallSummary {
    /// Manifests with a validated or reused result (rejections excluded).
    pub total_manifests_processed: usize,
    pub total_samples_original: usize,
    pub total_samples_valid: usize,
    pub total_primary_missing: usize,
    pub total_secondary_missing: usize,
    pub total_unknown: usize,
    pub success_rate_overall: f64,
    pub validation_date: Option<DateTime<Utc>>,
    pub manifests_processed: Vec<String>,
    pub manifests_with_issues: Vec<String>,
    pub manifests_skipped: Vec<String>,
    pub manifests_rejected: Vec<String>,
}

impl OverallSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fold(&mut self, report: &ManifestReport) {
        if report.status == ManifestStatus::Rejected {
            self.manifests_rejected.push(report.manifest.clone());
            return;
        }
        self.total_manifests_processed += 1;
        self.total_samples_original += report.original_count;
        self.total_samples_valid += report.valid_count;
        self.total_primary_missing += report.missing_primary_count;
        self.total_secondary_missing += report.missing_secondary_count;
        self.total_unknown += report.unknown_count;
        self.manifests_processed.push(report.manifest.clone());
        match report.status {
            ManifestStatus::Issues => self.manifests_with_issues.push(report.manifest.clone()),
            ManifestStatus::Skipped => self.manifests_skipped.push(report.manifest.clone()),
            _ => {}
        }
    }

    /// Compute the overall rate and stamp the run. Name lists are sorted so
    /// the result does not depend on completion order.
    pub fn finalize(mut self, at: DateTime<Utc>) -> Self {
        self.success_rate_overall = success_rate(self.total_samples_valid, self.total_samples_original);
        self.validation_date = Some(at);
        self.manifests_processed.sort();
        self.manifests_with_issues.sort();
        self.manifests_skipped.sort();
        self.manifests_rejected.sort();
        self
    }

    pub fn total_missing_files(&self) -> usize {
        self.total_primary_missing + self.total_secondary_missing
    }
}

fn percent(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

#[derive(Serialize)]
struct CsvRow<'a> {
    manifest: &'a str,
    status: &'a str,
    severity: &'a str,
    original_count: usize,
    valid_count: usize,
    missing_primary_count: usize,
    missing_secondary_count: usize,
    unknown_count: usize,
    success_rate: String,
}

/// One row per manifest, in the order given.
pub fn render_csv(reports: &[ManifestReport]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for r in reports {
        writer
            .serialize(CsvRow {
                manifest: &r.manifest,
                status: r.status.as_str(),
                severity: r.severity.as_str(),
                original_count: r.original_count,
                valid_count: r.valid_count,
                missing_primary_count: r.missing_primary_count,
                missing_secondary_count: r.missing_secondary_count,
                unknown_count: r.unknown_count,
                success_rate: format!("{:.4}", r.success_rate),
            })
            .context("write csv row")?;
    }
    let bytes = writer.into_inner().context("flush csv")?;
    String::from_utf8(bytes).context("csv output is not utf-8")
}

/// Overall text summary; manifests sorted by ascending success rate.
pub fn render_text(summary: &OverallSummary, reports: &[ManifestReport]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Paired Object Validation Summary");
    let _ = writeln!(out, "{}", "=".repeat(50));
    let _ = writeln!(out);
    if let Some(at) = summary.validation_date {
        let _ = writeln!(out, "Validation Date: {}", at.to_rfc3339());
    }
    let _ = writeln!(out, "Total Manifests Processed: {}", summary.total_manifests_processed);
    let _ = writeln!(out, "Total Original Samples: {}", summary.total_samples_original);
    let _ = writeln!(out, "Total Valid Samples: {}", summary.total_samples_valid);
    let _ = writeln!(out, "Overall Success Rate: {}", percent(summary.success_rate_overall));
    let _ = writeln!(out, "Total Missing Primary Files: {}", summary.total_primary_missing);
    let _ = writeln!(out, "Total Missing Secondary Files: {}", summary.total_secondary_missing);
    if summary.total_unknown > 0 {
        let _ = writeln!(out, "Undetermined (retries exhausted): {}", summary.total_unknown);
    }
    let _ = writeln!(out, "Manifests with Issues: {}", summary.manifests_with_issues.len());
    if !summary.manifests_rejected.is_empty() {
        let _ = writeln!(out, "Manifests Rejected: {}", summary.manifests_rejected.len());
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Manifests by Success Rate:");
    let _ = writeln!(out, "{}", "-".repeat(30));
    let mut sorted: Vec<&ManifestReport> = reports
        .iter()
        .filter(|r| r.status != ManifestStatus::Rejected)
        .collect();
    sorted.sort_by(|a, b| {
        a.success_rate
            .total_cmp(&b.success_rate)
            .then_with(|| a.manifest.cmp(&b.manifest))
    });
    for r in sorted {
        let marker = if r.status == ManifestStatus::Issues { "!!" } else { "ok" };
        let _ = writeln!(
            out,
            "[{}] {}: {} ({}/{} samples) {}",
            marker,
            r.manifest,
            percent(r.success_rate),
            r.valid_count,
            r.original_count,
            r.status
        );
    }

    let issues: Vec<&ManifestReport> = reports.iter().filter(|r| r.has_issues()).collect();
    if !issues.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Manifests with Missing Files:");
        let _ = writeln!(out, "{}", "-".repeat(30));
        for r in issues {
            let _ = writeln!(
                out,
                "- {}: {} primary + {} secondary missing [{}]",
                r.manifest, r.missing_primary_count, r.missing_secondary_count, r.severity
            );
        }
    }

    let rejected: Vec<&ManifestReport> = reports
        .iter()
        .filter(|r| r.status == ManifestStatus::Rejected)
        .collect();
    if !rejected.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Rejected Manifests:");
        let _ = writeln!(out, "{}", "-".repeat(30));
        for r in rejected {
            let _ = writeln!(
                out,
                "- {}: {}",
                r.manifest,
                r.rejection_reason.as_deref().unwrap_or("rejected")
            );
        }
    }
    out
}

/// Every missing object path, keyed by sample, per manifest with issues.
/// Objects that were never answered are marked `(?)`.
pub fn render_missing_detail(reports: &[ManifestReport]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Detailed Missing Files Report");
    let _ = writeln!(out, "{}", "=".repeat(50));
    for r in reports.iter().filter(|r| r.has_issues()) {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", r.manifest.to_uppercase());
        let _ = writeln!(out, "{}", "-".repeat(r.manifest.len()));
        let _ = writeln!(out, "Missing primary files ({}):", r.missing_primary_count);
        for f in r.failures.iter().filter(|f| f.primary_missing) {
            let _ = writeln!(out, "  {}: {}{}", f.sample_id, f.primary, unknown_marker(f.primary_unknown));
        }
        if r.missing_secondary_count > 0 {
            let _ = writeln!(out, "Missing secondary files ({}):", r.missing_secondary_count);
            for f in r.failures.iter().filter(|f| f.secondary_missing) {
                let _ = writeln!(out, "  {}: {}{}", f.sample_id, f.secondary, unknown_marker(f.secondary_unknown));
            }
        }
    }
    out
}

fn unknown_marker(unknown: bool) -> &'static str {
    if unknown {
        " (?)"
    } else {
        ""
    }
}

/// Short text summary for one manifest.
pub fn render_manifest_text(report: &ManifestReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Validation Summary: {}", report.manifest);
    let _ = writeln!(out, "{}", "=".repeat(40));
    let _ = writeln!(out);
    let _ = writeln!(out, "Status: {}", report.status);
    if let Some(reason) = &report.rejection_reason {
        let _ = writeln!(out, "Reason: {}", reason);
    }
    let _ = writeln!(out, "Original Samples: {}", report.original_count);
    let _ = writeln!(out, "Valid Samples: {}", report.valid_count);
    let _ = writeln!(out, "Missing Primary: {}", report.missing_primary_count);
    let _ = writeln!(out, "Missing Secondary: {}", report.missing_secondary_count);
    if report.unknown_count > 0 {
        let _ = writeln!(out, "Undetermined: {}", report.unknown_count);
    }
    let _ = writeln!(out, "Success Rate: {}", percent(report.success_rate));
    let _ = writeln!(out, "Severity: {}", report.severity);
    if let Some(stats) = &report.resolution {
        let _ = writeln!(out);
        let _ = writeln!(out, "Resolution:");
        let _ = writeln!(out, "{}", stats.format_report());
    }
    if !report.failures.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Missing Samples (first {}):", TEXT_FAILURE_LIMIT);
        for f in report.failures.iter().take(TEXT_FAILURE_LIMIT) {
            let mut flags = Vec::new();
            if f.primary_missing {
                flags.push(if f.primary_unknown { "PRIMARY?" } else { "PRIMARY" });
            }
            if f.secondary_missing {
                flags.push(if f.secondary_unknown { "SECONDARY?" } else { "SECONDARY" });
            }
            let _ = writeln!(out, "  - {}: {}", f.sample_id, flags.join(","));
        }
    }
    out
}

/// End-of-run summary printed to stdout.
pub fn render_console(summary: &OverallSummary, reports: &[ManifestReport]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Validation complete");
    let _ = writeln!(
        out,
        "{}/{} samples valid ({})",
        summary.total_samples_valid,
        summary.total_samples_original,
        percent(summary.success_rate_overall)
    );
    let _ = writeln!(out, "{} files missing", summary.total_missing_files());
    let _ = writeln!(out, "{} manifests have missing files", summary.manifests_with_issues.len());
    if !summary.manifests_skipped.is_empty() {
        let _ = writeln!(out, "{} manifests skipped (already validated)", summary.manifests_skipped.len());
    }
    if !summary.manifests_rejected.is_empty() {
        let _ = writeln!(out, "{} manifests rejected", summary.manifests_rejected.len());
    }
    if !summary.manifests_with_issues.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Manifests with issues:");
        for name in summary.manifests_with_issues.iter().take(CONSOLE_ISSUE_LIMIT) {
            let missing = reports
                .iter()
                .find(|r| &r.manifest == name)
                .map(ManifestReport::missing_files)
                .unwrap_or(0);
            let _ = writeln!(out, "  - {}: {} missing files", name, missing);
        }
        if summary.manifests_with_issues.len() > CONSOLE_ISSUE_LIMIT {
            let _ = writeln!(
                out,
                "  ... and {} more",
                summary.manifests_with_issues.len() - CONSOLE_ISSUE_LIMIT
            );
        }
    }
    out
}

/// Write `<name>_validation_report.json` and `<name>_summary.txt`.
pub fn write_manifest_reports(report_dir: &Path, report: &ManifestReport) -> Result<()> {
    atomic_write_json(
        &report_dir.join(format!("{}_validation_report.json", report.manifest)),
        report,
    )?;
    atomic_write(
        &report_dir.join(format!("{}_summary.txt", report.manifest)),
        render_manifest_text(report).as_bytes(),
    )
}

/// Write the overall summary in all renderings. Returns the files written.
pub fn write_summary(report_dir: &Path, summary: &OverallSummary, reports: &[ManifestReport]) -> Result<Vec<PathBuf>> {
    let json_path = report_dir.join("validation_summary.json");
    let csv_path = report_dir.join("validation_summary.csv");
    let text_path = report_dir.join("validation_summary.txt");
    let detail_path = report_dir.join("missing_files_detailed.txt");

    atomic_write_json(&json_path, summary)?;
    atomic_write(&csv_path, render_csv(reports)?.as_bytes())?;
    atomic_write(&text_path, render_text(summary, reports).as_bytes())?;
    atomic_write(&detail_path, render_missing_detail(reports).as_bytes())?;
    info!(dir = %report_dir.display(), "wrote summary reports");
    Ok(vec![json_path, csv_path, text_path, detail_path])
}
