//! End-to-end runs over a temp workspace and an in-memory store.

mod common;

use common::{fast_policy, gs, pair_refs, Workspace};
use pairguard::{IndexOptions, IndexSource, ManifestStatus, Orchestrator, Selection, ValidatorConfig};
use pairguard_transport::{MemoryStore, ObjectStore};
use pairguard_types::PairingMode;
use serde_json::{json, Value};
use std::sync::Arc;

/// Three manifests: `alpha` fully present, `beta` with one broken pair,
/// `gamma` with nothing present.
fn seed(ws: &Workspace) -> Arc<MemoryStore> {
    let (ap, asec) = pair_refs("alpha", &["A1", "A2"]);
    let (bp, bs) = pair_refs("beta", &["B1", "B2", "B3"]);
    let (gp, gs_) = pair_refs("gamma", &["G1"]);
    ws.write_manifest("alpha", &ap, &asec);
    ws.write_manifest("beta", &bp, &bs);
    ws.write_manifest("gamma", &gp, &gs_);

    Arc::new(MemoryStore::with_objects(
        ap.iter()
            .chain(&asec)
            .chain(&bp[..2])
            .chain(&bs)
            .cloned(),
    ))
}

fn orchestrator(store: &Arc<MemoryStore>, config: ValidatorConfig) -> Orchestrator {
    Orchestrator::new(store.clone(), config).with_policy(fast_policy(1))
}

fn read_json(path: &std::path::Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_run_all_writes_outputs_and_summary() {
    pairguard::logging::init_test_logging();
    let ws = Workspace::new();
    let store = seed(&ws);
    let orch = orchestrator(&store, ws.config());

    let outcome = orch.run(&Selection::All, IndexSource::Disabled).await.unwrap();
    let written = orch.write_summary(&outcome).unwrap();
    assert_eq!(written.len(), 4);

    let names: Vec<&str> = outcome.reports.iter().map(|r| r.manifest.as_str()).collect();
    assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    let s = &outcome.summary;
    assert_eq!(s.total_manifests_processed, 3);
    assert_eq!(s.total_samples_original, 6);
    assert_eq!(s.total_samples_valid, 4);
    assert_eq!(s.total_primary_missing, 2);
    assert_eq!(s.total_secondary_missing, 1);
    assert_eq!(s.manifests_with_issues, vec!["beta", "gamma"]);
    assert!((s.success_rate_overall - 4.0 / 6.0).abs() < 1e-9);

    let beta = ws.read_output("beta").expect("beta has valid pairs");
    assert_eq!(beta["SplicingAnalysis.bam_files"], json!([gs("beta", "B1.bam"), gs("beta", "B2.bam")]));
    assert_eq!(beta["SplicingAnalysis.threads"], 4);
    assert_eq!(beta["_validation_metadata"]["original_sample_count"], 3);
    assert!(ws.read_output("gamma").is_none());

    let summary = read_json(&ws.report_dir().join("validation_summary.json"));
    assert_eq!(summary["total_samples_valid"], 4);
    assert_eq!(summary["manifests_processed"], json!(["alpha", "beta", "gamma"]));

    let report = read_json(&ws.report_dir().join("beta_validation_report.json"));
    assert_eq!(report["status"], "ISSUES");
    assert_eq!(report["missing_primary"], json!([gs("beta", "B3.bam")]));
    let gamma_text = std::fs::read_to_string(ws.report_dir().join("gamma_summary.txt")).unwrap();
    assert!(gamma_text.contains("G1: PRIMARY,SECONDARY"));
    assert!(gamma_text.contains("Point queries:"));

    let csv = std::fs::read_to_string(ws.report_dir().join("validation_summary.csv")).unwrap();
    assert_eq!(csv.lines().count(), 4);
    assert!(csv.lines().any(|l| l.starts_with("alpha,OK,")));

    let detail = std::fs::read_to_string(ws.report_dir().join("missing_files_detailed.txt")).unwrap();
    assert!(detail.contains(&gs("beta", "B3.bam")));
    assert!(detail.contains(&gs("gamma", "G1.bam.bai")));
}

#[tokio::test]
async fn test_count_mismatch_is_rejected_in_strict_mode() {
    let ws = Workspace::new();
    let store = seed(&ws);
    let (p, s) = pair_refs("alpha", &["A1", "A2"]);
    ws.write_manifest("lopsided", &p, &s[..1]);

    let outcome = orchestrator(&store, ws.config())
        .run(&Selection::Named("lopsided".into()), IndexSource::Disabled)
        .await
        .unwrap();
    let r = &outcome.reports[0];
    assert_eq!(r.status, ManifestStatus::Rejected);
    assert!(r.rejection_reason.as_deref().unwrap().contains("2 primary vs 1 secondary"));
    assert!(ws.read_output("lopsided").is_none());
    assert_eq!(outcome.summary.manifests_rejected, vec!["lopsided"]);
    assert_eq!(outcome.summary.total_manifests_processed, 0);
    assert_eq!(store.calls().total(), 0);
    assert!(ws.report_dir().join("lopsided_validation_report.json").exists());
}

#[tokio::test]
async fn test_truncate_mode_pairs_the_common_prefix() {
    let ws = Workspace::new();
    let store = seed(&ws);
    let (p, s) = pair_refs("alpha", &["A1", "A2"]);
    ws.write_manifest("lopsided", &p, &s[..1]);

    let mut config = ws.config();
    config.pairing = PairingMode::Truncate;
    let outcome = orchestrator(&store, config)
        .run(&Selection::Named("lopsided.json".into()), IndexSource::Disabled)
        .await
        .unwrap();
    let r = &outcome.reports[0];
    assert_eq!(r.status, ManifestStatus::Ok);
    assert_eq!(r.original_count, 1);
    let out = ws.read_output("lopsided").unwrap();
    assert_eq!(out["SplicingAnalysis.bam_files"], json!([p[0].clone()]));
}

#[tokio::test]
async fn test_invalid_document_is_rejected_and_others_continue() {
    let ws = Workspace::new();
    let store = seed(&ws);
    ws.write_raw("broken", &json!({"SplicingAnalysis.bam_files": [1, 2]}));
    std::fs::write(ws.input_dir().join("garbage.json"), "{ not json").unwrap();

    let outcome = orchestrator(&store, ws.config())
        .run(&Selection::All, IndexSource::Disabled)
        .await
        .unwrap();
    assert_eq!(outcome.summary.manifests_rejected, vec!["broken", "garbage"]);
    assert_eq!(outcome.summary.total_manifests_processed, 3);
}

#[tokio::test]
async fn test_missing_named_manifest_is_an_error() {
    let ws = Workspace::new();
    let store = seed(&ws);
    let err = orchestrator(&store, ws.config())
        .run(&Selection::Named("nope".into()), IndexSource::Disabled)
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("not found"));
}

#[tokio::test]
async fn test_rerun_produces_identical_output() {
    let ws = Workspace::new();
    let store = seed(&ws);
    let orch = orchestrator(&store, ws.config());

    orch.run(&Selection::All, IndexSource::Disabled).await.unwrap();
    let first = ws.output_bytes("beta").unwrap();
    let first_report = std::fs::read(ws.report_dir().join("beta_validation_report.json")).unwrap();

    orch.run(&Selection::All, IndexSource::Disabled).await.unwrap();
    assert_eq!(ws.output_bytes("beta").unwrap(), first);
    let second_report = std::fs::read(ws.report_dir().join("beta_validation_report.json")).unwrap();
    let strip = |bytes: &[u8]| {
        let mut v: Value = serde_json::from_slice(bytes).unwrap();
        v.as_object_mut().unwrap().remove("resolution");
        v
    };
    assert_eq!(strip(&first_report), strip(&second_report));
}

#[tokio::test]
async fn test_skip_existing_reuses_prior_results_without_queries() {
    let ws = Workspace::new();
    let store = seed(&ws);
    let first = orchestrator(&store, ws.config())
        .run(&Selection::All, IndexSource::Disabled)
        .await
        .unwrap();

    store.reset_calls();
    let mut config = ws.config();
    config.skip_existing = true;
    let second = orchestrator(&store, config)
        .run(&Selection::All, IndexSource::Disabled)
        .await
        .unwrap();

    // gamma produced no output, so it is validated again.
    assert_eq!(second.summary.manifests_skipped, vec!["alpha", "beta"]);
    let beta = second.reports.iter().find(|r| r.manifest == "beta").unwrap();
    assert_eq!(beta.status, ManifestStatus::Skipped);
    assert_eq!(beta.valid_count, first.reports[1].valid_count);
    assert_eq!(beta.original_count, 3);
    assert_eq!(second.summary.total_samples_valid, first.summary.total_samples_valid);
    assert!(store.stat_log().iter().all(|r| r.as_str().contains("/gamma/")));
}

#[tokio::test]
async fn test_skip_existing_falls_back_to_output_provenance() {
    let ws = Workspace::new();
    let store = seed(&ws);
    orchestrator(&store, ws.config())
        .run(&Selection::Named("beta".into()), IndexSource::Disabled)
        .await
        .unwrap();
    std::fs::remove_file(ws.report_dir().join("beta_validation_report.json")).unwrap();

    store.reset_calls();
    let mut config = ws.config();
    config.skip_existing = true;
    let outcome = orchestrator(&store, config)
        .run(&Selection::Named("beta".into()), IndexSource::Disabled)
        .await
        .unwrap();
    let r = &outcome.reports[0];
    assert_eq!(r.status, ManifestStatus::Skipped);
    assert_eq!((r.original_count, r.valid_count), (3, 2));
    assert_eq!(r.missing_primary_count, 1);
    assert_eq!(store.calls().total(), 0);
}

#[tokio::test]
async fn test_zero_valid_pairs_removes_stale_output() {
    let ws = Workspace::new();
    let store = seed(&ws);
    let orch = orchestrator(&store, ws.config());
    orch.run(&Selection::Named("alpha".into()), IndexSource::Disabled).await.unwrap();
    assert!(ws.read_output("alpha").is_some());

    for r in pair_refs("alpha", &["A1", "A2"]).0 {
        store.remove(&r.as_str().into());
    }
    let outcome = orch.run(&Selection::Named("alpha".into()), IndexSource::Disabled).await.unwrap();
    assert_eq!(outcome.reports[0].valid_count, 0);
    assert!(ws.read_output("alpha").is_none());
}

fn index_options(ws: &Workspace, store: &Arc<MemoryStore>, refresh: bool) -> IndexOptions {
    IndexOptions {
        path: ws.path().join("cache").join("index.json.gz"),
        refresh,
        prefixes: Vec::new(),
        sources: vec![store.clone() as Arc<dyn ObjectStore>],
    }
}

#[tokio::test]
async fn test_parallel_manifests_with_cached_index() {
    pairguard::logging::init_test_logging();
    let ws = Workspace::new();
    let store = seed(&ws);
    let mut config = ws.config();
    config.manifest_workers = 3;
    let options = index_options(&ws, &store, false);

    let orch = orchestrator(&store, config.clone());
    let outcome = orch.run(&Selection::All, IndexSource::Lazy(options.clone())).await.unwrap();
    assert_eq!(outcome.summary.total_samples_valid, 4);
    assert!(options.path.exists());
    // One listing per inferred prefix.
    assert_eq!(store.calls().list, 3);
    // Only objects missing from the index get point queries.
    let mut queried: Vec<String> = store.stat_log().iter().map(|r| r.to_string()).collect();
    queried.sort();
    assert_eq!(
        queried,
        vec![gs("beta", "B3.bam"), gs("gamma", "G1.bam"), gs("gamma", "G1.bam.bai")]
    );
    // The freshly built index seeds one worker; the others read the cache.
    assert!(orch.index_loads() <= 2);

    // A second run reads the cache without listing, at most once per worker.
    store.reset_calls();
    let orch = orchestrator(&store, config);
    let again = orch.run(&Selection::All, IndexSource::Lazy(options)).await.unwrap();
    assert_eq!(again.summary.total_samples_valid, 4);
    assert_eq!(store.calls().list, 0);
    assert!((1..=3).contains(&orch.index_loads()));
}

#[tokio::test]
async fn test_single_worker_loads_the_cache_once() {
    let ws = Workspace::new();
    let store = seed(&ws);
    let options = index_options(&ws, &store, false);
    orchestrator(&store, ws.config())
        .run(&Selection::All, IndexSource::Lazy(options.clone()))
        .await
        .unwrap();

    store.reset_calls();
    let orch = orchestrator(&store, ws.config());
    assert_eq!(orch.config().manifest_workers, 1);
    let outcome = orch.run(&Selection::All, IndexSource::Lazy(options)).await.unwrap();
    assert_eq!(outcome.summary.total_samples_valid, 4);
    assert_eq!(orch.index_loads(), 1);
    assert_eq!(store.calls().list, 0);
    assert_eq!(store.calls().stat, 3);
}

#[tokio::test]
async fn test_failed_listing_disables_the_index() {
    let ws = Workspace::new();
    let store = seed(&ws);
    store.set_fail_listing(true);
    let options = index_options(&ws, &store, true);
    let orch = orchestrator(&store, ws.config());

    let outcome = orch.run(&Selection::All, IndexSource::Lazy(options.clone())).await.unwrap();
    assert_eq!(outcome.summary.total_samples_valid, 4);
    assert!(!options.path.exists());
    assert_eq!(orch.index_loads(), 0);
}

#[tokio::test]
async fn test_all_skipped_run_never_touches_the_store() {
    let ws = Workspace::new();
    let store = seed(&ws);
    // Every remaining manifest has valid pairs, so each leaves an output.
    std::fs::remove_file(ws.input_dir().join("gamma.json")).unwrap();
    store.set_fail_listing(true);
    let options = index_options(&ws, &store, true);
    orchestrator(&store, ws.config())
        .run(&Selection::All, IndexSource::Lazy(options.clone()))
        .await
        .unwrap();

    store.reset_calls();
    let mut config = ws.config();
    config.skip_existing = true;
    let orch = orchestrator(&store, config);
    let outcome = orch.run(&Selection::All, IndexSource::Lazy(options.clone())).await.unwrap();
    assert_eq!(outcome.summary.manifests_skipped, vec!["alpha", "beta"]);
    assert!(outcome.reports.iter().all(|r| r.status == ManifestStatus::Skipped));
    assert_eq!(store.calls().total(), 0);
    assert_eq!(orch.index_loads(), 0);
    assert!(!options.path.exists());
}
