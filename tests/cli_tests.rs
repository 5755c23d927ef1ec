use assert_cmd::Command;
use pairguard_index::ExistenceIndex;
use pairguard_types::ObjectRef;
use predicates::prelude::*;
use std::collections::BTreeSet;
use tempfile::TempDir;

fn pairguard() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("pairguard").unwrap();
    cmd.env_remove("PAIRGUARD_GCS_TOKEN")
        .env_remove("PAIRGUARD_GCS_ENDPOINT")
        .env_remove("PAIRGUARD_BILLING_PROJECT")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    pairguard()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("validate-all"))
        .stdout(predicate::str::contains("index"));
}

#[test]
fn test_unknown_subcommand_fails() {
    pairguard().arg("frobnicate").assert().failure();
}

#[test]
fn test_zero_workers_rejected() {
    pairguard()
        .args(["--workers", "0", "validate-all"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("workers"));
}

#[test]
fn test_missing_gsutil_is_a_startup_error() {
    let dir = TempDir::new().unwrap();
    pairguard()
        .current_dir(dir.path())
        .args(["validate-all", "--gsutil-binary", "/nonexistent/gsutil-for-tests"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unavailable"));
    // Nothing is written when the store is unusable.
    assert!(!dir.path().join("validation_reports").exists());
}

#[test]
fn test_json_backend_requires_token() {
    let dir = TempDir::new().unwrap();
    pairguard()
        .current_dir(dir.path())
        .args(["validate-all", "--backend", "gcs-json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("PAIRGUARD_GCS_TOKEN"));
}

#[test]
fn test_index_show_without_cache() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing.json.gz");
    pairguard()
        .args(["index", "show", "--index-cache"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("no index cache"));
}

#[test]
fn test_index_show_describes_saved_cache() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("idx.json.gz");
    let index = ExistenceIndex::new(
        [ObjectRef::from("gs://bkt/t/A.bam"), ObjectRef::from("gs://bkt/t/A.bam.bai")],
        BTreeSet::from(["gs://bkt/t/".to_string()]),
        Some("proj".to_string()),
    );
    index.save(&path).unwrap();

    pairguard()
        .args(["index", "show", "--index-cache"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("objects:    2"))
        .stdout(predicate::str::contains("gs://bkt/t/"))
        .stdout(predicate::str::contains("proj"));
}

#[test]
fn test_index_rebuild_checks_the_listing_backend() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("idx.json.gz");

    // Without a token gsutil lists, so a missing binary stops the rebuild.
    pairguard()
        .args(["index", "rebuild", "--prefix", "gs://bkt/t/", "--gsutil-binary", "/nonexistent/gsutil-for-tests"])
        .arg("--index-cache")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("'gsutil' is unavailable"));
    assert!(!path.exists());

    // With a token the JSON API lists first; gsutil is only a fallback.
    pairguard()
        .env("PAIRGUARD_GCS_TOKEN", "test-token")
        .env("PAIRGUARD_GCS_ENDPOINT", "http://127.0.0.1:1")
        .args(["index", "rebuild", "--prefix", "gs://bkt/t/", "--gsutil-binary", "/nonexistent/gsutil-for-tests"])
        .arg("--index-cache")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Index rebuilt: 0 objects"));
    assert!(path.exists());
}
