//! Workspace and manifest fixtures.

use chrono::{DateTime, Utc};
use pairguard::ValidatorConfig;
use pairguard_resolver::RetryPolicy;
use pairguard_types::{ObjectRef, RetryConfig, DEFAULT_PRIMARY_KEY, DEFAULT_SECONDARY_KEY};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub fn fixed_time() -> DateTime<Utc> {
    "2026-03-01T12:00:00Z".parse().unwrap()
}

/// `gs://bkt/<dir>/<sample>.bam` style reference.
pub fn gs(dir: &str, file: &str) -> String {
    format!("gs://bkt/{}/{}", dir, file)
}

/// Primary and secondary references for `samples` under `dir`.
pub fn pair_refs(dir: &str, samples: &[&str]) -> (Vec<String>, Vec<String>) {
    samples
        .iter()
        .map(|s| (gs(dir, &format!("{}.bam", s)), gs(dir, &format!("{}.bam.bai", s))))
        .unzip()
}

/// No-wait retry policy with a short per-attempt timeout.
pub fn fast_policy(retries: usize) -> RetryPolicy {
    RetryPolicy::new(RetryConfig::new(retries, 0, 0, 2))
}

/// Temp directory with `inputs/`, `validated/` and `reports/`.
pub struct Workspace {
    pub root: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("inputs")).unwrap();
        Self { root }
    }

    pub fn input_dir(&self) -> PathBuf {
        self.root.path().join("inputs")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.path().join("validated")
    }

    pub fn report_dir(&self) -> PathBuf {
        self.root.path().join("reports")
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Config with a fixed timestamp and small pools.
    pub fn config(&self) -> ValidatorConfig {
        let mut config = ValidatorConfig::new(self.input_dir(), self.output_dir(), self.report_dir());
        config.workers = 4;
        config.validated_at = Some(fixed_time());
        config
    }

    /// Write `inputs/<name>.json` with the default keys plus passthrough.
    pub fn write_manifest(&self, name: &str, primary: &[String], secondary: &[String]) -> PathBuf {
        let mut doc = Map::new();
        doc.insert("SplicingAnalysis.species".into(), json!("human"));
        doc.insert(DEFAULT_PRIMARY_KEY.into(), json!(primary));
        doc.insert(DEFAULT_SECONDARY_KEY.into(), json!(secondary));
        doc.insert("SplicingAnalysis.threads".into(), json!(4));
        self.write_raw(name, &Value::Object(doc))
    }

    pub fn write_raw(&self, name: &str, value: &Value) -> PathBuf {
        let path = self.input_dir().join(format!("{}.json", name));
        std::fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
        path
    }

    pub fn read_output(&self, name: &str) -> Option<Value> {
        let text = std::fs::read_to_string(self.output_dir().join(format!("{}.json", name))).ok()?;
        Some(serde_json::from_str(&text).unwrap())
    }

    pub fn output_bytes(&self, name: &str) -> Option<Vec<u8>> {
        std::fs::read(self.output_dir().join(format!("{}.json", name))).ok()
    }
}

pub fn refs(items: &[String]) -> Vec<ObjectRef> {
    items.iter().map(|s| ObjectRef::from(s.as_str())).collect()
}
