//! `gsutil` CLI backend.
//!
//! - point query: `gsutil [-u SCOPE] stat URL` (exit 0 = exists)
//! - batch query: `gsutil [-u SCOPE] ls URL...` (prints only matched URLs)
//! - listing: `gsutil [-u SCOPE] ls -r PREFIX`
//!
//! A non-zero exit is a miss only when stderr says "No URLs matched" or
//! "matched no objects"; anything else is an error for the caller to retry.
//!
//! Child processes are spawned with `kill_on_drop`, so a caller-side timeout
//! that drops the future also reaps the process.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use pairguard_types::ObjectRef;
use std::collections::HashSet;
use std::process::Output;
use tokio::process::Command;
use tracing::debug;

use crate::ObjectStore;

/// URLs per `gsutil ls` invocation, to stay well under the OS argument limit.
const BATCH_CHUNK: usize = 500;

/// Shell-out backend for the `gsutil` CLI.
#[derive(Debug, Clone)]
pub struct GsutilStore {
    binary: String,
}

impl Default for GsutilStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GsutilStore {
    pub fn new() -> Self {
        Self::with_binary("gsutil")
    }

    /// Use a specific executable (a wrapper script, or an absolute path).
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, scope: Option<&str>) -> Command {
        let mut cmd = Command::new(&self.binary);
        if let Some(project) = scope {
            cmd.arg("-u").arg(project);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run(&self, mut cmd: Command) -> Result<Output> {
        cmd.output()
            .await
            .with_context(|| format!("spawn {}", self.binary))
    }
}

fn is_not_found_line(line: &str) -> bool {
    line.contains("No URLs matched") || line.contains("matched no objects")
}

/// A failed `gsutil` call means "nothing there" only when stderr says so and
/// reports no other exception. Silent or unrecognised failures are errors.
fn reports_only_missing(stderr: &str) -> bool {
    let mut not_found = false;
    for line in stderr.lines() {
        if is_not_found_line(line) {
            not_found = true;
        } else if line.contains("Exception") || line.contains("Error") {
            return false;
        }
    }
    not_found
}

/// Object URLs in `gsutil ls` / `ls -r` output, skipping directory headers
/// (`gs://b/dir/:`), folder placeholders and blank lines.
fn parse_listing(stdout: &str) -> Vec<ObjectRef> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && l.contains("://") && !l.ends_with(':') && !l.ends_with('/'))
        .map(ObjectRef::from)
        .collect()
}

#[async_trait]
impl ObjectStore for GsutilStore {
    fn name(&self) -> &'static str {
        "gsutil"
    }

    async fn probe(&self) -> Result<()> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("version").kill_on_drop(true);
        let out = self
            .run(cmd)
            .await
            .map_err(|e| anyhow!("{} not found; install the Google Cloud SDK ({:#})", self.binary, e))?;
        if !out.status.success() {
            return Err(anyhow!(
                "`{} version` failed: {}",
                self.binary,
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str, scope: Option<&str>) -> Result<Vec<ObjectRef>> {
        let mut cmd = self.command(scope);
        cmd.arg("ls").arg("-r").arg(prefix);
        let out = self.run(cmd).await?;
        let stderr = String::from_utf8_lossy(&out.stderr);
        if !out.status.success() && !reports_only_missing(&stderr) {
            return Err(anyhow!("gsutil ls -r {} failed ({}): {}", prefix, out.status, stderr.trim()));
        }
        Ok(parse_listing(&String::from_utf8_lossy(&out.stdout)))
    }

    async fn exists_batch(&self, refs: &[ObjectRef], scope: Option<&str>) -> Result<HashSet<ObjectRef>> {
        let wanted: HashSet<&ObjectRef> = refs.iter().collect();
        let mut found = HashSet::new();
        for chunk in refs.chunks(BATCH_CHUNK) {
            let mut cmd = self.command(scope);
            cmd.arg("ls");
            for r in chunk {
                cmd.arg(r.as_str());
            }
            let out = self.run(cmd).await?;
            let stderr = String::from_utf8_lossy(&out.stderr);
            // Non-zero exit is expected whenever at least one URL is missing.
            if !out.status.success() && !reports_only_missing(&stderr) {
                return Err(anyhow!("gsutil ls batch failed ({}): {}", out.status, stderr.trim()));
            }
            found.extend(
                parse_listing(&String::from_utf8_lossy(&out.stdout))
                    .into_iter()
                    .filter(|r| wanted.contains(r)),
            );
        }
        debug!(requested = refs.len(), found = found.len(), "gsutil batch ls");
        Ok(found)
    }

    async fn stat(&self, object: &ObjectRef, scope: Option<&str>) -> Result<bool> {
        let mut cmd = self.command(scope);
        // Without -q a miss is reported on stderr, so it can be told apart
        // from a failure that printed nothing.
        cmd.arg("stat").arg(object.as_str());
        let out = self.run(cmd).await?;
        if out.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&out.stderr);
        if reports_only_missing(&stderr) {
            return Ok(false);
        }
        Err(anyhow!("gsutil stat {} failed ({}): {}", object, out.status, stderr.trim()))
    }
}
