//! Path utilities and atomic writes.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Default index cache file: `<cache_dir>/pairguard/existence_index.json.gz`,
/// falling back to the working directory when no cache dir is known.
pub fn default_index_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pairguard")
        .join("existence_index.json.gz")
}

/// Create the directory a result file lands in.
pub fn ensure_parent_dirs(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display())),
        _ => Ok(()),
    }
}

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Hidden sibling `.<name>.<pid>.<seq>.tmp`, unique per writer so concurrent
/// manifest tasks never share a temp file.
fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_string());
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), seq))
}

/// Replace `path` with `contents` in one rename. The data is synced before
/// the rename, and the temp file is removed if anything fails, so readers see
/// either the old file or the complete new one.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    ensure_parent_dirs(path)?;
    let tmp_path = temp_sibling(path);
    let written = write_synced(&tmp_path, contents).and_then(|()| {
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("rename {} to {}", tmp_path.display(), path.display()))
    });
    if written.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    written
}

fn write_synced(path: &Path, contents: &[u8]) -> Result<()> {
    let mut file = File::create(path).with_context(|| format!("create temp file {}", path.display()))?;
    file.write_all(contents)
        .and_then(|()| file.sync_all())
        .with_context(|| format!("write temp file {}", path.display()))
}

/// Write a pretty-printed JSON file atomically, with a trailing newline.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut json = serde_json::to_vec_pretty(value).context("serialize JSON")?;
    json.push(b'\n');
    atomic_write(path, &json)
}
