//! Cloud Storage JSON API backend.
//!
//! Listing uses `GET /b/{bucket}/o?prefix=` with page tokens, the structured
//! listing the index builder prefers. Batch queries list each distinct parent
//! folder once and intersect. Point queries fetch object metadata and map
//! HTTP 404 to "not found".
//!
//! `ureq` is blocking, so every request runs on the blocking pool.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use pairguard_types::ObjectRef;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tracing::debug;

use crate::ObjectStore;

const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com/storage/v1";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage {
    #[serde(default)]
    items: Vec<ListItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListItem {
    name: String,
}

/// HTTP client for the Cloud Storage JSON API.
#[derive(Clone, Debug)]
pub struct GcsJsonStore {
    endpoint: String,
    token: Option<String>,
    agent: ureq::Agent,
}

impl GcsJsonStore {
    /// Default request timeout in seconds (can be overridden by env).
    const DEFAULT_TIMEOUT_SECS: u64 = 30;
    /// Default connect timeout in seconds (can be overridden by env).
    const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

    fn default_timeouts() -> (Duration, Duration) {
        let timeout_secs = std::env::var("PAIRGUARD_GCS_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(Self::DEFAULT_TIMEOUT_SECS);
        let connect_secs = std::env::var("PAIRGUARD_GCS_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(Self::DEFAULT_CONNECT_TIMEOUT_SECS);
        (
            Duration::from_secs(timeout_secs),
            Duration::from_secs(connect_secs),
        )
    }

    fn build_agent(timeout: Duration, connect_timeout: Duration) -> ureq::Agent {
        ureq::AgentBuilder::new()
            .timeout(timeout)
            .timeout_connect(connect_timeout)
            .build()
    }

    /// Client for the public endpoint, honoring `PAIRGUARD_GCS_ENDPOINT`.
    pub fn new(token: Option<String>) -> Self {
        let endpoint = std::env::var("PAIRGUARD_GCS_ENDPOINT")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        Self::with_endpoint(&endpoint, token)
    }

    /// Client for a custom endpoint (emulators, proxies).
    pub fn with_endpoint(endpoint: &str, token: Option<String>) -> Self {
        let (timeout, connect_timeout) = Self::default_timeouts();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
            agent: Self::build_agent(timeout, connect_timeout),
        }
    }

    fn get(&self, url: &str, scope: Option<&str>) -> ureq::Request {
        let mut req = self.agent.get(url);
        if let Some(token) = &self.token {
            req = req.set("Authorization", &format!("Bearer {}", token));
        }
        if let Some(project) = scope {
            req = req.query("userProject", project);
        }
        req
    }

    fn list_blocking(&self, prefix: &str, scope: Option<&str>) -> Result<Vec<ObjectRef>> {
        let (scheme, bucket, key_prefix) = split_prefix(prefix)?;
        let url = format!("{}/b/{}/o", self.endpoint, encode_component(bucket));
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut req = self
                .get(&url, scope)
                .query("prefix", key_prefix)
                .query("fields", "items(name),nextPageToken")
                .query("maxResults", "1000");
            if let Some(token) = &page_token {
                req = req.query("pageToken", token);
            }
            let page: ListPage = req
                .call()
                .map_err(|e| anyhow!("list {} failed: {}", prefix, e))?
                .into_json()
                .map_err(|e| anyhow!("Failed to parse listing for {}: {}", prefix, e))?;
            out.extend(
                page.items
                    .into_iter()
                    .filter(|item| !item.name.ends_with('/'))
                    .map(|item| ObjectRef::new(format!("{}://{}/{}", scheme, bucket, item.name))),
            );
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(out)
    }

    fn stat_blocking(&self, object: &ObjectRef, scope: Option<&str>) -> Result<bool> {
        let (bucket, key) = match (object.bucket(), object.key()) {
            (Some(b), Some(k)) if !k.is_empty() => (b, k),
            _ => return Err(anyhow!("not a bucket object reference: {}", object)),
        };
        let url = format!(
            "{}/b/{}/o/{}",
            self.endpoint,
            encode_component(bucket),
            encode_component(key)
        );
        match self.get(&url, scope).query("fields", "name").call() {
            Ok(_) => Ok(true),
            Err(ureq::Error::Status(404, _)) => Ok(false),
            Err(ureq::Error::Status(code, _)) => Err(anyhow!("stat {} returned HTTP {}", object, code)),
            Err(e) => Err(anyhow!("stat {} failed: {}", object, e)),
        }
    }
}

/// `gs://bucket/some/dir/` -> (`gs`, `bucket`, `some/dir/`).
fn split_prefix(prefix: &str) -> Result<(&str, &str, &str)> {
    let (scheme, rest) = prefix
        .split_once("://")
        .ok_or_else(|| anyhow!("prefix is not a bucket URL: {}", prefix))?;
    let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() {
        return Err(anyhow!("prefix has no bucket: {}", prefix));
    }
    Ok((scheme, bucket, key))
}

/// Percent-encode one path segment (object names may contain `/`).
fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[async_trait]
impl ObjectStore for GcsJsonStore {
    fn name(&self) -> &'static str {
        "gcs-json"
    }

    async fn probe(&self) -> Result<()> {
        if self.token.is_none() {
            return Err(anyhow!(
                "no access token for the JSON API; set PAIRGUARD_GCS_TOKEN"
            ));
        }
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str, scope: Option<&str>) -> Result<Vec<ObjectRef>> {
        let this = self.clone();
        let prefix = prefix.to_string();
        let scope = scope.map(str::to_string);
        tokio::task::spawn_blocking(move || this.list_blocking(&prefix, scope.as_deref()))
            .await
            .map_err(|e| anyhow!("listing task failed: {}", e))?
    }

    async fn exists_batch(&self, refs: &[ObjectRef], scope: Option<&str>) -> Result<HashSet<ObjectRef>> {
        let mut by_folder: BTreeMap<String, Vec<&ObjectRef>> = BTreeMap::new();
        for r in refs {
            let folder = r
                .parent_prefix()
                .ok_or_else(|| anyhow!("not a bucket object reference: {}", r))?;
            by_folder.entry(folder).or_default().push(r);
        }
        let wanted: HashSet<&ObjectRef> = refs.iter().collect();
        let mut found = HashSet::new();
        for folder in by_folder.keys() {
            let listed = self.list_prefix(folder, scope).await?;
            found.extend(listed.into_iter().filter(|r| wanted.contains(r)));
        }
        debug!(
            requested = refs.len(),
            folders = by_folder.len(),
            found = found.len(),
            "gcs-json batch listing"
        );
        Ok(found)
    }

    async fn stat(&self, object: &ObjectRef, scope: Option<&str>) -> Result<bool> {
        let this = self.clone();
        let object = object.clone();
        let scope = scope.map(str::to_string);
        tokio::task::spawn_blocking(move || this.stat_blocking(&object, scope.as_deref()))
            .await
            .map_err(|e| anyhow!("stat task failed: {}", e))?
    }
}
