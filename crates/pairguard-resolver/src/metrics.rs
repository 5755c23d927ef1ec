//! Resolver counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Thread-safe counters shared by every tier of one resolver.
#[derive(Debug, Clone, Default)]
pub struct ResolverMetrics {
    /// Objects confirmed by index membership
    pub index_hits: Arc<AtomicU64>,
    /// Bulk queries issued
    pub batch_calls: Arc<AtomicU64>,
    /// Bulk queries that errored or timed out
    pub batch_failures: Arc<AtomicU64>,
    /// Objects confirmed by a bulk query
    pub batch_hits: Arc<AtomicU64>,
    /// Objects that needed a point query
    pub point_queries: Arc<AtomicU64>,
    /// Point-query attempts beyond the first
    pub point_retries: Arc<AtomicU64>,
    /// Point queries that ended `Unknown`
    pub unknown: Arc<AtomicU64>,
}

impl ResolverMetrics {
    pub fn record_index_hits(&self, n: u64) {
        self.index_hits.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_batch_call(&self, hits: u64) {
        self.batch_calls.fetch_add(1, Ordering::Relaxed);
        self.batch_hits.fetch_add(hits, Ordering::Relaxed);
    }

    pub fn record_batch_failure(&self) {
        self.batch_calls.fetch_add(1, Ordering::Relaxed);
        self.batch_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one finished point query that took `attempts` tries.
    pub fn record_point_query(&self, attempts: usize, unknown: bool) {
        self.point_queries.fetch_add(1, Ordering::Relaxed);
        self.point_retries
            .fetch_add(attempts.saturating_sub(1) as u64, Ordering::Relaxed);
        if unknown {
            self.unknown.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> ResolutionStats {
        ResolutionStats {
            index_hits: self.index_hits.load(Ordering::Relaxed),
            batch_calls: self.batch_calls.load(Ordering::Relaxed),
            batch_failures: self.batch_failures.load(Ordering::Relaxed),
            batch_hits: self.batch_hits.load(Ordering::Relaxed),
            point_queries: self.point_queries.load(Ordering::Relaxed),
            point_retries: self.point_retries.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ResolverMetrics`], recorded in manifest reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionStats {
    pub index_hits: u64,
    pub batch_calls: u64,
    pub batch_failures: u64,
    pub batch_hits: u64,
    pub point_queries: u64,
    pub point_retries: u64,
    pub unknown: u64,
}

impl ResolutionStats {
    /// Remote calls issued after the index tier (bulk + point attempts).
    pub fn remote_calls(&self) -> u64 {
        self.batch_calls + self.point_queries + self.point_retries
    }

    pub fn format_report(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!("  Index hits:      {}", self.index_hits));
        lines.push(format!(
            "  Batch queries:   {} ({} failed, {} hits)",
            self.batch_calls, self.batch_failures, self.batch_hits
        ));
        lines.push(format!(
            "  Point queries:   {} ({} retries, {} unknown)",
            self.point_queries, self.point_retries, self.unknown
        ));
        lines.join("\n")
    }
}
