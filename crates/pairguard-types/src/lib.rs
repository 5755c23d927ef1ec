//! Shared types for the pairguard workspace.
//!
//! This crate provides foundational types used across multiple crates in the workspace,
//! breaking circular dependency chains.
//!
//! - [`ObjectRef`] - opaque remote-object identifier (`gs://bucket/key`)
//! - [`Pair`], [`Manifest`], [`ManifestDocument`] - the unit of validation
//! - [`Existence`], [`ValidationOutcome`] - per-object and per-pair verdicts

pub mod manifest;
pub mod object_ref;
pub mod outcome;

pub use manifest::{
    Manifest, ManifestDocument, ManifestKeys, Pair, PairingMismatch, PairingMode,
    DEFAULT_PRIMARY_KEY, DEFAULT_SECONDARY_KEY, VALIDATION_METADATA_KEY,
};
pub use object_ref::ObjectRef;
pub use outcome::{Existence, ValidationOutcome};

use std::time::Duration;

/// Configuration for retry behavior on point existence queries.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Number of additional attempts after the first one.
    pub retries: usize,
    /// Base backoff; attempt `n` waits `initial_backoff * 2^n` plus jitter.
    pub initial_backoff: Duration,
    /// Upper bound of the uniformly random jitter added to every backoff.
    pub max_jitter: Duration,
    /// Timeout applied to each individual attempt.
    pub attempt_timeout: Duration,
}

impl RetryConfig {
    /// Create a new RetryConfig with the specified parameters.
    pub fn new(retries: usize, initial_backoff_ms: u64, max_jitter_ms: u64, timeout_secs: u64) -> Self {
        Self {
            retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_jitter: Duration::from_millis(max_jitter_ms),
            attempt_timeout: Duration::from_secs(timeout_secs),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_jitter: Duration::from_millis(200),
            attempt_timeout: Duration::from_secs(20),
        }
    }
}
