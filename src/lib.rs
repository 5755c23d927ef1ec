//! Paired remote-object manifest validation.
//!
//! Checks that both members of every primary/secondary pair in a manifest
//! exist in a remote object store, writes a filtered manifest containing only
//! the complete pairs, and reports what is missing.
//!
//! - [`validator`]: one manifest in, filtered document and report out
//! - [`orchestrator`]: manifest discovery, index preparation, bounded
//!   manifest-level concurrency, skip-if-validated resumption
//! - [`report`]: overall summary folding and its JSON / CSV / text renderings
//!
//! Existence resolution itself (index, bulk query, retried point query) lives
//! in the `pairguard-resolver` crate.

pub mod args;
pub mod config;
pub mod logging;
pub mod orchestrator;
pub mod report;
pub mod validator;

pub use config::ValidatorConfig;
pub use orchestrator::{IndexOptions, IndexSource, Orchestrator, RunOutcome, Selection};
pub use report::OverallSummary;
pub use validator::{FailureEntry, ManifestReport, ManifestStatus, ManifestValidator, Severity, Validation};
