//! Existence index for pairguard.
//!
//! This crate provides:
//! - `ExistenceIndex`: point-in-time snapshot of objects known to exist under a
//!   set of prefixes, queried by set membership
//! - `build` / `save` / `load`: construct from listing sources, persist as
//!   gzip-compressed JSON, reload (any decode failure reads as "no cache")
//! - `infer_prefixes`: derive listing prefixes from manifests
//! - `paths`: cache location and atomic file writes shared by the workspace

pub mod index;
pub mod paths;

pub use index::{build, infer_prefixes, ExistenceIndex, INDEX_FORMAT_VERSION};
pub use paths::{atomic_write, atomic_write_json, default_index_path, ensure_parent_dirs};
