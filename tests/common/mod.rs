#![allow(dead_code)]
//! Shared test utilities for integration tests.
//!
//! - `fixtures`: temp workspaces, manifest files, in-memory stores

pub mod fixtures;

pub use fixtures::{fast_policy, fixed_time, gs, pair_refs, Workspace};
