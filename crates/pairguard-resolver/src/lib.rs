//! Existence resolution for pairguard.
//!
//! Answers "does object X exist?" with a chain of tiers, cheapest first:
//!
//! 1. [`IndexTier`]: membership in the cached [`ExistenceIndex`] (no remote call)
//! 2. [`BatchTier`]: one bulk query for everything still pending
//! 3. [`PointTier`]: one retried point query per remaining object
//!
//! The first two tiers only ever confirm presence; anything they cannot
//! confirm is deferred. Only the point tier can report `Absent` or `Unknown`.
//! Remote calls are therefore bounded by 1 batch + K point queries, where K
//! is the number of objects the faster tiers could not confirm.
//!
//! [`ExistenceIndex`]: pairguard_index::ExistenceIndex

pub mod metrics;
pub mod resolver;
pub mod retry;
pub mod tiers;

pub use metrics::{ResolutionStats, ResolverMetrics};
pub use resolver::{exists, exists_batch, exists_single, Resolution, TieredResolver};
pub use retry::{FixedJitter, JitterSource, RetryOutcome, RetryPolicy, Sleeper, ThreadRngJitter, TokioSleeper};
pub use tiers::{BatchTier, IndexTier, PointTier, ResolutionTier};
