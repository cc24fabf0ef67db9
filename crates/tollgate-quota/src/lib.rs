//! Quota decisions.
//!
//! [`evaluate`] is the pure decision ladder. [`QuotaCoordinator`] wraps it
//! with a per-user decision cache, single-flighted store reads, fail-closed
//! handling of store faults, and edge-triggered `QuotaChanged` publication.

mod cache;
mod coordinator;

pub use cache::{CacheOutcome, DecisionCache};
pub use coordinator::{CoordinatorConfig, QuotaCoordinator, evaluate};
