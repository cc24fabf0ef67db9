//! Per-user decision cache.

use dashmap::DashMap;
use tokio::time::{Duration, Instant};
use tollgate_core::{CheckReason, QuotaDecision};

/// What the cache says about a check.
#[derive(Debug, Clone)]
pub enum CacheOutcome {
    /// Serve this cached decision unchanged.
    Serve(QuotaDecision),
    /// Consult the store.
    Recompute,
}

struct CacheEntry {
    decision: QuotaDecision,
    computed_at: Instant,
}

/// Decision cache with a freshness TTL and a minimum recheck interval.
///
/// Ordinary checks are served from cache while the entry is inside the TTL.
/// Recompute-requesting reasons (significant traffic, periodic, emergency
/// growth) may recompute a still-fresh entry, but no more often than the
/// minimum recheck interval, so a burst of significant deltas cannot turn
/// into a store stampede.
pub struct DecisionCache {
    entries: DashMap<i64, CacheEntry>,
    ttl: Duration,
    min_recheck: Duration,
}

impl DecisionCache {
    pub fn new(ttl: Duration, min_recheck: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            min_recheck,
        }
    }

    /// Decide whether `reason` can be answered from cache.
    pub fn consult(&self, user_id: i64, reason: CheckReason) -> CacheOutcome {
        let Some(entry) = self.entries.get(&user_id) else {
            return CacheOutcome::Recompute;
        };
        let age = entry.computed_at.elapsed();
        if age >= self.ttl {
            return CacheOutcome::Recompute;
        }
        if reason.requests_recompute() && age >= self.min_recheck {
            return CacheOutcome::Recompute;
        }
        CacheOutcome::Serve(entry.decision.clone())
    }

    /// Last stored decision regardless of freshness. Used for edge
    /// detection and for the stale fallback when the store is down.
    pub fn previous(&self, user_id: i64) -> Option<QuotaDecision> {
        self.entries.get(&user_id).map(|e| e.decision.clone())
    }

    pub fn store(&self, user_id: i64, decision: QuotaDecision) {
        self.entries.insert(
            user_id,
            CacheEntry {
                decision,
                computed_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, user_id: i64) {
        self.entries.remove(&user_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
