//! Immutable port map snapshots.

use std::collections::HashMap;

use tokio::time::{Duration, Instant};
use tollgate_core::ForwardRule;

/// Ownership of one listen port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub user_id: i64,
    pub rule_id: i64,
}

/// One immutable build of the port map.
///
/// `built_at` is taken when the rebuild starts reading the store, so a
/// snapshot never claims to be newer than the data it was built from.
#[derive(Debug, Clone)]
pub struct MappingSnapshot {
    pub ports: HashMap<u16, PortMapping>,
    pub built_at: Instant,
    pub generation: u64,
    /// False for the startup placeholder and after a full invalidation.
    pub valid: bool,
}

impl MappingSnapshot {
    /// Placeholder snapshot that every lookup treats as stale.
    pub fn empty(generation: u64) -> Self {
        Self {
            ports: HashMap::new(),
            built_at: Instant::now(),
            generation,
            valid: false,
        }
    }

    /// Build a snapshot from the full rule list.
    ///
    /// Every rule is mapped regardless of whether it is currently active;
    /// whether traffic is admitted on a port is the quota ladder's call,
    /// not the port map's.
    pub fn build(rules: &[ForwardRule], generation: u64, built_at: Instant) -> Self {
        let mut ports = HashMap::with_capacity(rules.len());
        for rule in rules {
            ports.insert(
                rule.source_port,
                PortMapping {
                    user_id: rule.user_id,
                    rule_id: rule.id,
                },
            );
        }
        Self {
            ports,
            built_at,
            generation,
            valid: true,
        }
    }

    /// Whether this snapshot may still serve lookups.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.valid && self.built_at.elapsed() < ttl
    }
}
