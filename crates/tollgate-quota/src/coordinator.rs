//! The quota coordinator.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Duration;
use tollgate_core::{
    AlertLevel, CheckReason, ControlEvent, DenyReason, EventBus, QuotaChanged, QuotaDecision, User,
    UserStatus, defaults, now_unix,
};
use tollgate_store::{ControlStore, StoreError};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheOutcome, DecisionCache};

/// Coordinator tuning.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    /// How long a decision may be served without consulting the store.
    pub decision_ttl: Duration,
    /// Floor between store reads for one user, whatever the trigger.
    pub min_recheck: Duration,
    /// Usage fraction at which an allowed decision carries a warning.
    pub warn_ratio: f64,
    /// Delay before the single bounded retry after a store failure.
    pub store_retry_delay: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            decision_ttl: Duration::from_secs(defaults::DEFAULT_DECISION_TTL_SECS),
            min_recheck: Duration::from_secs(defaults::DEFAULT_MIN_RECHECK_SECS),
            warn_ratio: defaults::DEFAULT_WARN_RATIO,
            store_retry_delay: Duration::from_millis(defaults::DEFAULT_STORE_RETRY_DELAY_MS),
        }
    }
}

/// Evaluate the decision ladder for a user.
///
/// Pure function; the order of the rungs is normative. Admins are exempt
/// from everything below the first rung. Suspension outranks expiry,
/// expiry outranks quota, so the reported denial reason is stable when a
/// user trips several rungs at once.
pub fn evaluate(user: &User, now: i64, warn_ratio: f64) -> QuotaDecision {
    let usage = user.usage_ratio() * 100.0;

    if user.is_admin() {
        return QuotaDecision::allow(usage, AlertLevel::None, user.rate_in_bps, user.rate_out_bps);
    }
    if user.status == UserStatus::Suspended {
        return QuotaDecision::deny(DenyReason::Suspended, usage);
    }
    if user.status == UserStatus::Expired || user.expired_at(now) {
        return QuotaDecision::deny(DenyReason::Expired, usage);
    }
    if user.has_quota() && user.used_bytes >= user.quota_bytes {
        return QuotaDecision::deny(DenyReason::QuotaExceeded, usage);
    }
    if user.has_quota() && user.usage_ratio() >= warn_ratio {
        return QuotaDecision::allow(
            usage,
            AlertLevel::Warning,
            user.rate_in_bps,
            user.rate_out_bps,
        );
    }
    QuotaDecision::allow(usage, AlertLevel::None, user.rate_in_bps, user.rate_out_bps)
}

enum Flight {
    Lead(watch::Sender<Option<QuotaDecision>>),
    Follow(watch::Receiver<Option<QuotaDecision>>),
}

/// Serializes quota decisions per user.
///
/// Every caller always gets a [`QuotaDecision`]; store faults surface as
/// fail-closed denials (or a stale cached decision), never as errors.
pub struct QuotaCoordinator {
    store: Arc<dyn ControlStore>,
    cache: DecisionCache,
    /// One in-flight recomputation per user; followers wait on the leader's
    /// watch channel instead of issuing their own store read.
    inflight: Mutex<HashMap<i64, watch::Receiver<Option<QuotaDecision>>>>,
    bus: EventBus,
    warn_ratio: f64,
    store_retry_delay: Duration,
}

impl QuotaCoordinator {
    pub fn new(store: Arc<dyn ControlStore>, bus: EventBus, config: CoordinatorConfig) -> Self {
        Self {
            store,
            cache: DecisionCache::new(config.decision_ttl, config.min_recheck),
            inflight: Mutex::new(HashMap::new()),
            bus,
            warn_ratio: config.warn_ratio,
            store_retry_delay: config.store_retry_delay,
        }
    }

    /// Check a user's quota verdict, served from cache when possible.
    pub async fn check_quota(&self, user_id: i64, reason: CheckReason) -> QuotaDecision {
        tollgate_metrics::record_quota_check(reason.as_str());
        match self.cache.consult(user_id, reason) {
            CacheOutcome::Serve(decision) => decision,
            CacheOutcome::Recompute => self.recompute(user_id, reason).await,
        }
    }

    /// Recompute now, bypassing both the TTL and the recheck floor.
    pub async fn force_refresh(&self, user_id: i64, reason: CheckReason) -> QuotaDecision {
        tollgate_metrics::record_quota_check(reason.as_str());
        self.recompute(user_id, reason).await
    }

    /// Drop the cached decision (quota edit, reset, role change).
    pub fn invalidate(&self, user_id: i64) {
        self.cache.invalidate(user_id);
    }

    /// Number of users with a cached decision.
    pub fn cached_decisions(&self) -> usize {
        self.cache.len()
    }

    /// Single-flight wrapper around [`Self::compute`]: the first caller for
    /// a user leads and reads the store, everyone else follows its result.
    async fn recompute(&self, user_id: i64, reason: CheckReason) -> QuotaDecision {
        loop {
            let flight = {
                let mut inflight = self.inflight.lock();
                match inflight.get(&user_id) {
                    Some(rx) => Flight::Follow(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        inflight.insert(user_id, rx);
                        Flight::Lead(tx)
                    }
                }
            };

            match flight {
                Flight::Lead(tx) => {
                    let decision = self.compute(user_id, reason).await;
                    self.inflight.lock().remove(&user_id);
                    let _ = tx.send(Some(decision.clone()));
                    return decision;
                }
                Flight::Follow(mut rx) => {
                    let outcome = match rx.wait_for(Option::is_some).await {
                        Ok(guard) => Ok(guard.clone()),
                        Err(e) => Err(e),
                    };
                    match outcome {
                        Ok(Some(decision)) => return decision,
                        Ok(None) => {}
                        // Leader was cancelled without a result. Its map entry
                        // is stale; clear it (unless a new flight already
                        // replaced it) and take the lead ourselves.
                        Err(_) => {
                            let mut inflight = self.inflight.lock();
                            if let Some(existing) = inflight.get(&user_id)
                                && existing.same_channel(&rx)
                            {
                                inflight.remove(&user_id);
                            }
                        }
                    }
                }
            }
        }
    }

    async fn compute(&self, user_id: i64, reason: CheckReason) -> QuotaDecision {
        tollgate_metrics::record_quota_recompute();

        let user = match self.fetch_with_retry(user_id).await {
            Ok(user) => user,
            Err(e) => {
                // Infrastructure fault, not a quota verdict: not cached, not
                // published, logged apart from ordinary denials.
                tollgate_metrics::record_store_fault();
                if let Some(previous) = self.cache.previous(user_id) {
                    warn!(
                        user_id,
                        error = %e,
                        "quota store unavailable; serving last known decision"
                    );
                    return previous;
                }
                error!(user_id, error = %e, "quota store unavailable; failing closed");
                return QuotaDecision::deny(DenyReason::StoreUnavailable, 0.0);
            }
        };

        let decision = match user {
            Some(user) => evaluate(&user, now_unix(), self.warn_ratio),
            None => QuotaDecision::deny(DenyReason::NotFound, 0.0),
        };
        debug!(
            user_id,
            reason = reason.as_str(),
            verdict = decision.reason_str(),
            usage = decision.usage_percent,
            "quota recomputed"
        );
        self.finish(user_id, decision)
    }

    async fn fetch_with_retry(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        match self.store.fetch_user(user_id).await {
            Ok(user) => Ok(user),
            Err(first) => {
                debug!(user_id, error = %first, "user fetch failed; retrying once");
                tokio::time::sleep(self.store_retry_delay).await;
                self.store.fetch_user(user_id).await
            }
        }
    }

    /// Cache the decision and publish `QuotaChanged` when the verdict
    /// flipped. Repeating an unchanged verdict publishes nothing, so rule
    /// disable/enable side effects stay idempotent.
    fn finish(&self, user_id: i64, decision: QuotaDecision) -> QuotaDecision {
        let previous = self.cache.previous(user_id);
        self.cache.store(user_id, decision.clone());

        let flipped = match &previous {
            Some(prev) => prev.allowed != decision.allowed,
            // The first observed verdict is only worth announcing when it
            // is a denial.
            None => decision.is_denied(),
        };

        if decision.is_denied() {
            tollgate_metrics::record_quota_denied(decision.reason_str());
        }

        if flipped {
            if decision.is_denied() {
                warn!(
                    user_id,
                    reason = decision.reason_str(),
                    usage = decision.usage_percent,
                    "quota verdict flipped to denied"
                );
            } else {
                info!(user_id, "quota verdict recovered; re-enabling");
            }
            self.bus.publish(ControlEvent::QuotaChanged(QuotaChanged {
                user_id,
                allowed: decision.allowed,
                reason: decision.reason,
            }));
        }

        decision
    }
}

impl std::fmt::Debug for QuotaCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaCoordinator")
            .field("cached_decisions", &self.cache.len())
            .field("warn_ratio", &self.warn_ratio)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast::error::TryRecvError;
    use tollgate_core::{PortRange, UserRole};
    use tollgate_store::MemoryStore;

    use super::*;

    fn make_user(id: i64, quota: i64, used: i64) -> User {
        User {
            id,
            name: format!("user{id}"),
            role: UserRole::User,
            status: UserStatus::Active,
            quota_bytes: quota,
            used_bytes: used,
            expires_at: 0,
            port_range: Some(PortRange::new(10_000, 10_999)),
            extra_ports: Vec::new(),
            rate_in_bps: 1_000,
            rate_out_bps: 2_000,
        }
    }

    fn make_coordinator(store: Arc<MemoryStore>, bus: EventBus) -> QuotaCoordinator {
        QuotaCoordinator::new(
            store,
            bus,
            CoordinatorConfig {
                decision_ttl: Duration::from_secs(60),
                min_recheck: Duration::from_secs(10),
                warn_ratio: 0.95,
                store_retry_delay: Duration::from_millis(100),
            },
        )
    }

    // ── evaluate ──

    #[test]
    fn test_evaluate_boundary() {
        let mut user = make_user(1, 1_000, 999);
        let d = evaluate(&user, 0, 0.95);
        assert!(d.allowed);

        user.used_bytes = 1_000;
        let d = evaluate(&user, 0, 0.95);
        assert!(d.is_denied());
        assert_eq!(d.reason, Some(DenyReason::QuotaExceeded));
    }

    #[test]
    fn test_evaluate_warning_threshold() {
        let user = make_user(1, 1_000, 950);
        let d = evaluate(&user, 0, 0.95);
        assert!(d.allowed);
        assert_eq!(d.alert, AlertLevel::Warning);
        assert!((d.usage_percent - 95.0).abs() < 1e-9);

        let user = make_user(1, 1_000, 949);
        let d = evaluate(&user, 0, 0.95);
        assert_eq!(d.alert, AlertLevel::None);
    }

    #[test]
    fn test_evaluate_admin_bypasses_quota_and_expiry() {
        let mut user = make_user(1, 1_000, 5_000);
        user.role = UserRole::Admin;
        user.expires_at = 1;

        let d = evaluate(&user, 1_000, 0.95);
        assert!(d.allowed);
        assert_eq!(d.alert, AlertLevel::None);
    }

    #[test]
    fn test_evaluate_ladder_order() {
        // Suspended outranks quota exhaustion
        let mut user = make_user(1, 1_000, 5_000);
        user.status = UserStatus::Suspended;
        assert_eq!(
            evaluate(&user, 0, 0.95).reason,
            Some(DenyReason::Suspended)
        );

        // Expiry outranks quota exhaustion
        let mut user = make_user(1, 1_000, 5_000);
        user.expires_at = 100;
        assert_eq!(
            evaluate(&user, 100, 0.95).reason,
            Some(DenyReason::Expired)
        );
    }

    #[test]
    fn test_evaluate_no_quota_never_denies_or_warns() {
        let user = make_user(1, 0, i64::MAX / 2);
        let d = evaluate(&user, 0, 0.95);
        assert!(d.allowed);
        assert_eq!(d.alert, AlertLevel::None);
        assert_eq!(d.usage_percent, 0.0);
    }

    #[test]
    fn test_evaluate_carries_rates() {
        let user = make_user(1, 1_000, 0);
        let d = evaluate(&user, 0, 0.95);
        assert_eq!(d.rate_in_bps, 1_000);
        assert_eq!(d.rate_out_bps, 2_000);
    }

    // ── coordinator ──

    #[tokio::test(start_paused = true)]
    async fn test_check_quota_caches() {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(make_user(1, 1_000, 0));
        let quota = make_coordinator(Arc::clone(&store), EventBus::new(16));

        assert!(quota.check_quota(1, CheckReason::Connect).await.allowed);
        assert!(quota.check_quota(1, CheckReason::Connect).await.allowed);
        assert_eq!(store.fetch_user_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_checks_single_flight() {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(make_user(1, 1_000, 500));
        store.set_read_delay(Some(Duration::from_millis(50)));
        let quota = Arc::new(make_coordinator(Arc::clone(&store), EventBus::new(16)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let quota = Arc::clone(&quota);
            handles.push(tokio::spawn(async move {
                quota.check_quota(1, CheckReason::Connect).await
            }));
        }

        let mut decisions = Vec::new();
        for handle in handles {
            decisions.push(handle.await.unwrap());
        }

        // One store read; every caller got the identical decision
        assert_eq!(store.fetch_user_calls(), 1);
        for d in &decisions {
            assert_eq!(d, &decisions[0]);
            assert!(d.allowed);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_leader_does_not_wedge_later_checks() {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(make_user(1, 1_000, 0));
        store.set_read_delay(Some(Duration::from_millis(50)));
        let quota = Arc::new(make_coordinator(Arc::clone(&store), EventBus::new(16)));

        // A leader starts a store read and is aborted mid-flight, the way a
        // handler timeout drops its future
        let leader = tokio::spawn({
            let quota = Arc::clone(&quota);
            async move { quota.check_quota(1, CheckReason::Connect).await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        leader.abort();
        let _ = leader.await;

        store.set_read_delay(None);
        let decision = quota.check_quota(1, CheckReason::Connect).await;
        assert!(decision.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_recheck_throttles_significant_traffic() {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(make_user(1, 1_000, 0));
        let quota = make_coordinator(Arc::clone(&store), EventBus::new(16));

        quota.check_quota(1, CheckReason::Connect).await;
        quota.check_quota(1, CheckReason::SignificantTraffic).await;
        assert_eq!(store.fetch_user_calls(), 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        quota.check_quota(1, CheckReason::SignificantTraffic).await;
        assert_eq!(store.fetch_user_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_refresh_bypasses_cache() {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(make_user(1, 1_000, 0));
        let quota = make_coordinator(Arc::clone(&store), EventBus::new(16));

        quota.check_quota(1, CheckReason::Connect).await;
        quota.force_refresh(1, CheckReason::AdminEvent).await;
        assert_eq!(store.fetch_user_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_changed_is_edge_triggered() {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(make_user(1, 1_000, 1_000));
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let quota = make_coordinator(Arc::clone(&store), bus);

        // First denial publishes
        let d = quota.check_quota(1, CheckReason::Connect).await;
        assert!(d.is_denied());
        match events.try_recv() {
            Ok(ControlEvent::QuotaChanged(ev)) => {
                assert!(!ev.allowed);
                assert_eq!(ev.reason, Some(DenyReason::QuotaExceeded));
            }
            other => panic!("expected QuotaChanged, got {other:?}"),
        }

        // Repeating the denial publishes nothing
        quota.force_refresh(1, CheckReason::AdminEvent).await;
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

        // Recovery publishes the re-enable edge
        store.insert_user(make_user(1, 1_000, 0));
        let d = quota.force_refresh(1, CheckReason::AdminEvent).await;
        assert!(d.allowed);
        match events.try_recv() {
            Ok(ControlEvent::QuotaChanged(ev)) => assert!(ev.allowed),
            other => panic!("expected QuotaChanged, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_allowed_decision_publishes_nothing() {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(make_user(1, 1_000, 0));
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let quota = make_coordinator(Arc::clone(&store), bus);

        quota.check_quota(1, CheckReason::Connect).await;
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_retry_once_succeeds() {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(make_user(1, 1_000, 0));
        store.set_fail_next_reads(1);
        let quota = make_coordinator(Arc::clone(&store), EventBus::new(16));

        let d = quota.check_quota(1, CheckReason::Connect).await;
        assert!(d.allowed);
        assert_eq!(store.fetch_user_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_down_serves_stale_decision() {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(make_user(1, 1_000, 0));
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let quota = make_coordinator(Arc::clone(&store), bus);

        // Prime the cache with an allowed decision
        assert!(quota.check_quota(1, CheckReason::Connect).await.allowed);

        store.set_fail_reads(true);
        tokio::time::advance(Duration::from_secs(10)).await;

        // Recompute fails (with retry); the stale allowed decision survives
        let d = quota.check_quota(1, CheckReason::SignificantTraffic).await;
        assert!(d.allowed);
        // An infra fault never flips the verdict
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_down_fails_closed_without_cache() {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(make_user(1, 1_000, 0));
        store.set_fail_reads(true);
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let quota = make_coordinator(Arc::clone(&store), bus);

        let d = quota.check_quota(1, CheckReason::Connect).await;
        assert!(d.is_denied());
        assert_eq!(d.reason, Some(DenyReason::StoreUnavailable));
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

        // The fault denial is not cached; recovery is immediate
        store.set_fail_reads(false);
        let d = quota.check_quota(1, CheckReason::Connect).await;
        assert!(d.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_user_denied_not_found() {
        let store = Arc::new(MemoryStore::new());
        let quota = make_coordinator(Arc::clone(&store), EventBus::new(16));

        let d = quota.check_quota(404, CheckReason::Connect).await;
        assert!(d.is_denied());
        assert_eq!(d.reason, Some(DenyReason::NotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_recompute() {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(make_user(1, 1_000, 0));
        let quota = make_coordinator(Arc::clone(&store), EventBus::new(16));

        quota.check_quota(1, CheckReason::Connect).await;
        quota.invalidate(1);
        quota.check_quota(1, CheckReason::Connect).await;
        assert_eq!(store.fetch_user_calls(), 2);
    }
}
