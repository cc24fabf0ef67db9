//! In-memory control store.
//!
//! Suitable for tests and small fixed deployments. All state lives behind
//! `RwLock`s so the store can be shared as `Arc<MemoryStore>` and mutated
//! while components hold it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tollgate_core::{ForwardRule, GlobalPolicy, User};

use crate::error::StoreError;
use crate::traits::ControlStore;

/// In-memory [`ControlStore`] with fault injection hooks.
///
/// Reads can be made to fail or to stall, and read calls are counted, so
/// callers can assert on coalescing and retry behavior.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<i64, User>>,
    rules: RwLock<HashMap<i64, ForwardRule>>,
    policy: RwLock<GlobalPolicy>,
    fail_reads: AtomicBool,
    fail_next_reads: AtomicU64,
    fail_writes: AtomicBool,
    read_delay: RwLock<Option<Duration>>,
    fetch_user_calls: AtomicU64,
    list_rules_calls: AtomicU64,
}

impl MemoryStore {
    /// Create a new empty store with default global policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user.
    pub fn insert_user(&self, user: User) {
        self.users.write().insert(user.id, user);
    }

    /// Insert or replace a rule.
    pub fn insert_rule(&self, rule: ForwardRule) {
        self.rules.write().insert(rule.id, rule);
    }

    /// Remove a user. Returns whether it existed.
    pub fn remove_user(&self, user_id: i64) -> bool {
        self.users.write().remove(&user_id).is_some()
    }

    /// Remove a rule. Returns whether it existed.
    pub fn remove_rule(&self, rule_id: i64) -> bool {
        self.rules.write().remove(&rule_id).is_some()
    }

    /// Replace the global policy.
    pub fn set_policy(&self, policy: GlobalPolicy) {
        *self.policy.write() = policy;
    }

    /// Make subsequent reads fail with [`StoreError::Unavailable`].
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make only the next `n` reads fail, then recover.
    pub fn set_fail_next_reads(&self, n: u64) {
        self.fail_next_reads.store(n, Ordering::SeqCst);
    }

    /// Make subsequent writes fail with [`StoreError::Unavailable`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Stall every read by `delay`. Used to widen race windows in tests.
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        *self.read_delay.write() = delay;
    }

    /// Number of `fetch_user` calls served so far.
    pub fn fetch_user_calls(&self) -> u64 {
        self.fetch_user_calls.load(Ordering::SeqCst)
    }

    /// Number of `list_rules` calls served so far.
    pub fn list_rules_calls(&self) -> u64 {
        self.list_rules_calls.load(Ordering::SeqCst)
    }

    /// Current accounted usage of a user, if present.
    pub fn used_bytes(&self, user_id: i64) -> Option<i64> {
        self.users.read().get(&user_id).map(|u| u.used_bytes)
    }

    /// Current accounted usage of a rule, if present.
    pub fn rule_used_bytes(&self, rule_id: i64) -> Option<i64> {
        self.rules.read().get(&rule_id).map(|r| r.used_bytes)
    }

    async fn before_read(&self) -> Result<(), StoreError> {
        let delay = *self.read_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected read failure".into()));
        }
        if self
            .fail_next_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Unavailable("injected read failure".into()));
        }
        Ok(())
    }

    fn before_write(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ControlStore for MemoryStore {
    async fn fetch_user(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        self.fetch_user_calls.fetch_add(1, Ordering::SeqCst);
        self.before_read().await?;
        Ok(self.users.read().get(&user_id).cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        self.before_read().await?;
        let mut users: Vec<User> = self.users.read().values().cloned().collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn list_rules(&self) -> Result<Vec<ForwardRule>, StoreError> {
        self.list_rules_calls.fetch_add(1, Ordering::SeqCst);
        self.before_read().await?;
        let mut rules: Vec<ForwardRule> = self.rules.read().values().cloned().collect();
        rules.sort_by_key(|r| r.source_port);
        Ok(rules)
    }

    async fn global_policy(&self) -> Result<GlobalPolicy, StoreError> {
        self.before_read().await?;
        Ok(*self.policy.read())
    }

    async fn add_user_traffic(&self, user_id: i64, bytes: i64) -> Result<(), StoreError> {
        self.before_write()?;
        if let Some(user) = self.users.write().get_mut(&user_id) {
            user.used_bytes += bytes;
        }
        Ok(())
    }

    async fn add_rule_traffic(&self, rule_id: i64, bytes: i64) -> Result<(), StoreError> {
        self.before_write()?;
        if let Some(rule) = self.rules.write().get_mut(&rule_id) {
            rule.used_bytes += bytes;
        }
        Ok(())
    }

    async fn reset_user_traffic(&self, user_id: i64) -> Result<(), StoreError> {
        self.before_write()?;
        if let Some(user) = self.users.write().get_mut(&user_id) {
            user.used_bytes = 0;
        }
        for rule in self.rules.write().values_mut() {
            if rule.user_id == user_id {
                rule.used_bytes = 0;
            }
        }
        Ok(())
    }
}
