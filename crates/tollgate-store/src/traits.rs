//! Control store trait.

use std::sync::Arc;

use async_trait::async_trait;
use tollgate_core::{ForwardRule, GlobalPolicy, User};

use crate::error::StoreError;

/// Authoritative source of users, rules, and the global policy.
///
/// Implementations must be thread-safe (`Send + Sync`); every method may be
/// called concurrently from callback handlers and background tasks. Traffic
/// increments must be atomic in the backend (never read-modify-write) so
/// concurrent ingestion of unrelated services cannot lose updates.
#[async_trait]
pub trait ControlStore: Send + Sync {
    /// Fetch one user by id. `Ok(None)` when the user does not exist.
    async fn fetch_user(&self, user_id: i64) -> Result<Option<User>, StoreError>;

    /// List all users.
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    /// List all forward rules.
    async fn list_rules(&self) -> Result<Vec<ForwardRule>, StoreError>;

    /// Read the current global access policy.
    ///
    /// Callers must not cache this beyond one operation; the policy is
    /// mutable at runtime and is re-read on every configuration render.
    async fn global_policy(&self) -> Result<GlobalPolicy, StoreError>;

    /// Atomically add `bytes` to a user's accounted usage.
    async fn add_user_traffic(&self, user_id: i64, bytes: i64) -> Result<(), StoreError>;

    /// Atomically add `bytes` to a rule's accounted usage.
    async fn add_rule_traffic(&self, rule_id: i64, bytes: i64) -> Result<(), StoreError>;

    /// Zero a user's accounted usage and the counters of their rules
    /// (explicit admin reset; the only path by which usage may decrease).
    async fn reset_user_traffic(&self, user_id: i64) -> Result<(), StoreError>;
}

/// Blanket implementation for `Arc<S>` where `S: ControlStore`.
#[async_trait]
impl<S: ControlStore + ?Sized> ControlStore for Arc<S> {
    #[inline]
    async fn fetch_user(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        (**self).fetch_user(user_id).await
    }

    #[inline]
    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        (**self).list_users().await
    }

    #[inline]
    async fn list_rules(&self) -> Result<Vec<ForwardRule>, StoreError> {
        (**self).list_rules().await
    }

    #[inline]
    async fn global_policy(&self) -> Result<GlobalPolicy, StoreError> {
        (**self).global_policy().await
    }

    #[inline]
    async fn add_user_traffic(&self, user_id: i64, bytes: i64) -> Result<(), StoreError> {
        (**self).add_user_traffic(user_id, bytes).await
    }

    #[inline]
    async fn add_rule_traffic(&self, rule_id: i64, bytes: i64) -> Result<(), StoreError> {
        (**self).add_rule_traffic(rule_id, bytes).await
    }

    #[inline]
    async fn reset_user_traffic(&self, user_id: i64) -> Result<(), StoreError> {
        (**self).reset_user_traffic(user_id).await
    }
}

/// Blanket implementation for `Box<S>` where `S: ControlStore`.
#[async_trait]
impl<S: ControlStore + ?Sized> ControlStore for Box<S> {
    #[inline]
    async fn fetch_user(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        (**self).fetch_user(user_id).await
    }

    #[inline]
    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        (**self).list_users().await
    }

    #[inline]
    async fn list_rules(&self) -> Result<Vec<ForwardRule>, StoreError> {
        (**self).list_rules().await
    }

    #[inline]
    async fn global_policy(&self) -> Result<GlobalPolicy, StoreError> {
        (**self).global_policy().await
    }

    #[inline]
    async fn add_user_traffic(&self, user_id: i64, bytes: i64) -> Result<(), StoreError> {
        (**self).add_user_traffic(user_id, bytes).await
    }

    #[inline]
    async fn add_rule_traffic(&self, rule_id: i64, bytes: i64) -> Result<(), StoreError> {
        (**self).add_rule_traffic(rule_id, bytes).await
    }

    #[inline]
    async fn reset_user_traffic(&self, user_id: i64) -> Result<(), StoreError> {
        (**self).reset_user_traffic(user_id).await
    }
}
