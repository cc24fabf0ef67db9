//! Quota decision types.
//!
//! Decisions are cache-only, ephemeral values keyed by user id. They carry
//! the bandwidth caps alongside the verdict so that limiter callbacks can be
//! answered from cache without a store read.

use serde::{Deserialize, Serialize};

use crate::types::now_unix;

/// Why a user was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    Suspended,
    Expired,
    QuotaExceeded,
    NotFound,
    /// The store could not be read; denial is conservative, not a quota
    /// verdict. Logged as an infrastructure fault.
    StoreUnavailable,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Suspended => "suspended",
            Self::Expired => "expired",
            Self::QuotaExceeded => "quota_exceeded",
            Self::NotFound => "not_found",
            Self::StoreUnavailable => "store_unavailable",
        }
    }
}

/// Alert level attached to a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    None,
    /// Usage crossed the warning threshold but remains under quota.
    Warning,
    /// Denied, or usage at/over quota.
    Critical,
}

/// Why a quota check was requested. Determines cache/throttle behavior and
/// shows up in logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckReason {
    /// A connection attempt via the auth or limiter callback.
    Connect,
    /// The ingestor accounted a significant delta.
    SignificantTraffic,
    /// Periodic background recheck.
    Periodic,
    /// Quota edit, reset, or another admin-originated event.
    AdminEvent,
    /// The emergency monitor observed fast growth.
    EmergencyGrowth,
}

impl CheckReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::SignificantTraffic => "significant_traffic",
            Self::Periodic => "periodic",
            Self::AdminEvent => "admin_event",
            Self::EmergencyGrowth => "emergency_growth",
        }
    }

    /// Whether this reason asks for a recomputation of a still-fresh cached
    /// decision (subject to the per-user minimum recheck interval).
    #[inline]
    pub fn requests_recompute(&self) -> bool {
        matches!(
            self,
            Self::SignificantTraffic | Self::Periodic | Self::EmergencyGrowth
        )
    }
}

/// Outcome of a quota evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    /// Set when denied.
    pub reason: Option<DenyReason>,
    /// Quota consumed, 0..=100+ (0 when no quota is set).
    pub usage_percent: f64,
    pub alert: AlertLevel,
    /// Inbound cap in bytes/sec (0 = unlimited). Meaningful only when allowed.
    pub rate_in_bps: i64,
    /// Outbound cap in bytes/sec (0 = unlimited). Meaningful only when allowed.
    pub rate_out_bps: i64,
    /// Unix timestamp of the evaluation.
    pub computed_at: i64,
}

impl QuotaDecision {
    /// An allowed decision.
    pub fn allow(usage_percent: f64, alert: AlertLevel, rate_in_bps: i64, rate_out_bps: i64) -> Self {
        Self {
            allowed: true,
            reason: None,
            usage_percent,
            alert,
            rate_in_bps,
            rate_out_bps,
            computed_at: now_unix(),
        }
    }

    /// A denied decision.
    pub fn deny(reason: DenyReason, usage_percent: f64) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            usage_percent,
            alert: AlertLevel::Critical,
            rate_in_bps: 0,
            rate_out_bps: 0,
            computed_at: now_unix(),
        }
    }

    #[inline]
    pub fn is_denied(&self) -> bool {
        !self.allowed
    }

    /// Reason string for logs/metrics (`"ok"` when allowed).
    pub fn reason_str(&self) -> &'static str {
        match self.reason {
            Some(r) => r.as_str(),
            None => "ok",
        }
    }
}
