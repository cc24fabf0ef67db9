//! Domain model: users, forward rules, global policy, and the pure
//! rule-activity function.
//!
//! Byte counters and timestamps are `i64` to match the storage columns.
//! `0` means "unset" for quotas, expiries, and rate caps.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// User role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Administrators bypass quota, expiry, and the global kill switch.
    Admin,
    /// Regular quota-governed user.
    User,
}

impl UserRole {
    /// Parse a stored role string; unknown values fall back to `User`.
    pub fn parse(s: &str) -> Self {
        match s {
            "admin" => Self::Admin,
            _ => Self::User,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }
}

/// User account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Suspended,
    Expired,
}

impl UserStatus {
    /// Parse a stored status string; unknown values are treated as
    /// `Suspended` so a corrupt row never grants access.
    pub fn parse(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "expired" => Self::Expired,
            _ => Self::Suspended,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Expired => "expired",
        }
    }
}

/// Inclusive port range a user may forward from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }
}

/// A user account as read from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub role: UserRole,
    pub status: UserStatus,
    /// Byte budget (0 = unlimited).
    pub quota_bytes: i64,
    /// Accounted usage. Monotonic except via an explicit admin reset.
    pub used_bytes: i64,
    /// Unix expiry timestamp (0 = never).
    pub expires_at: i64,
    /// Port range this user may bind (None = no range assigned).
    pub port_range: Option<PortRange>,
    /// Individual ports allowed outside the range.
    pub extra_ports: Vec<u16>,
    /// Inbound bandwidth cap in bytes/sec (0 = unlimited).
    pub rate_in_bps: i64,
    /// Outbound bandwidth cap in bytes/sec (0 = unlimited).
    pub rate_out_bps: i64,
}

impl User {
    #[inline]
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Whether the user has a quota configured.
    #[inline]
    pub fn has_quota(&self) -> bool {
        self.quota_bytes > 0
    }

    /// Whether the account is past its expiry timestamp at `now`.
    #[inline]
    pub fn expired_at(&self, now: i64) -> bool {
        self.expires_at > 0 && now >= self.expires_at
    }

    /// Whether `port` is inside the user's allowed set.
    pub fn allows_port(&self, port: u16) -> bool {
        if let Some(range) = &self.port_range
            && range.contains(port)
        {
            return true;
        }
        self.extra_ports.contains(&port)
    }

    /// Fraction of quota consumed (0.0 when no quota is set).
    pub fn usage_ratio(&self) -> f64 {
        if self.quota_bytes <= 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.quota_bytes as f64
    }
}

/// Forwarding protocol of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Both,
}

impl Protocol {
    /// Parse a stored protocol string; unknown values fall back to `Tcp`.
    pub fn parse(s: &str) -> Self {
        match s {
            "udp" => Self::Udp,
            "both" => Self::Both,
            _ => Self::Tcp,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Both => "both",
        }
    }

    #[inline]
    pub fn wants_tcp(&self) -> bool {
        matches!(self, Self::Tcp | Self::Both)
    }

    #[inline]
    pub fn wants_udp(&self) -> bool {
        matches!(self, Self::Udp | Self::Both)
    }
}

/// A port-forwarding rule as read from the store.
///
/// There is no persisted "active" flag: activity is always computed from
/// (rule, owning user, global policy) via [`compute_active`], so stored and
/// effective state cannot diverge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardRule {
    pub id: i64,
    pub user_id: i64,
    /// Globally unique listening port.
    pub source_port: u16,
    /// Destination as `host:port`.
    pub target_address: String,
    pub protocol: Protocol,
    /// Accounted usage attributed to this rule.
    pub used_bytes: i64,
}

/// Runtime-mutable global access policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalPolicy {
    /// Global kill switch for non-admin forwarding.
    pub forwarding_enabled: bool,
    /// When false, non-admin services bind loopback only.
    pub public_bind: bool,
}

impl Default for GlobalPolicy {
    fn default() -> Self {
        Self {
            forwarding_enabled: true,
            public_bind: false,
        }
    }
}

/// An accounted byte delta for one service, derived from consecutive
/// cumulative counter snapshots. Exists only for the duration of one
/// ingestion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficDelta {
    pub service_key: String,
    pub input_bytes: i64,
    pub output_bytes: i64,
    /// Unix timestamp of the snapshot this delta was derived from.
    pub at: i64,
}

impl TrafficDelta {
    #[inline]
    pub fn total(&self) -> i64 {
        self.input_bytes + self.output_bytes
    }
}

/// Compute whether a rule is currently active.
///
/// Pure function of (rule, owning user, global policy) and the current unix
/// time, with no storage access. Evaluation order mirrors the quota decision
/// ladder: admins are exempt from the kill switch, expiry, quota, and port
/// restrictions.
pub fn compute_active(rule: &ForwardRule, user: &User, policy: &GlobalPolicy, now: i64) -> bool {
    if rule.user_id != user.id {
        return false;
    }
    if user.is_admin() {
        return true;
    }
    if !policy.forwarding_enabled {
        return false;
    }
    if user.status != UserStatus::Active {
        return false;
    }
    if user.expired_at(now) {
        return false;
    }
    if user.has_quota() && user.used_bytes >= user.quota_bytes {
        return false;
    }
    user.allows_port(rule.source_port)
}

/// Current unix timestamp in seconds.
#[inline]
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
