//! Configuration type definitions for the control-plane server, store,
//! caches, monitor, sync, metrics, and logging.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::defaults::*;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub portmap: PortmapConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Callback/admin HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address for forwarder callbacks and admin events.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Base URL the forwarder uses to reach this process; rendered into
    /// the callback endpoints of every service.
    #[serde(default = "default_public_url")]
    pub public_url: String,
    /// Per-callback response budget in milliseconds. Handlers that exceed
    /// it fail closed.
    #[serde(default = "default_callback_timeout_ms")]
    pub callback_timeout_ms: u64,
    /// Rate reported for users without a bandwidth cap (0 would mean
    /// "block", so unlimited needs a sentinel).
    #[serde(default = "default_unlimited_rate_bps")]
    pub unlimited_rate_bps: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            public_url: default_public_url(),
            callback_timeout_ms: default_callback_timeout_ms(),
            unlimited_rate_bps: default_unlimited_rate_bps(),
        }
    }
}

/// Backing store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database URL (postgres://, mysql://, sqlite:).
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_lifetime_secs: default_max_lifetime_secs(),
        }
    }
}

/// Port→user mapping cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortmapConfig {
    /// Snapshot TTL in seconds; a stale snapshot is rebuilt on next lookup.
    #[serde(default = "default_portmap_ttl_secs")]
    pub ttl_secs: u64,
    /// TTL for negative entries (ports known to map to nothing).
    #[serde(default = "default_portmap_neg_ttl_secs")]
    pub negative_ttl_secs: u64,
}

impl Default for PortmapConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_portmap_ttl_secs(),
            negative_ttl_secs: default_portmap_neg_ttl_secs(),
        }
    }
}

/// Quota decision cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Decision TTL in seconds.
    #[serde(default = "default_decision_ttl_secs")]
    pub decision_ttl_secs: u64,
    /// Minimum interval between recomputations for one user.
    #[serde(default = "default_min_recheck_secs")]
    pub min_recheck_secs: u64,
    /// Usage ratio at which allowed decisions carry a warning.
    #[serde(default = "default_warn_ratio")]
    pub warn_ratio: f64,
    /// Delay before the single retry of a failed store read.
    #[serde(default = "default_store_retry_delay_ms")]
    pub store_retry_delay_ms: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            decision_ttl_secs: default_decision_ttl_secs(),
            min_recheck_secs: default_min_recheck_secs(),
            warn_ratio: default_warn_ratio(),
            store_retry_delay_ms: default_store_retry_delay_ms(),
        }
    }
}

/// Traffic ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Accounted delta above which an early quota recheck is requested.
    #[serde(default = "default_significant_delta_bytes")]
    pub significant_delta_bytes: i64,
    /// Capacity of the unknown-port retry queue.
    #[serde(default = "default_retry_queue_capacity")]
    pub retry_queue_capacity: usize,
    /// Delay before retrying an event whose port was unknown.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            significant_delta_bytes: default_significant_delta_bytes(),
            retry_queue_capacity: default_retry_queue_capacity(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Emergency traffic monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Scan interval in seconds.
    #[serde(default = "default_monitor_tick_secs")]
    pub tick_secs: u64,
    /// Accounted growth per tick that triggers a forced refresh.
    #[serde(default = "default_growth_threshold_bytes")]
    pub growth_threshold_bytes: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: default_monitor_tick_secs(),
            growth_threshold_bytes: default_growth_threshold_bytes(),
        }
    }
}

/// How the forwarder is told to pick up a new configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartMode {
    /// Run an external command (e.g. `systemctl restart gost`).
    Command,
    /// Only write the rendered file; the forwarder watches it itself.
    None,
}

impl Default for RestartMode {
    fn default() -> Self {
        Self::None
    }
}

/// Forwarder restart settings, including the retry backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartConfig {
    #[serde(default)]
    pub mode: RestartMode,
    /// Restart command argv; required when mode = "command".
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default = "default_restart_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_restart_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_restart_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_restart_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            mode: RestartMode::None,
            command: Vec::new(),
            initial_delay_ms: default_restart_initial_delay_ms(),
            multiplier: default_restart_multiplier(),
            max_delay_ms: default_restart_max_delay_ms(),
            max_attempts: default_restart_max_attempts(),
        }
    }
}

/// Configuration sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Path the rendered forwarder configuration is written to.
    #[serde(default = "default_forwarder_config_path")]
    pub config_path: String,
    /// Periodic reconciliation sweep interval in seconds.
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    #[serde(default)]
    pub restart: RestartConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            config_path: default_forwarder_config_path(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
            restart: RestartConfig::default(),
        }
    }
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Exporter listen address (None = disabled).
    #[serde(default)]
    pub listen: Option<String>,
}

/// Logging settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base log level (trace, debug, info, warn, error).
    #[serde(default)]
    pub level: Option<String>,
    /// Output format (json, pretty, compact).
    #[serde(default)]
    pub format: Option<String>,
    /// Output target (stdout, stderr).
    #[serde(default)]
    pub output: Option<String>,
    /// Per-module level overrides.
    #[serde(default)]
    pub filters: HashMap<String, String>,
}
