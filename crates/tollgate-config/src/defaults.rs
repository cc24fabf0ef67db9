//! Default value functions for serde deserialization.
//!
//! These functions forward to constants defined in `tollgate_core::defaults`.

use tollgate_core::defaults;

/// Generate default value functions that forward to tollgate_core::defaults constants.
macro_rules! default_fns {
    ($($fn_name:ident => $const_name:ident : $ty:ty),* $(,)?) => {
        $(
            pub(crate) fn $fn_name() -> $ty {
                defaults::$const_name
            }
        )*
    };
}

/// Generate default value functions that return String from &str constants.
macro_rules! default_string_fns {
    ($($fn_name:ident => $const_name:ident),* $(,)?) => {
        $(
            pub(crate) fn $fn_name() -> String {
                defaults::$const_name.to_string()
            }
        )*
    };
}

default_fns! {
    default_callback_timeout_ms     => DEFAULT_CALLBACK_TIMEOUT_MS: u64,
    default_unlimited_rate_bps      => DEFAULT_UNLIMITED_RATE_BPS: i64,
    default_portmap_ttl_secs        => DEFAULT_PORTMAP_TTL_SECS: u64,
    default_portmap_neg_ttl_secs    => DEFAULT_PORTMAP_NEG_TTL_SECS: u64,
    default_decision_ttl_secs       => DEFAULT_DECISION_TTL_SECS: u64,
    default_min_recheck_secs        => DEFAULT_MIN_RECHECK_SECS: u64,
    default_warn_ratio              => DEFAULT_WARN_RATIO: f64,
    default_store_retry_delay_ms    => DEFAULT_STORE_RETRY_DELAY_MS: u64,
    default_significant_delta_bytes => DEFAULT_SIGNIFICANT_DELTA_BYTES: i64,
    default_retry_queue_capacity    => DEFAULT_RETRY_QUEUE_CAPACITY: usize,
    default_retry_delay_ms          => DEFAULT_RETRY_DELAY_MS: u64,
    default_monitor_tick_secs       => DEFAULT_MONITOR_TICK_SECS: u64,
    default_growth_threshold_bytes  => DEFAULT_GROWTH_THRESHOLD_BYTES: i64,
    default_reconcile_interval_secs => DEFAULT_RECONCILE_INTERVAL_SECS: u64,
    default_restart_initial_delay_ms => DEFAULT_RESTART_INITIAL_DELAY_MS: u64,
    default_restart_multiplier      => DEFAULT_RESTART_MULTIPLIER: f64,
    default_restart_max_delay_ms    => DEFAULT_RESTART_MAX_DELAY_MS: u64,
    default_restart_max_attempts    => DEFAULT_RESTART_MAX_ATTEMPTS: u32,
    default_event_bus_capacity      => DEFAULT_EVENT_BUS_CAPACITY: usize,
}

default_string_fns! {
    default_listen     => DEFAULT_LISTEN,
    default_public_url => DEFAULT_PUBLIC_URL,
}

// Pool sizing and file defaults are local to the config layer.

pub(crate) fn default_max_connections() -> u32 {
    10
}

pub(crate) fn default_min_connections() -> u32 {
    1
}

pub(crate) fn default_connect_timeout_secs() -> u64 {
    10
}

pub(crate) fn default_idle_timeout_secs() -> u64 {
    600
}

pub(crate) fn default_max_lifetime_secs() -> u64 {
    1_800
}

pub(crate) fn default_forwarder_config_path() -> String {
    "forwarder.json".to_string()
}

pub(crate) fn default_true() -> bool {
    true
}
