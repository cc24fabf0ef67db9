//! Default values shared between config parsing and component constructors.

/// Default control-plane listen address (callbacks + admin events).
pub const DEFAULT_LISTEN: &str = "127.0.0.1:7070";

/// Default base URL rendered into forwarder callback endpoints.
pub const DEFAULT_PUBLIC_URL: &str = "http://127.0.0.1:7070";

/// Budget for answering a forwarder callback, in milliseconds.
///
/// The forwarder treats a slow plugin as failed, so every callback handler
/// must respond inside this window or fail closed.
pub const DEFAULT_CALLBACK_TIMEOUT_MS: u64 = 200;

/// Rate (bytes/sec) reported to the forwarder for users without a
/// configured bandwidth cap. `0` means "block", so unlimited needs a
/// large sentinel instead.
pub const DEFAULT_UNLIMITED_RATE_BPS: i64 = 1 << 30;

/// Port mapping snapshot TTL in seconds.
pub const DEFAULT_PORTMAP_TTL_SECS: u64 = 30;

/// Negative-entry TTL for ports that resolved to nothing, in seconds.
pub const DEFAULT_PORTMAP_NEG_TTL_SECS: u64 = 5;

/// Quota decision TTL in seconds.
pub const DEFAULT_DECISION_TTL_SECS: u64 = 60;

/// Minimum interval between recomputations for one user, in seconds.
pub const DEFAULT_MIN_RECHECK_SECS: u64 = 10;

/// Usage ratio at which an allowed decision carries a warning.
pub const DEFAULT_WARN_RATIO: f64 = 0.95;

/// Delay before retrying a failed store read during a quota check, in
/// milliseconds.
pub const DEFAULT_STORE_RETRY_DELAY_MS: u64 = 100;

/// Accounted delta (bytes) above which the ingestor requests an early
/// quota recheck.
pub const DEFAULT_SIGNIFICANT_DELTA_BYTES: i64 = 50 * 1024 * 1024;

/// Capacity of the unknown-port retry queue.
pub const DEFAULT_RETRY_QUEUE_CAPACITY: usize = 1024;

/// Delay before retrying an event whose port was unknown, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 3_000;

/// Emergency monitor tick interval in seconds.
pub const DEFAULT_MONITOR_TICK_SECS: u64 = 30;

/// Accounted growth per tick (bytes) that triggers a forced quota refresh.
pub const DEFAULT_GROWTH_THRESHOLD_BYTES: i64 = 200 * 1024 * 1024;

/// Periodic reconciliation sweep interval in seconds.
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 300;

/// Initial delay before retrying a failed forwarder restart, in milliseconds.
pub const DEFAULT_RESTART_INITIAL_DELAY_MS: u64 = 1_000;

/// Multiplier applied to the restart retry delay after each failure.
pub const DEFAULT_RESTART_MULTIPLIER: f64 = 2.0;

/// Upper bound on the restart retry delay, in milliseconds.
pub const DEFAULT_RESTART_MAX_DELAY_MS: u64 = 30_000;

/// Maximum restart attempts per sync before giving up until the next trigger.
pub const DEFAULT_RESTART_MAX_ATTEMPTS: u32 = 5;

/// Capacity of the internal event bus.
pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 1024;
