//! # tollgate
//!
//! A quota and configuration control plane for external traffic forwarders.
//!
//! The forwarder moves the bytes; this crate decides who may move them. It
//! answers the forwarder's per-connection callbacks, converts its cumulative
//! traffic counters into accounted usage, and keeps its configuration file in
//! sync with the stored rule set.
//!
//! ## Crates
//!
//! - [`tollgate_core`] - Domain types, events, and defaults
//! - [`tollgate_config`] - Configuration loading and validation
//! - [`tollgate_store`] - Storage trait, SQL backend, in-memory test store
//! - [`tollgate_portmap`] - Port→user mapping cache
//! - [`tollgate_quota`] - Quota decisions and the decision cache
//! - [`tollgate_traffic`] - Traffic accounting and the emergency monitor
//! - [`tollgate_sync`] - Forwarder configuration rendering and sync
//! - [`tollgate_metrics`] - Prometheus-compatible metrics
//! - [`tollgate_server`] - Callback and admin-event HTTP server

pub use tollgate_config as config;
pub use tollgate_core as core;
pub use tollgate_metrics as metrics;
pub use tollgate_portmap as portmap;
pub use tollgate_quota as quota;
pub use tollgate_server as server;
pub use tollgate_store as store;
pub use tollgate_sync as sync;
pub use tollgate_traffic as traffic;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use tollgate_config::{ControlConfig, load_config, validate_config};
    pub use tollgate_core::{CheckReason, ControlEvent, EventBus, QuotaDecision};
    pub use tollgate_server::{CancellationToken, ServerError, run_with_shutdown};
    pub use tollgate_store::{ControlStore, MemoryStore, SqlStore};
}
