//! Configuration for the tollgate control plane.
//!
//! Supports JSON (with comments), YAML, and TOML files, selected by file
//! extension, plus a small set of CLI overrides applied on top.

mod defaults;
mod loader;
mod overrides;
mod types;
mod validate;

pub use loader::{ConfigError, load_config};
pub use overrides::{CliOverrides, apply_overrides};
pub use types::{
    ControlConfig, IngestConfig, LoggingConfig, MetricsConfig, MonitorConfig, PortmapConfig,
    QuotaConfig, RestartConfig, RestartMode, ServerConfig, StoreConfig, SyncConfig,
};
pub use validate::validate_config;
