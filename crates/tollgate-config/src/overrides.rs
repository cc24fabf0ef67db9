//! CLI overrides applied on top of a loaded configuration file.

use clap::Args;

use crate::types::ControlConfig;

/// Flags that override individual config values.
#[derive(Args, Debug, Clone, Default)]
pub struct CliOverrides {
    /// Override server.listen
    #[arg(long)]
    pub listen: Option<String>,

    /// Override store.url
    #[arg(long = "store-url")]
    pub store_url: Option<String>,

    /// Override sync.config_path
    #[arg(long = "forwarder-config")]
    pub forwarder_config: Option<String>,

    /// Override logging.level
    #[arg(long = "log-level")]
    pub log_level: Option<String>,

    /// Override metrics.listen
    #[arg(long = "metrics-listen")]
    pub metrics_listen: Option<String>,
}

pub fn apply_overrides(config: &mut ControlConfig, overrides: &CliOverrides) {
    if let Some(listen) = &overrides.listen {
        config.server.listen = listen.clone();
    }
    if let Some(url) = &overrides.store_url {
        config.store.url = url.clone();
    }
    if let Some(path) = &overrides.forwarder_config {
        config.sync.config_path = path.clone();
    }
    if let Some(level) = &overrides.log_level {
        config.logging.level = Some(level.clone());
    }
    if let Some(listen) = &overrides.metrics_listen {
        config.metrics.listen = Some(listen.clone());
    }
}
