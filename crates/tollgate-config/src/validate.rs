//! Startup validation of a loaded configuration.
//!
//! Everything here rejects configs that would otherwise fail at runtime
//! in a less obvious place.

use std::net::SocketAddr;

use crate::loader::ConfigError;
use crate::types::{ControlConfig, RestartMode};

fn fail(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

pub fn validate_config(config: &ControlConfig) -> Result<(), ConfigError> {
    // Server
    config
        .server
        .listen
        .parse::<SocketAddr>()
        .map_err(|e| fail(format!("server.listen '{}': {}", config.server.listen, e)))?;
    if !config.server.public_url.starts_with("http://")
        && !config.server.public_url.starts_with("https://")
    {
        return Err(fail("server.public_url must be an http(s) URL"));
    }
    if config.server.callback_timeout_ms == 0 {
        return Err(fail("server.callback_timeout_ms must be > 0"));
    }
    if config.server.unlimited_rate_bps <= 0 {
        return Err(fail("server.unlimited_rate_bps must be > 0"));
    }

    // Store
    if config.store.url.is_empty() {
        return Err(fail("store.url is required"));
    }
    let url = &config.store.url;
    if !url.starts_with("postgres://")
        && !url.starts_with("postgresql://")
        && !url.starts_with("mysql://")
        && !url.starts_with("mariadb://")
        && !url.starts_with("sqlite:")
    {
        return Err(fail(
            "store.url must use a postgres://, mysql://, or sqlite: scheme",
        ));
    }
    if config.store.max_connections == 0 {
        return Err(fail("store.max_connections must be > 0"));
    }
    if config.store.min_connections > config.store.max_connections {
        return Err(fail("store.min_connections exceeds max_connections"));
    }

    // Caches
    if config.portmap.ttl_secs == 0 {
        return Err(fail("portmap.ttl_secs must be > 0"));
    }
    if config.quota.decision_ttl_secs == 0 {
        return Err(fail("quota.decision_ttl_secs must be > 0"));
    }
    if !(config.quota.warn_ratio > 0.0 && config.quota.warn_ratio <= 1.0) {
        return Err(fail("quota.warn_ratio must be in (0, 1]"));
    }

    // Ingest
    if config.ingest.retry_queue_capacity == 0 {
        return Err(fail("ingest.retry_queue_capacity must be > 0"));
    }
    if config.ingest.significant_delta_bytes <= 0 {
        return Err(fail("ingest.significant_delta_bytes must be > 0"));
    }

    // Monitor
    if config.monitor.enabled {
        if config.monitor.tick_secs == 0 {
            return Err(fail("monitor.tick_secs must be > 0"));
        }
        if config.monitor.growth_threshold_bytes <= 0 {
            return Err(fail("monitor.growth_threshold_bytes must be > 0"));
        }
    }

    // Sync
    if config.sync.config_path.is_empty() {
        return Err(fail("sync.config_path is required"));
    }
    if config.sync.reconcile_interval_secs == 0 {
        return Err(fail("sync.reconcile_interval_secs must be > 0"));
    }
    let restart = &config.sync.restart;
    if restart.mode == RestartMode::Command && restart.command.is_empty() {
        return Err(fail("sync.restart.command is required in command mode"));
    }
    if restart.multiplier < 1.0 {
        return Err(fail("sync.restart.multiplier must be >= 1.0"));
    }
    if restart.max_delay_ms < restart.initial_delay_ms {
        return Err(fail("sync.restart.max_delay_ms below initial_delay_ms"));
    }
    if restart.max_attempts == 0 {
        return Err(fail("sync.restart.max_attempts must be >= 1"));
    }

    // Metrics
    if let Some(listen) = &config.metrics.listen {
        listen
            .parse::<SocketAddr>()
            .map_err(|e| fail(format!("metrics.listen '{listen}': {e}")))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ControlConfig {
        let mut config = ControlConfig::default();
        config.store.url = "sqlite:control.db".to_string();
        config
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_store_url() {
        let mut config = valid_config();
        config.store.url = String::new();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_bad_store_scheme() {
        let mut config = valid_config();
        config.store.url = "redis://localhost".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_bad_listen_addr() {
        let mut config = valid_config();
        config.server.listen = "not-an-addr".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_command_mode_requires_command() {
        let mut config = valid_config();
        config.sync.restart.mode = RestartMode::Command;
        assert!(validate_config(&config).is_err());

        config.sync.restart.command = vec!["systemctl".into(), "restart".into(), "gost".into()];
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_warn_ratio_bounds() {
        let mut config = valid_config();
        config.quota.warn_ratio = 0.0;
        assert!(validate_config(&config).is_err());
        config.quota.warn_ratio = 1.5;
        assert!(validate_config(&config).is_err());
        config.quota.warn_ratio = 1.0;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_backoff_sanity() {
        let mut config = valid_config();
        config.sync.restart.multiplier = 0.5;
        assert!(validate_config(&config).is_err());

        let mut config = valid_config();
        config.sync.restart.max_delay_ms = 10;
        config.sync.restart.initial_delay_ms = 100;
        assert!(validate_config(&config).is_err());
    }
}
