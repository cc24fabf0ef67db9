//! Component wiring and the HTTP server loop.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tollgate_config::{ControlConfig, RestartMode};
use tollgate_core::EventBus;
use tollgate_portmap::{PortMapCache, PortMapConfig};
use tollgate_quota::{CoordinatorConfig, QuotaCoordinator};
use tollgate_store::{ControlStore, SqlStore, SqlStoreConfig};
use tollgate_sync::{
    CommandControl, ForwarderControl, NoopControl, RestartBackoff, SyncCoordinator, SyncSettings,
};
use tollgate_traffic::{EmergencyMonitor, IngestorConfig, TrafficIngestor};
use tracing::{info, warn};

use crate::admin::{handle_healthz, handle_quota_reset, handle_rule_changed, handle_user_changed};
use crate::callbacks::{handle_auth, handle_limiter, handle_observer};
use crate::error::ServerError;
use crate::state::AppState;

/// Connect the SQL store described by the configuration.
pub async fn connect_store(config: &ControlConfig) -> Result<Arc<dyn ControlStore>, ServerError> {
    if config.store.url.is_empty() {
        return Err(ServerError::Config(
            "store.url is required to serve".to_string(),
        ));
    }
    let store = SqlStore::connect(
        SqlStoreConfig::new(&config.store.url)
            .max_connections(config.store.max_connections)
            .min_connections(config.store.min_connections)
            .connect_timeout(Duration::from_secs(config.store.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.store.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.store.max_lifetime_secs)),
    )
    .await?;
    Ok(Arc::new(store))
}

/// Construct every coordinator around `store` and bundle them as the
/// handler state.
pub fn build_state(config: &ControlConfig, store: Arc<dyn ControlStore>) -> AppState {
    let bus = EventBus::default();

    let portmap = Arc::new(PortMapCache::new(
        Arc::clone(&store),
        PortMapConfig {
            ttl: Duration::from_secs(config.portmap.ttl_secs),
            negative_ttl: Duration::from_secs(config.portmap.negative_ttl_secs),
        },
    ));

    let quota = Arc::new(QuotaCoordinator::new(
        Arc::clone(&store),
        bus.clone(),
        CoordinatorConfig {
            decision_ttl: Duration::from_secs(config.quota.decision_ttl_secs),
            min_recheck: Duration::from_secs(config.quota.min_recheck_secs),
            warn_ratio: config.quota.warn_ratio,
            store_retry_delay: Duration::from_millis(config.quota.store_retry_delay_ms),
        },
    ));

    let ingestor = Arc::new(TrafficIngestor::new(
        Arc::clone(&store),
        Arc::clone(&portmap),
        Arc::clone(&quota),
        bus.clone(),
        IngestorConfig {
            significant_delta_bytes: config.ingest.significant_delta_bytes,
            retry_queue_capacity: config.ingest.retry_queue_capacity,
            retry_delay: Duration::from_millis(config.ingest.retry_delay_ms),
        },
    ));

    let control: Arc<dyn ForwarderControl> = match config.sync.restart.mode {
        RestartMode::Command => Arc::new(CommandControl::new(config.sync.restart.command.clone())),
        RestartMode::None => Arc::new(NoopControl),
    };
    let sync = Arc::new(SyncCoordinator::new(
        Arc::clone(&store),
        control,
        SyncSettings {
            config_path: config.sync.config_path.clone().into(),
            public_url: config.server.public_url.clone(),
            reconcile_interval: Duration::from_secs(config.sync.reconcile_interval_secs),
            backoff: RestartBackoff {
                initial_delay: Duration::from_millis(config.sync.restart.initial_delay_ms),
                multiplier: config.sync.restart.multiplier,
                max_delay: Duration::from_millis(config.sync.restart.max_delay_ms),
                max_attempts: config.sync.restart.max_attempts,
            },
        },
    ));

    AppState::new(
        store,
        portmap,
        quota,
        ingestor,
        sync,
        bus,
        Duration::from_millis(config.server.callback_timeout_ms),
        config.server.unlimited_rate_bps,
    )
}

/// Start the background tasks: port map rule listener, ingest retry
/// worker, sync driver, and (when enabled) the emergency monitor.
pub fn spawn_background(
    state: &AppState,
    config: &ControlConfig,
    shutdown: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let mut tasks = vec![
        state
            .portmap
            .spawn_rule_listener(&state.bus, shutdown.child_token()),
        state.ingestor.spawn_retry_worker(shutdown.child_token()),
        state.sync.spawn(&state.bus, shutdown.child_token()),
    ];

    if config.monitor.enabled {
        let monitor = Arc::new(EmergencyMonitor::new(
            Arc::clone(&state.quota),
            tollgate_traffic::MonitorConfig {
                tick: Duration::from_secs(config.monitor.tick_secs),
                growth_threshold_bytes: config.monitor.growth_threshold_bytes,
            },
        ));
        tasks.push(monitor.spawn(&state.bus, shutdown.child_token()));
    }

    tasks
}

/// Build the callback/admin router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/auth", post(handle_auth))
        .route("/limiter", post(handle_limiter))
        .route("/observer", post(handle_observer))
        .route("/events/quota-reset", post(handle_quota_reset))
        .route("/events/user-changed", post(handle_user_changed))
        .route("/events/rule-changed", post(handle_rule_changed))
        .route("/healthz", get(handle_healthz))
        .with_state(state)
}

/// Run the control plane against the configured SQL store until shutdown.
pub async fn run_with_shutdown(
    config: ControlConfig,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let store = connect_store(&config).await?;
    run_with_store(config, store, shutdown).await
}

/// Run the control plane on a caller-provided store.
pub async fn run_with_store(
    config: ControlConfig,
    store: Arc<dyn ControlStore>,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let state = build_state(&config, store);

    // Warm the port map so the first callbacks are cache hits. Failure is
    // not fatal; the first lookup rebuilds.
    if let Err(e) = state.portmap.refresh().await {
        warn!(error = %e, "initial port map build failed");
    }

    let tasks = spawn_background(&state, &config, &shutdown);

    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    info!(listen = %config.server.listen, "control plane listening");

    let served = axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await;

    // Stop background tasks whether the server exited cleanly or not
    shutdown.cancel();
    for task in tasks {
        let _ = task.await;
    }
    served?;
    info!("control plane stopped");
    Ok(())
}
