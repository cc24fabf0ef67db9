//! Shared handler state.

use std::sync::Arc;

use tokio::time::Duration;
use tollgate_core::{EventBus, defaults};
use tollgate_portmap::PortMapCache;
use tollgate_quota::QuotaCoordinator;
use tollgate_store::ControlStore;
use tollgate_sync::SyncCoordinator;
use tollgate_traffic::TrafficIngestor;

/// Everything the callback and admin handlers need.
///
/// All members are cheaply cloneable handles; the handlers themselves hold
/// no state of their own.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ControlStore>,
    pub portmap: Arc<PortMapCache>,
    pub quota: Arc<QuotaCoordinator>,
    pub ingestor: Arc<TrafficIngestor>,
    pub sync: Arc<SyncCoordinator>,
    pub bus: EventBus,
    /// Budget for answering one forwarder callback. Exceeding it fails
    /// closed; the forwarder treats a slow plugin as failed anyway.
    pub callback_timeout: Duration,
    /// Rate reported for users without a configured bandwidth cap.
    pub unlimited_rate_bps: i64,
}

impl AppState {
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ControlStore>,
        portmap: Arc<PortMapCache>,
        quota: Arc<QuotaCoordinator>,
        ingestor: Arc<TrafficIngestor>,
        sync: Arc<SyncCoordinator>,
        bus: EventBus,
        callback_timeout: Duration,
        unlimited_rate_bps: i64,
    ) -> Self {
        Self {
            store,
            portmap,
            quota,
            ingestor,
            sync,
            bus,
            callback_timeout,
            unlimited_rate_bps,
        }
    }

    /// Default callback budget and unlimited-rate sentinel.
    pub fn with_defaults(
        store: Arc<dyn ControlStore>,
        portmap: Arc<PortMapCache>,
        quota: Arc<QuotaCoordinator>,
        ingestor: Arc<TrafficIngestor>,
        sync: Arc<SyncCoordinator>,
        bus: EventBus,
    ) -> Self {
        Self::new(
            store,
            portmap,
            quota,
            ingestor,
            sync,
            bus,
            Duration::from_millis(defaults::DEFAULT_CALLBACK_TIMEOUT_MS),
            defaults::DEFAULT_UNLIMITED_RATE_BPS,
        )
    }
}
