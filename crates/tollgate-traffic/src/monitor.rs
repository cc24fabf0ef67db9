//! Emergency traffic monitor.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tollgate_core::{CheckReason, ControlEvent, EventBus, defaults};
use tollgate_quota::QuotaCoordinator;
use tracing::{debug, info, warn};

/// Monitor tuning.
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    /// Scan interval.
    pub tick: Duration,
    /// Accounted growth per tick at or above which a forced quota refresh
    /// is triggered.
    pub growth_threshold_bytes: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(defaults::DEFAULT_MONITOR_TICK_SECS),
            growth_threshold_bytes: defaults::DEFAULT_GROWTH_THRESHOLD_BYTES,
        }
    }
}

/// Watches accounted growth between quota rechecks.
///
/// Consumes `TrafficAccounted` events into a per-user accumulator, so each
/// tick scans only users with recent ingestion activity. Fast growth is a
/// signal to recheck early, never a cause for denial on its own: the
/// monitor forces a quota refresh, and only a refreshed decision that comes
/// back denied triggers the out-of-band disable (via the `QuotaChanged`
/// edge the coordinator publishes). A user who grows fast but stays under
/// quota is logged and left alone.
pub struct EmergencyMonitor {
    quota: Arc<QuotaCoordinator>,
    /// Bytes accounted per user since the last scan.
    growth: DashMap<i64, i64>,
    threshold: i64,
    tick: Duration,
}

impl EmergencyMonitor {
    pub fn new(quota: Arc<QuotaCoordinator>, config: MonitorConfig) -> Self {
        Self {
            quota,
            growth: DashMap::new(),
            threshold: config.growth_threshold_bytes,
            tick: config.tick,
        }
    }

    /// Record accounted bytes for a user.
    pub fn note_traffic(&self, user_id: i64, bytes: i64) {
        if bytes > 0 {
            *self.growth.entry(user_id).or_insert(0) += bytes;
        }
    }

    /// Scan accumulated growth and force refreshes where justified.
    ///
    /// Drains the accumulator: growth is always "since the last scan".
    /// Returns the number of refreshes triggered.
    pub async fn scan_once(&self) -> usize {
        let users: Vec<i64> = self.growth.iter().map(|e| *e.key()).collect();
        let mut refreshed = 0;

        for user_id in users {
            let Some((_, grown)) = self.growth.remove(&user_id) else {
                continue;
            };
            if grown < self.threshold {
                continue;
            }

            tollgate_metrics::record_monitor_refresh();
            refreshed += 1;
            let decision = self
                .quota
                .force_refresh(user_id, CheckReason::EmergencyGrowth)
                .await;

            if decision.is_denied() {
                // The refresh itself published the QuotaChanged edge that
                // disables the user's rules; here we only account for it.
                tollgate_metrics::record_emergency_disable();
                warn!(
                    user_id,
                    grown,
                    reason = decision.reason_str(),
                    "fast growth confirmed over quota; rules disabled"
                );
            } else {
                info!(
                    user_id,
                    grown,
                    usage = decision.usage_percent,
                    "fast growth but still within quota; flagged only"
                );
            }
        }

        refreshed
    }

    /// Number of users with unscanned growth.
    pub fn pending_users(&self) -> usize {
        self.growth.len()
    }

    /// Run the monitor until shutdown.
    pub fn spawn(
        self: &Arc<Self>,
        bus: &EventBus,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let monitor = Arc::clone(self);
        let mut events = bus.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first interval tick fires immediately; skip it so the
            // first scan covers a full window.
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        monitor.scan_once().await;
                    }
                    event = events.recv() => match event {
                        Ok(ControlEvent::TrafficAccounted(ev)) => {
                            monitor.note_traffic(ev.user_id, ev.total());
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "event stream lagged; some growth went unobserved");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!("emergency monitor stopped");
        })
    }
}

impl std::fmt::Debug for EmergencyMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmergencyMonitor")
            .field("pending_users", &self.growth.len())
            .field("threshold", &self.threshold)
            .field("tick", &self.tick)
            .finish_non_exhaustive()
    }
}
