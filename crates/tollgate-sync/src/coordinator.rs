//! The configuration sync coordinator.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify, broadcast};
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tollgate_core::{ControlEvent, EventBus, defaults};
use tollgate_store::ControlStore;
use tracing::{debug, error, info, warn};

use crate::error::SyncError;
use crate::render::{ForwarderConfig, render};
use crate::restart::ForwarderControl;

/// Retry backoff for failed forwarder restarts.
#[derive(Debug, Clone, Copy)]
pub struct RestartBackoff {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Attempts per sync before giving up until the next trigger.
    pub max_attempts: u32,
}

impl Default for RestartBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(defaults::DEFAULT_RESTART_INITIAL_DELAY_MS),
            multiplier: defaults::DEFAULT_RESTART_MULTIPLIER,
            max_delay: Duration::from_millis(defaults::DEFAULT_RESTART_MAX_DELAY_MS),
            max_attempts: defaults::DEFAULT_RESTART_MAX_ATTEMPTS,
        }
    }
}

/// Sync coordinator tuning.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Where the rendered document is written.
    pub config_path: PathBuf,
    /// Base URL rendered into the callback endpoints.
    pub public_url: String,
    /// Periodic reconciliation sweep interval.
    pub reconcile_interval: Duration,
    pub backoff: RestartBackoff,
}

/// What a sync run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The document changed; it was written and the forwarder restarted.
    Applied,
    /// The rendered document matches the last applied one; no restart.
    Skipped,
}

/// Keeps the forwarder's configuration in sync with stored state.
///
/// Syncs are serialized through one internal lock; triggers arriving while
/// a sync is in flight coalesce into exactly one follow-up run, which
/// re-renders from the latest state, so a superseded desired state is never
/// applied. A periodic reconciliation sweep runs as a safety net against
/// lost triggers.
///
/// The forwarder is only restarted when the freshly rendered document
/// differs structurally from the last applied one; resyncing an unchanged
/// rule set issues zero restarts.
pub struct SyncCoordinator {
    store: Arc<dyn ControlStore>,
    control: Arc<dyn ForwarderControl>,
    settings: SyncSettings,
    /// Last successfully applied document. `None` until the first apply.
    last_applied: Mutex<Option<ForwarderConfig>>,
    trigger: Notify,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn ControlStore>,
        control: Arc<dyn ForwarderControl>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            control,
            settings,
            last_applied: Mutex::new(None),
            trigger: Notify::new(),
        }
    }

    /// Ask the driver to sync soon. Any number of requests while a sync is
    /// in flight collapse into a single follow-up run.
    pub fn request_sync(&self) {
        self.trigger.notify_one();
    }

    /// Render, diff, and apply once.
    ///
    /// A render or write failure leaves the last-known-good configuration
    /// active; nothing partial is ever written over it.
    pub async fn sync_once(&self) -> Result<SyncOutcome, SyncError> {
        let mut last = self.last_applied.lock().await;

        let rendered = match render(&self.store, &self.settings.public_url).await {
            Ok(config) => config,
            Err(e) => {
                tollgate_metrics::record_sync_run("failed");
                error!(error = %e, "config render failed; keeping last-known-good");
                return Err(e);
            }
        };

        if last.as_ref() == Some(&rendered) {
            tollgate_metrics::record_sync_run("skipped");
            debug!(services = rendered.len(), "config unchanged; no restart");
            return Ok(SyncOutcome::Skipped);
        }

        if let Err(e) = self.write_document(&rendered).await {
            tollgate_metrics::record_sync_run("failed");
            error!(error = %e, "config write failed; keeping last-known-good");
            return Err(e);
        }

        if let Err(e) = self.restart_with_backoff().await {
            // The file is written but the forwarder did not pick it up;
            // leaving last_applied unchanged makes the next trigger retry.
            tollgate_metrics::record_sync_run("failed");
            tollgate_metrics::record_restart_failure();
            error!(error = %e, "forwarder restart failed; will retry on next sync");
            return Err(e);
        }

        info!(services = rendered.len(), "forwarder configuration applied");
        tollgate_metrics::record_sync_run("applied");
        tollgate_metrics::set_active_services(rendered.len());
        *last = Some(rendered);
        Ok(SyncOutcome::Applied)
    }

    /// The last successfully applied document, if any.
    pub async fn last_applied(&self) -> Option<ForwarderConfig> {
        self.last_applied.lock().await.clone()
    }

    /// Run the sync driver until shutdown: one initial sync, then
    /// triggered and periodic runs.
    pub fn spawn(
        self: &Arc<Self>,
        bus: &EventBus,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let sync = Arc::clone(self);
        let mut events = bus.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sync.settings.reconcile_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            if let Err(e) = sync.sync_once().await {
                warn!(error = %e, "initial config sync failed");
            }

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = sync.trigger.notified() => {
                        if let Err(e) = sync.sync_once().await {
                            warn!(error = %e, "triggered config sync failed");
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = sync.sync_once().await {
                            warn!(error = %e, "reconciliation sweep failed");
                        }
                    }
                    event = events.recv() => match event {
                        Ok(ControlEvent::QuotaChanged(_) | ControlEvent::RuleChanged(_)) => {
                            sync.request_sync();
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "event stream lagged; forcing a sync");
                            sync.request_sync();
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!("sync driver stopped");
        })
    }

    /// Write the document atomically: temp file in the same directory,
    /// then rename over the target.
    async fn write_document(&self, config: &ForwarderConfig) -> Result<(), SyncError> {
        let path = &self.settings.config_path;
        let bytes = serde_json::to_vec_pretty(config)?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| SyncError::Write {
                path: tmp.display().to_string(),
                source: e,
            })?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| SyncError::Write {
                path: path.display().to_string(),
                source: e,
            })?;
        Ok(())
    }

    async fn restart_with_backoff(&self) -> Result<(), SyncError> {
        let backoff = self.settings.backoff;
        let mut delay = backoff.initial_delay;

        for attempt in 1..=backoff.max_attempts.max(1) {
            tollgate_metrics::record_sync_restart();
            match self.control.restart().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt == backoff.max_attempts.max(1) => return Err(e),
                Err(e) => {
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "forwarder restart failed; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    let next = delay.as_millis() as f64 * backoff.multiplier;
                    delay = Duration::from_millis(next as u64).min(backoff.max_delay);
                }
            }
        }
        unreachable!("restart loop returns on the final attempt")
    }
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("config_path", &self.settings.config_path)
            .field("reconcile_interval", &self.settings.reconcile_interval)
            .finish_non_exhaustive()
    }
}
