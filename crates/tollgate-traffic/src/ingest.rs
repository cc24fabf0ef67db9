//! Traffic event ingestion.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tollgate_core::{
    CheckReason, ControlEvent, EventBus, TrafficAccounted, defaults, now_unix, parse_service_port,
};
use tollgate_portmap::{PortMapCache, PortMapping};
use tollgate_quota::QuotaCoordinator;
use tollgate_store::ControlStore;
use tracing::{debug, warn};

use crate::delta::DeltaTracker;

/// One service's counters as reported by the forwarder. All counters are
/// cumulative since the service started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStats {
    pub service: String,
    pub input_bytes: i64,
    pub output_bytes: i64,
    pub total_conns: i64,
    pub total_errs: i64,
}

/// Ingestor tuning.
#[derive(Debug, Clone, Copy)]
pub struct IngestorConfig {
    /// Accounted delta at or above which an early quota recheck is
    /// requested for the owning user.
    pub significant_delta_bytes: i64,
    /// Capacity of the unknown-port retry queue.
    pub retry_queue_capacity: usize,
    /// How long a buffered event waits before its single retry.
    pub retry_delay: Duration,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            significant_delta_bytes: defaults::DEFAULT_SIGNIFICANT_DELTA_BYTES,
            retry_queue_capacity: defaults::DEFAULT_RETRY_QUEUE_CAPACITY,
            retry_delay: Duration::from_millis(defaults::DEFAULT_RETRY_DELAY_MS),
        }
    }
}

/// A delta whose port could not be resolved yet; retried once.
#[derive(Debug)]
struct PendingDelta {
    service: String,
    port: u16,
    input_bytes: i64,
    output_bytes: i64,
    at: i64,
}

/// Turns cumulative counter reports into accounted byte deltas.
///
/// The delta tracker is advanced before any store I/O, so retrying an
/// ingestion call recomputes deltas from last-seen state instead of
/// re-applying them. Accounting writes are atomic in-store increments; the
/// ingestor never reads usage back.
///
/// An event whose port has no mapping (typically a rule created moments
/// ago, racing the port map rebuild) is buffered once and retried after a
/// short delay, then dropped with a warning. Loss is bounded to one event
/// window because the next report's delta is computed against the already
/// advanced tracker state.
pub struct TrafficIngestor {
    store: Arc<dyn ControlStore>,
    portmap: Arc<PortMapCache>,
    quota: Arc<QuotaCoordinator>,
    bus: EventBus,
    tracker: DeltaTracker,
    significant_delta_bytes: i64,
    retry_delay: Duration,
    retry_tx: mpsc::Sender<PendingDelta>,
    retry_rx: Mutex<Option<mpsc::Receiver<PendingDelta>>>,
}

impl TrafficIngestor {
    pub fn new(
        store: Arc<dyn ControlStore>,
        portmap: Arc<PortMapCache>,
        quota: Arc<QuotaCoordinator>,
        bus: EventBus,
        config: IngestorConfig,
    ) -> Self {
        let (retry_tx, retry_rx) = mpsc::channel(config.retry_queue_capacity.max(1));
        Self {
            store,
            portmap,
            quota,
            bus,
            tracker: DeltaTracker::new(),
            significant_delta_bytes: config.significant_delta_bytes,
            retry_delay: config.retry_delay,
            retry_tx,
            retry_rx: Mutex::new(Some(retry_rx)),
        }
    }

    /// Ingest one observer batch.
    ///
    /// Never fails: unresolvable or unaccountable events are logged and
    /// dropped per event, so one bad service cannot block the rest of the
    /// batch.
    pub async fn ingest(&self, batch: &[ServiceStats]) {
        let at = now_unix();
        for stats in batch {
            let Some(port) = parse_service_port(&stats.service) else {
                warn!(service = %stats.service, "unrecognized service key; dropping event");
                tollgate_metrics::record_ingest_dropped();
                continue;
            };

            let delta = self
                .tracker
                .advance(&stats.service, stats.input_bytes, stats.output_bytes);
            if delta.reset {
                debug!(service = %stats.service, "counter reset detected; counting from zero");
            }
            if delta.total() == 0 {
                continue;
            }

            match self.portmap.lookup(port).await {
                Ok(Some(mapping)) => {
                    self.account(mapping, delta.input_bytes, delta.output_bytes, at)
                        .await;
                }
                Ok(None) => {
                    self.buffer(PendingDelta {
                        service: stats.service.clone(),
                        port,
                        input_bytes: delta.input_bytes,
                        output_bytes: delta.output_bytes,
                        at,
                    });
                }
                Err(e) => {
                    warn!(port, error = %e, "port lookup failed; buffering event");
                    self.buffer(PendingDelta {
                        service: stats.service.clone(),
                        port,
                        input_bytes: delta.input_bytes,
                        output_bytes: delta.output_bytes,
                        at,
                    });
                }
            }
        }
    }

    /// Retry buffered events whose port was unknown at ingestion time.
    ///
    /// Each pending event waits `retry_delay` and is then resolved once
    /// more; still-unknown ports drop the event with a warning.
    pub fn spawn_retry_worker(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let ingestor = Arc::clone(self);
        let Some(mut rx) = ingestor.retry_rx.lock().take() else {
            warn!("retry worker already running; second spawn does nothing");
            return tokio::spawn(async {});
        };
        tokio::spawn(async move {
            loop {
                let pending = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    pending = rx.recv() => match pending {
                        Some(pending) => pending,
                        None => break,
                    },
                };

                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(ingestor.retry_delay) => {}
                }

                match ingestor.portmap.lookup(pending.port).await {
                    Ok(Some(mapping)) => {
                        debug!(port = pending.port, "buffered event resolved on retry");
                        ingestor
                            .account(mapping, pending.input_bytes, pending.output_bytes, pending.at)
                            .await;
                    }
                    Ok(None) => {
                        warn!(
                            service = %pending.service,
                            port = pending.port,
                            bytes = pending.input_bytes + pending.output_bytes,
                            "port still unmapped after retry; dropping event"
                        );
                        tollgate_metrics::record_ingest_dropped();
                    }
                    Err(e) => {
                        warn!(
                            service = %pending.service,
                            port = pending.port,
                            error = %e,
                            "port lookup failed on retry; dropping event"
                        );
                        tollgate_metrics::record_ingest_dropped();
                    }
                }
            }
            debug!("ingest retry worker stopped");
        })
    }

    /// Number of services with tracked counters.
    pub fn tracked_services(&self) -> usize {
        self.tracker.len()
    }

    fn buffer(&self, pending: PendingDelta) {
        match self.retry_tx.try_send(pending) {
            Ok(()) => tollgate_metrics::record_ingest_buffered(),
            Err(e) => {
                let pending = match e {
                    mpsc::error::TrySendError::Full(p) => p,
                    mpsc::error::TrySendError::Closed(p) => p,
                };
                warn!(
                    service = %pending.service,
                    port = pending.port,
                    "retry queue unavailable; dropping event"
                );
                tollgate_metrics::record_ingest_dropped();
            }
        }
    }

    async fn account(&self, mapping: PortMapping, input_bytes: i64, output_bytes: i64, at: i64) {
        let total = input_bytes + output_bytes;
        if let Err(e) = self.store.add_user_traffic(mapping.user_id, total).await {
            warn!(user_id = mapping.user_id, error = %e, "user traffic increment failed");
            return;
        }
        if let Err(e) = self.store.add_rule_traffic(mapping.rule_id, total).await {
            warn!(rule_id = mapping.rule_id, error = %e, "rule traffic increment failed");
        }
        tollgate_metrics::record_ingest(1, total.max(0) as u64);

        self.bus
            .publish(ControlEvent::TrafficAccounted(TrafficAccounted {
                user_id: mapping.user_id,
                rule_id: mapping.rule_id,
                input_bytes,
                output_bytes,
                at,
            }));

        if total >= self.significant_delta_bytes {
            // Re-evaluate off the ingestion path; the decision itself is
            // not needed here.
            let quota = Arc::clone(&self.quota);
            let user_id = mapping.user_id;
            tokio::spawn(async move {
                quota
                    .check_quota(user_id, CheckReason::SignificantTraffic)
                    .await;
            });
        }
    }
}

impl std::fmt::Debug for TrafficIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrafficIngestor")
            .field("tracked_services", &self.tracker.len())
            .field("significant_delta_bytes", &self.significant_delta_bytes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use tollgate_core::{
        ForwardRule, PortRange, Protocol, User, UserRole, UserStatus, service_name,
    };
    use tollgate_portmap::PortMapConfig;
    use tollgate_quota::CoordinatorConfig;
    use tollgate_store::MemoryStore;

    use super::*;

    fn make_user(id: i64, quota: i64, used: i64) -> User {
        User {
            id,
            name: format!("user{id}"),
            role: UserRole::User,
            status: UserStatus::Active,
            quota_bytes: quota,
            used_bytes: used,
            expires_at: 0,
            port_range: Some(PortRange::new(10_000, 10_999)),
            extra_ports: Vec::new(),
            rate_in_bps: 0,
            rate_out_bps: 0,
        }
    }

    fn make_rule(id: i64, user_id: i64, port: u16) -> ForwardRule {
        ForwardRule {
            id,
            user_id,
            source_port: port,
            target_address: "10.0.0.5:443".to_string(),
            protocol: Protocol::Tcp,
            used_bytes: 0,
        }
    }

    fn stats(service: &str, input: i64, output: i64) -> ServiceStats {
        ServiceStats {
            service: service.to_string(),
            input_bytes: input,
            output_bytes: output,
            total_conns: 1,
            total_errs: 0,
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        portmap: Arc<PortMapCache>,
        quota: Arc<QuotaCoordinator>,
        bus: EventBus,
    }

    fn make_harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let bus = EventBus::new(64);
        let portmap = Arc::new(PortMapCache::new(
            Arc::clone(&store) as Arc<dyn ControlStore>,
            PortMapConfig::default(),
        ));
        let quota = Arc::new(QuotaCoordinator::new(
            Arc::clone(&store) as Arc<dyn ControlStore>,
            bus.clone(),
            CoordinatorConfig::default(),
        ));
        Harness {
            store,
            portmap,
            quota,
            bus,
        }
    }

    fn make_ingestor(h: &Harness, config: IngestorConfig) -> Arc<TrafficIngestor> {
        Arc::new(TrafficIngestor::new(
            Arc::clone(&h.store) as Arc<dyn ControlStore>,
            Arc::clone(&h.portmap),
            Arc::clone(&h.quota),
            h.bus.clone(),
            config,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ingest_accounts_user_and_rule() {
        let h = make_harness();
        h.store.insert_user(make_user(1, 0, 0));
        h.store.insert_rule(make_rule(5, 1, 10_100));
        let ingestor = make_ingestor(&h, IngestorConfig::default());

        ingestor
            .ingest(&[stats(&service_name(10_100), 100, 40)])
            .await;

        assert_eq!(h.store.used_bytes(1), Some(140));
        assert_eq!(h.store.rule_used_bytes(5), Some(140));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_batch_is_not_double_counted() {
        let h = make_harness();
        h.store.insert_user(make_user(1, 0, 0));
        h.store.insert_rule(make_rule(5, 1, 10_100));
        let ingestor = make_ingestor(&h, IngestorConfig::default());

        let batch = [stats(&service_name(10_100), 100, 40)];
        ingestor.ingest(&batch).await;
        ingestor.ingest(&batch).await;

        assert_eq!(h.store.used_bytes(1), Some(140));
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_reset_accounted_from_zero() {
        let h = make_harness();
        h.store.insert_user(make_user(1, 0, 0));
        h.store.insert_rule(make_rule(5, 1, 10_100));
        let ingestor = make_ingestor(&h, IngestorConfig::default());

        let service = service_name(10_100);
        for report in [100, 150, 50, 90] {
            ingestor.ingest(&[stats(&service, report, 0)]).await;
        }

        assert_eq!(h.store.used_bytes(1), Some(240));
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_traffic_accounted() {
        let h = make_harness();
        h.store.insert_user(make_user(1, 0, 0));
        h.store.insert_rule(make_rule(5, 1, 10_100));
        let mut events = h.bus.subscribe();
        let ingestor = make_ingestor(&h, IngestorConfig::default());

        ingestor
            .ingest(&[stats(&service_name(10_100), 100, 40)])
            .await;

        match events.try_recv() {
            Ok(ControlEvent::TrafficAccounted(ev)) => {
                assert_eq!(ev.user_id, 1);
                assert_eq!(ev.rule_id, 5);
                assert_eq!(ev.total(), 140);
            }
            other => panic!("expected TrafficAccounted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delta_publishes_nothing() {
        let h = make_harness();
        h.store.insert_user(make_user(1, 0, 0));
        h.store.insert_rule(make_rule(5, 1, 10_100));
        let mut events = h.bus.subscribe();
        let ingestor = make_ingestor(&h, IngestorConfig::default());

        let batch = [stats(&service_name(10_100), 100, 0)];
        ingestor.ingest(&batch).await;
        events.try_recv().unwrap();

        ingestor.ingest(&batch).await;
        assert!(events.try_recv().is_err());
        assert_eq!(h.store.used_bytes(1), Some(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_significant_delta_triggers_quota_recheck() {
        let h = make_harness();
        h.store.insert_user(make_user(1, 1_000, 0));
        h.store.insert_rule(make_rule(5, 1, 10_100));
        let ingestor = make_ingestor(
            &h,
            IngestorConfig {
                significant_delta_bytes: 100,
                ..IngestorConfig::default()
            },
        );

        ingestor
            .ingest(&[stats(&service_name(10_100), 500, 0)])
            .await;
        // Let the spawned recheck run
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(h.store.fetch_user_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_insignificant_delta_skips_recheck() {
        let h = make_harness();
        h.store.insert_user(make_user(1, 1_000, 0));
        h.store.insert_rule(make_rule(5, 1, 10_100));
        let ingestor = make_ingestor(
            &h,
            IngestorConfig {
                significant_delta_bytes: 1_000,
                ..IngestorConfig::default()
            },
        );

        ingestor
            .ingest(&[stats(&service_name(10_100), 500, 0)])
            .await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(h.store.fetch_user_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_port_retried_after_rule_appears() {
        let h = make_harness();
        h.store.insert_user(make_user(1, 0, 0));
        let ingestor = make_ingestor(
            &h,
            IngestorConfig {
                retry_delay: Duration::from_secs(3),
                ..IngestorConfig::default()
            },
        );
        let shutdown = CancellationToken::new();
        let worker = ingestor.spawn_retry_worker(shutdown.clone());

        // No rule for the port yet: the event is buffered
        ingestor
            .ingest(&[stats(&service_name(10_100), 100, 40)])
            .await;
        assert_eq!(h.store.used_bytes(1), Some(0));

        // The rule lands, with the invalidation its creation event causes
        h.store.insert_rule(make_rule(5, 1, 10_100));
        h.portmap.invalidate(10_100);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(h.store.used_bytes(1), Some(140));
        assert_eq!(h.store.rule_used_bytes(5), Some(140));

        shutdown.cancel();
        worker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_port_dropped_after_failed_retry() {
        let h = make_harness();
        h.store.insert_user(make_user(1, 0, 0));
        let ingestor = make_ingestor(
            &h,
            IngestorConfig {
                retry_delay: Duration::from_secs(6),
                ..IngestorConfig::default()
            },
        );
        let shutdown = CancellationToken::new();
        let worker = ingestor.spawn_retry_worker(shutdown.clone());

        ingestor
            .ingest(&[stats(&service_name(10_100), 100, 40)])
            .await;
        tokio::time::sleep(Duration::from_secs(7)).await;

        // Still no mapping: the event is gone, nothing was accounted
        assert_eq!(h.store.used_bytes(1), Some(0));

        // The next report recomputes its delta from the advanced tracker,
        // so the loss stays bounded to the one buffered window
        h.store.insert_rule(make_rule(5, 1, 10_100));
        h.portmap.invalidate(10_100);
        ingestor
            .ingest(&[stats(&service_name(10_100), 150, 60)])
            .await;
        assert_eq!(h.store.used_bytes(1), Some(70));

        shutdown.cancel();
        worker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_garbage_service_key_dropped() {
        let h = make_harness();
        h.store.insert_user(make_user(1, 0, 0));
        h.store.insert_rule(make_rule(5, 1, 10_100));
        let ingestor = make_ingestor(&h, IngestorConfig::default());

        ingestor.ingest(&[stats("not-a-service", 100, 0)]).await;
        assert_eq!(h.store.used_bytes(1), Some(0));
        assert_eq!(ingestor.tracked_services(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_isolates_bad_events() {
        let h = make_harness();
        h.store.insert_user(make_user(1, 0, 0));
        h.store.insert_rule(make_rule(5, 1, 10_100));
        let ingestor = make_ingestor(&h, IngestorConfig::default());

        ingestor
            .ingest(&[
                stats("garbage", 9, 9),
                stats(&service_name(10_100), 100, 0),
            ])
            .await;

        assert_eq!(h.store.used_bytes(1), Some(100));
    }
}
