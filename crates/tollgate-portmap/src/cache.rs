//! Port map cache with coalesced rebuilds and a negative cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use parking_lot::RwLock;
use tokio::sync::{Mutex, broadcast};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tollgate_core::{ControlEvent, EventBus, defaults};
use tollgate_store::{ControlStore, StoreError};
use tracing::{debug, warn};

use crate::snapshot::{MappingSnapshot, PortMapping};

/// Port map cache tuning.
#[derive(Debug, Clone, Copy)]
pub struct PortMapConfig {
    /// How long a snapshot may serve lookups before a rebuild.
    pub ttl: Duration,
    /// How long a confirmed-absent port suppresses further rebuilds.
    pub negative_ttl: Duration,
}

impl Default for PortMapConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(defaults::DEFAULT_PORTMAP_TTL_SECS),
            negative_ttl: Duration::from_secs(defaults::DEFAULT_PORTMAP_NEG_TTL_SECS),
        }
    }
}

/// Cache counters, for logs and the debug endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapStats {
    pub hits: u64,
    pub misses: u64,
    pub rebuilds: u64,
    pub size: usize,
    pub generation: u64,
}

/// Listen-port to owner mapping cache.
///
/// Reads are lock-free snapshot loads. A lookup that cannot be answered
/// from a fresh snapshot triggers a rebuild from the store; concurrent
/// triggers coalesce into a single store read behind `rebuild_lock`.
pub struct PortMapCache {
    store: Arc<dyn ControlStore>,
    snapshot: ArcSwap<MappingSnapshot>,
    /// Ports confirmed absent by the last rebuild, with insertion time.
    negative: RwLock<HashMap<u16, Instant>>,
    rebuild_lock: Mutex<()>,
    ttl: Duration,
    negative_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    rebuilds: AtomicU64,
}

impl PortMapCache {
    pub fn new(store: Arc<dyn ControlStore>, config: PortMapConfig) -> Self {
        Self {
            store,
            snapshot: ArcSwap::from_pointee(MappingSnapshot::empty(0)),
            negative: RwLock::new(HashMap::new()),
            rebuild_lock: Mutex::new(()),
            ttl: config.ttl,
            negative_ttl: config.negative_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            rebuilds: AtomicU64::new(0),
        }
    }

    /// Resolve the owner of a listen port.
    ///
    /// Served from the current snapshot when it is within TTL. A miss on a
    /// fresh snapshot still rebuilds once (the port may have just been
    /// created); a confirmed-absent port is then remembered for
    /// `negative_ttl` so unknown-port storms do not hammer the store.
    ///
    /// A store failure during rebuild propagates; callers fail closed.
    pub async fn lookup(&self, port: u16) -> Result<Option<PortMapping>, StoreError> {
        let called_at = Instant::now();
        {
            let snap = self.snapshot.load();
            if snap.is_fresh(self.ttl) {
                if let Some(mapping) = snap.ports.get(&port) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    tollgate_metrics::record_portmap_hit();
                    return Ok(Some(*mapping));
                }
                if self.negative_fresh(port) {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    tollgate_metrics::record_portmap_miss();
                    return Ok(None);
                }
            }
        }

        self.rebuild_since(called_at).await?;

        let snap = self.snapshot.load();
        match snap.ports.get(&port) {
            Some(mapping) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tollgate_metrics::record_portmap_hit();
                Ok(Some(*mapping))
            }
            None => {
                self.negative.write().insert(port, Instant::now());
                self.misses.fetch_add(1, Ordering::Relaxed);
                tollgate_metrics::record_portmap_miss();
                Ok(None)
            }
        }
    }

    /// Force a rebuild from the store.
    pub async fn refresh(&self) -> Result<(), StoreError> {
        self.rebuild_since(Instant::now()).await
    }

    /// Drop one port from the local snapshot. The next lookup for it goes
    /// back to the store.
    pub fn invalidate(&self, port: u16) {
        self.negative.write().remove(&port);
        self.snapshot.rcu(|current| {
            let mut next = (**current).clone();
            next.ports.remove(&port);
            next
        });
    }

    /// Drop the whole snapshot. The next lookup rebuilds.
    pub fn invalidate_all(&self) {
        self.negative.write().clear();
        self.snapshot
            .rcu(|current| MappingSnapshot::empty(current.generation + 1));
    }

    pub fn stats(&self) -> PortMapStats {
        let snap = self.snapshot.load();
        PortMapStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
            size: snap.ports.len(),
            generation: snap.generation,
        }
    }

    /// React to rule mutations: invalidate the affected ports and rebuild.
    pub fn spawn_rule_listener(
        self: &Arc<Self>,
        bus: &EventBus,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        let mut events = bus.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(ControlEvent::RuleChanged(change)) => {
                            if change.ports.is_empty() {
                                cache.invalidate_all();
                            } else {
                                for port in &change.ports {
                                    cache.invalidate(*port);
                                }
                            }
                            if let Err(e) = cache.refresh().await {
                                warn!("port map refresh after rule change failed: {}", e);
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "event stream lagged; invalidating port map");
                            cache.invalidate_all();
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!("port map rule listener stopped");
        })
    }

    /// One rebuild serves every caller that observed staleness before it
    /// started. `built_at` is the read start time, so a rebuild never
    /// satisfies a caller whose trigger postdates the data it read.
    async fn rebuild_since(&self, called_at: Instant) -> Result<(), StoreError> {
        let _guard = self.rebuild_lock.lock().await;

        {
            let current = self.snapshot.load();
            if current.valid && current.built_at >= called_at {
                return Ok(());
            }
        }

        let started = Instant::now();
        let generation = self.snapshot.load().generation + 1;
        let rules = self.store.list_rules().await?;
        let next = MappingSnapshot::build(&rules, generation, started);
        let size = next.ports.len();
        self.snapshot.store(Arc::new(next));
        self.negative.write().clear();
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
        tollgate_metrics::record_portmap_rebuild(size);
        debug!(ports = size, generation, "rebuilt port map");
        Ok(())
    }

    fn negative_fresh(&self, port: u16) -> bool {
        let mut negative = self.negative.write();
        match negative.get(&port) {
            Some(at) if at.elapsed() < self.negative_ttl => true,
            Some(_) => {
                negative.remove(&port);
                false
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for PortMapCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortMapCache")
            .field("stats", &self.stats())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use tollgate_core::{ForwardRule, Protocol, RuleChanged};
    use tollgate_store::MemoryStore;

    use super::*;

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

    fn make_cache(store: Arc<MemoryStore>) -> PortMapCache {
        PortMapCache::new(
            store,
            PortMapConfig {
                ttl: Duration::from_secs(30),
                negative_ttl: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_known_port() {
        let store = Arc::new(MemoryStore::new());
        store.insert_rule(make_rule(1, 10, 10_100));
        let cache = make_cache(Arc::clone(&store));

        let mapping = cache.lookup(10_100).await.unwrap().unwrap();
        assert_eq!(mapping.user_id, 10);
        assert_eq!(mapping.rule_id, 1);

        // Second lookup is served from the snapshot
        cache.lookup(10_100).await.unwrap().unwrap();
        assert_eq!(store.list_rules_calls(), 1);
        assert_eq!(cache.stats().hits, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_port_negative_cached() {
        let store = Arc::new(MemoryStore::new());
        store.insert_rule(make_rule(1, 10, 10_100));
        let cache = make_cache(Arc::clone(&store));

        assert!(cache.lookup(20_000).await.unwrap().is_none());
        let after_first = store.list_rules_calls();

        // Within the negative TTL the store is not consulted again
        assert!(cache.lookup(20_000).await.unwrap().is_none());
        assert_eq!(store.list_rules_calls(), after_first);

        // After the negative TTL the port is looked up again
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.lookup(20_000).await.unwrap().is_none());
        assert_eq!(store.list_rules_calls(), after_first + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_on_fresh_snapshot_picks_up_new_rule() {
        let store = Arc::new(MemoryStore::new());
        store.insert_rule(make_rule(1, 10, 10_100));
        let cache = make_cache(Arc::clone(&store));
        cache.refresh().await.unwrap();

        // Rule created after the snapshot was built
        tokio::time::advance(Duration::from_millis(1)).await;
        store.insert_rule(make_rule(2, 20, 10_200));

        let mapping = cache.lookup(10_200).await.unwrap().unwrap();
        assert_eq!(mapping.user_id, 20);
        assert_eq!(store.list_rules_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_rebuilds() {
        let store = Arc::new(MemoryStore::new());
        store.insert_rule(make_rule(1, 10, 10_100));
        let cache = make_cache(Arc::clone(&store));

        cache.lookup(10_100).await.unwrap().unwrap();
        assert_eq!(store.list_rules_calls(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        cache.lookup(10_100).await.unwrap().unwrap();
        assert_eq!(store.list_rules_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ownership_change_visible_after_ttl() {
        let store = Arc::new(MemoryStore::new());
        store.insert_rule(make_rule(1, 10, 10_100));
        let cache = make_cache(Arc::clone(&store));

        assert_eq!(cache.lookup(10_100).await.unwrap().unwrap().user_id, 10);

        // Port reassigned to another user
        store.remove_rule(1);
        store.insert_rule(make_rule(2, 20, 10_100));

        // Still the old owner within TTL
        assert_eq!(cache.lookup(10_100).await.unwrap().unwrap().user_id, 10);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.lookup(10_100).await.unwrap().unwrap().user_id, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_and_invalidate_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        store.insert_rule(make_rule(1, 10, 10_100));
        let cache = make_cache(Arc::clone(&store));

        cache.lookup(10_100).await.unwrap().unwrap();

        tokio::time::advance(Duration::from_millis(1)).await;
        store.remove_rule(1);
        cache.invalidate(10_100);

        // The invalidated port goes back to the store, which confirms it gone
        assert!(cache.lookup(10_100).await.unwrap().is_none());
        assert_eq!(store.list_rules_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_all_forces_rebuild() {
        let store = Arc::new(MemoryStore::new());
        store.insert_rule(make_rule(1, 10, 10_100));
        let cache = make_cache(Arc::clone(&store));

        cache.lookup(10_100).await.unwrap().unwrap();
        assert_eq!(store.list_rules_calls(), 1);

        cache.invalidate_all();
        cache.lookup(10_100).await.unwrap().unwrap();
        assert_eq!(store.list_rules_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_coalesce_into_one_rebuild() {
        let store = Arc::new(MemoryStore::new());
        store.insert_rule(make_rule(1, 10, 10_100));
        // Widen the rebuild window so all lookups arrive while it runs
        store.set_read_delay(Some(Duration::from_millis(50)));
        let cache = Arc::new(make_cache(Arc::clone(&store)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(
                async move { cache.lookup(10_100).await.unwrap() },
            ));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().user_id, 10);
        }

        assert_eq!(store.list_rules_calls(), 1);
        assert_eq!(cache.stats().rebuilds, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_propagates_and_recovers() {
        let store = Arc::new(MemoryStore::new());
        store.insert_rule(make_rule(1, 10, 10_100));
        store.set_fail_reads(true);
        let cache = make_cache(Arc::clone(&store));

        assert!(cache.lookup(10_100).await.is_err());

        store.set_fail_reads(false);
        assert_eq!(cache.lookup(10_100).await.unwrap().unwrap().user_id, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rule_listener_refreshes() {
        let store = Arc::new(MemoryStore::new());
        store.insert_rule(make_rule(1, 10, 10_100));
        let cache = Arc::new(make_cache(Arc::clone(&store)));
        cache.refresh().await.unwrap();

        let bus = EventBus::new(16);
        let shutdown = CancellationToken::new();
        let listener = cache.spawn_rule_listener(&bus, shutdown.clone());

        tokio::time::advance(Duration::from_millis(1)).await;
        store.remove_rule(1);
        store.insert_rule(make_rule(2, 20, 10_100));
        bus.publish(ControlEvent::RuleChanged(RuleChanged {
            ports: vec![10_100],
        }));

        // Let the listener process the event
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(cache.lookup(10_100).await.unwrap().unwrap().user_id, 20);
        assert_eq!(store.list_rules_calls(), 2);

        shutdown.cancel();
        listener.await.unwrap();
    }
}
