//! End-to-end flow across the callback handlers and coordinators:
//! accounted traffic pushes a user over quota, new connections are refused,
//! and the next config sync drops exactly that user's services.

use std::path::PathBuf;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use tokio::time::Duration;
use tollgate_config::ControlConfig;
use tollgate_core::{ForwardRule, PortRange, Protocol, User, UserRole, UserStatus};
use tollgate_server::{
    AppState, build_state, handle_auth, handle_limiter, handle_observer,
    wire::{AuthRequest, LimiterRequest, ObserverEvent, ObserverRequest, ObserverStats},
};
use tollgate_store::MemoryStore;
use tollgate_sync::SyncOutcome;

const MIB: i64 = 1 << 20;
const GIB: i64 = 1 << 30;

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

fn temp_config_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "tollgate-server-test-{}-{tag}.json",
        std::process::id()
    ))
}

fn make_state(store: Arc<MemoryStore>, tag: &str) -> AppState {
    let mut config = ControlConfig::default();
    config.sync.config_path = temp_config_path(tag).display().to_string();
    // RestartMode::None by default, so syncs only write the file
    build_state(&config, store)
}

async fn auth_ok(state: &AppState, service: &str) -> bool {
    let req = AuthRequest {
        service: service.to_string(),
        network: "tcp".to_string(),
        addr: String::new(),
        src: "203.0.113.9:51200".to_string(),
    };
    handle_auth(State(state.clone()), Json(req)).await.0.ok
}

fn stats_event(service: &str, input: i64, output: i64) -> ObserverEvent {
    ObserverEvent {
        kind: "service".to_string(),
        service: service.to_string(),
        event_type: "stats".to_string(),
        stats: Some(ObserverStats {
            total_conns: 10,
            current_conns: 1,
            input_bytes: input,
            output_bytes: output,
            total_errs: 0,
        }),
    }
}

#[tokio::test(start_paused = true)]
async fn test_overdraft_denies_and_sync_drops_only_that_user() {
    let store = Arc::new(MemoryStore::new());
    // User 1 is close to a 1 GiB quota; user 2 is unlimited
    store.insert_user(make_user(1, GIB, 900 * MIB));
    store.insert_user(make_user(2, 0, 0));
    store.insert_rule(make_rule(1, 1, 10_100));
    store.insert_rule(make_rule(2, 2, 10_200));
    let state = make_state(Arc::clone(&store), "overdraft");

    // Initial sync renders both services
    assert_eq!(state.sync.sync_once().await.unwrap(), SyncOutcome::Applied);
    let applied = state.sync.last_applied().await.unwrap();
    assert!(applied.has_service("fwd-10100"));
    assert!(applied.has_service("fwd-10200"));

    // Under quota, connections are allowed
    assert!(auth_ok(&state, "fwd-10100").await);

    // The forwarder reports 110 MiB of cumulative traffic on user 1's
    // service, pushing accounted usage to 1010 MiB
    let report = ObserverRequest {
        events: vec![stats_event("fwd-10100", 70 * MIB, 40 * MIB)],
    };
    let resp = handle_observer(State(state.clone()), Json(report)).await;
    assert!(resp.0.ok);
    assert_eq!(store.used_bytes(1), Some(1_010 * MIB));

    // Force the cached decision out; the recomputation sees the overdraft
    state.quota.invalidate(1);
    assert!(!auth_ok(&state, "fwd-10100").await);
    assert!(auth_ok(&state, "fwd-10200").await);

    // The limiter blocks both directions for the denied user
    let limits = handle_limiter(
        State(state.clone()),
        Json(LimiterRequest {
            scope: "client".to_string(),
            service: "fwd-10100".to_string(),
            network: "tcp".to_string(),
            ..Default::default()
        }),
    )
    .await;
    assert_eq!(limits.0.in_bps, 0);
    assert_eq!(limits.0.out_bps, 0);

    // The next sync removes user 1's service and nothing else
    assert_eq!(state.sync.sync_once().await.unwrap(), SyncOutcome::Applied);
    let applied = state.sync.last_applied().await.unwrap();
    assert!(!applied.has_service("fwd-10100"));
    assert!(applied.has_service("fwd-10200"));
}

#[tokio::test(start_paused = true)]
async fn test_unlimited_user_gets_sentinel_rates() {
    let store = Arc::new(MemoryStore::new());
    store.insert_user(make_user(2, 0, 0));
    store.insert_rule(make_rule(2, 2, 10_200));
    let state = make_state(store, "sentinel");

    let limits = handle_limiter(
        State(state.clone()),
        Json(LimiterRequest {
            service: "fwd-10200".to_string(),
            ..Default::default()
        }),
    )
    .await;
    assert_eq!(limits.0.in_bps, state.unlimited_rate_bps);
    assert_eq!(limits.0.out_bps, state.unlimited_rate_bps);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_service_fails_closed() {
    let store = Arc::new(MemoryStore::new());
    let state = make_state(store, "unknown");

    assert!(!auth_ok(&state, "fwd-9999").await);
    assert!(!auth_ok(&state, "not-a-service-key").await);
}

#[tokio::test(start_paused = true)]
async fn test_slow_store_fails_closed_within_budget() {
    let store = Arc::new(MemoryStore::new());
    store.insert_user(make_user(1, GIB, 0));
    store.insert_rule(make_rule(1, 1, 10_100));
    let state = make_state(Arc::clone(&store), "slowstore");

    // Every read stalls far past the callback budget
    store.set_read_delay(Some(Duration::from_secs(5)));
    assert!(!auth_ok(&state, "fwd-10100").await);

    // Once the store recovers the same request is allowed again
    store.set_read_delay(None);
    assert!(auth_ok(&state, "fwd-10100").await);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_observer_reports_account_deltas_not_totals() {
    let store = Arc::new(MemoryStore::new());
    store.insert_user(make_user(1, 0, 0));
    store.insert_rule(make_rule(1, 1, 10_100));
    let state = make_state(Arc::clone(&store), "deltas");

    // Cumulative counters: 100, 150, then 50 after a forwarder restart,
    // then 90. Accounted total must be 100 + 50 + 50 + 40 = 240.
    for (input, output) in [(100, 0), (150, 0), (50, 0), (90, 0)] {
        let report = ObserverRequest {
            events: vec![stats_event("fwd-10100", input, output)],
        };
        handle_observer(State(state.clone()), Json(report)).await;
    }
    assert_eq!(store.used_bytes(1), Some(240));
}
