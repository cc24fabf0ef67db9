//! Metrics collection and Prometheus exporter for tollgate.
//!
//! This module provides metrics instrumentation for the control plane,
//! including callback counts, quota decisions, ingestion volume, and
//! config sync outcomes.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Initialize Prometheus metrics exporter.
///
/// Starts an HTTP server on the given address to expose metrics.
/// Returns an error message if binding fails.
pub fn init_prometheus(listen: &str) -> Result<(), String> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| format!("invalid metrics listen address: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install prometheus exporter: {}", e))?;

    Ok(())
}

// ============================================================================
// Metric Names
// ============================================================================

/// Total forwarder callback requests, by endpoint.
pub const CALLBACK_REQUESTS_TOTAL: &str = "tollgate_callback_requests_total";
/// Total connection attempts denied at the auth callback.
pub const CALLBACK_DENIED_TOTAL: &str = "tollgate_callback_denied_total";
/// Total port map lookups served from the current snapshot.
pub const PORTMAP_HITS_TOTAL: &str = "tollgate_portmap_hits_total";
/// Total port map lookups that found no mapping.
pub const PORTMAP_MISSES_TOTAL: &str = "tollgate_portmap_misses_total";
/// Total port map snapshot rebuilds.
pub const PORTMAP_REBUILDS_TOTAL: &str = "tollgate_portmap_rebuilds_total";
/// Number of ports in the current map snapshot.
pub const PORTMAP_SIZE: &str = "tollgate_portmap_size";
/// Total quota checks, by trigger reason.
pub const QUOTA_CHECKS_TOTAL: &str = "tollgate_quota_checks_total";
/// Total denied quota decisions, by denial reason.
pub const QUOTA_DENIED_TOTAL: &str = "tollgate_quota_denied_total";
/// Total quota decisions recomputed from the store.
pub const QUOTA_RECOMPUTES_TOTAL: &str = "tollgate_quota_recomputes_total";
/// Total store failures observed while deciding quota.
pub const QUOTA_STORE_FAULTS_TOTAL: &str = "tollgate_quota_store_faults_total";
/// Total traffic events accounted.
pub const INGEST_EVENTS_TOTAL: &str = "tollgate_ingest_events_total";
/// Total bytes accounted from traffic events.
pub const INGEST_BYTES_TOTAL: &str = "tollgate_ingest_bytes_total";
/// Total events buffered for retry (unknown port).
pub const INGEST_BUFFERED_TOTAL: &str = "tollgate_ingest_buffered_total";
/// Total events dropped after a failed retry.
pub const INGEST_DROPPED_TOTAL: &str = "tollgate_ingest_dropped_total";
/// Total counter resets detected (forwarder restart).
pub const COUNTER_RESETS_TOTAL: &str = "tollgate_counter_resets_total";
/// Total forced quota refreshes triggered by the growth monitor.
pub const MONITOR_REFRESHES_TOTAL: &str = "tollgate_monitor_refreshes_total";
/// Total emergency cutoffs (growth plus refreshed denial).
pub const EMERGENCY_DISABLES_TOTAL: &str = "tollgate_emergency_disables_total";
/// Total config sync runs, by outcome.
pub const SYNC_RUNS_TOTAL: &str = "tollgate_sync_runs_total";
/// Total forwarder restarts issued.
pub const SYNC_RESTARTS_TOTAL: &str = "tollgate_sync_restarts_total";
/// Total forwarder restart failures (after exhausting backoff).
pub const RESTART_FAILURES_TOTAL: &str = "tollgate_restart_failures_total";
/// Number of services in the last applied forwarder config.
pub const ACTIVE_SERVICES: &str = "tollgate_active_services";

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record a forwarder callback request (endpoint: "auth", "limiter", "observer").
#[inline]
pub fn record_callback(endpoint: &'static str) {
    counter!(CALLBACK_REQUESTS_TOTAL, "endpoint" => endpoint).increment(1);
}

/// Record a denied connection attempt.
#[inline]
pub fn record_callback_denied() {
    counter!(CALLBACK_DENIED_TOTAL).increment(1);
}

/// Record a port map lookup hit.
#[inline]
pub fn record_portmap_hit() {
    counter!(PORTMAP_HITS_TOTAL).increment(1);
}

/// Record a port map lookup miss.
#[inline]
pub fn record_portmap_miss() {
    counter!(PORTMAP_MISSES_TOTAL).increment(1);
}

/// Record a port map rebuild and the resulting snapshot size.
#[inline]
pub fn record_portmap_rebuild(size: usize) {
    counter!(PORTMAP_REBUILDS_TOTAL).increment(1);
    gauge!(PORTMAP_SIZE).set(size as f64);
}

/// Record a quota check by trigger reason.
#[inline]
pub fn record_quota_check(reason: &'static str) {
    counter!(QUOTA_CHECKS_TOTAL, "reason" => reason).increment(1);
}

/// Record a denied quota decision by denial reason.
#[inline]
pub fn record_quota_denied(reason: &'static str) {
    counter!(QUOTA_DENIED_TOTAL, "reason" => reason).increment(1);
}

/// Record a quota decision recomputed from the store.
#[inline]
pub fn record_quota_recompute() {
    counter!(QUOTA_RECOMPUTES_TOTAL).increment(1);
}

/// Record a store failure observed on the quota path.
#[inline]
pub fn record_store_fault() {
    counter!(QUOTA_STORE_FAULTS_TOTAL).increment(1);
}

/// Record accounted traffic events and their byte volume.
#[inline]
pub fn record_ingest(events: u64, bytes: u64) {
    counter!(INGEST_EVENTS_TOTAL).increment(events);
    counter!(INGEST_BYTES_TOTAL).increment(bytes);
}

/// Record an event buffered for retry.
#[inline]
pub fn record_ingest_buffered() {
    counter!(INGEST_BUFFERED_TOTAL).increment(1);
}

/// Record an event dropped after a failed retry.
#[inline]
pub fn record_ingest_dropped() {
    counter!(INGEST_DROPPED_TOTAL).increment(1);
}

/// Record a detected counter reset.
#[inline]
pub fn record_counter_reset() {
    counter!(COUNTER_RESETS_TOTAL).increment(1);
}

/// Record a forced refresh from the growth monitor.
#[inline]
pub fn record_monitor_refresh() {
    counter!(MONITOR_REFRESHES_TOTAL).increment(1);
}

/// Record an emergency cutoff.
#[inline]
pub fn record_emergency_disable() {
    counter!(EMERGENCY_DISABLES_TOTAL).increment(1);
}

/// Record a sync run (outcome: "applied", "skipped", "failed").
#[inline]
pub fn record_sync_run(outcome: &'static str) {
    counter!(SYNC_RUNS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record an issued forwarder restart.
#[inline]
pub fn record_sync_restart() {
    counter!(SYNC_RESTARTS_TOTAL).increment(1);
}

/// Record a restart failure after exhausting backoff.
#[inline]
pub fn record_restart_failure() {
    counter!(RESTART_FAILURES_TOTAL).increment(1);
}

/// Set the number of services in the last applied forwarder config.
#[inline]
pub fn set_active_services(count: usize) {
    gauge!(ACTIVE_SERVICES).set(count as f64);
}
