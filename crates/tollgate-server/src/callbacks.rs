//! Forwarder callback handlers: `/auth`, `/limiter`, `/observer`.
//!
//! These are hit on the hot path, potentially once per connection attempt.
//! Every answer comes from the port map and decision caches; only cache
//! misses reach the store. Each handler races its work against the
//! configured callback budget and fails closed on timeout.

use axum::Json;
use axum::extract::State;
use tokio::time::timeout;
use tollgate_core::{CheckReason, QuotaDecision, parse_service_port};
use tollgate_traffic::ServiceStats;
use tracing::{debug, warn};

use crate::state::AppState;
use crate::wire::{
    AuthRequest, AuthResponse, LimiterRequest, LimiterResponse, ObserverRequest, ObserverResponse,
};

/// `POST /auth`: may this connection attempt proceed?
pub async fn handle_auth(
    State(state): State<AppState>,
    Json(req): Json<AuthRequest>,
) -> Json<AuthResponse> {
    tollgate_metrics::record_callback("auth");

    let ok = match timeout(state.callback_timeout, decide(&state, &req.service, &req.addr)).await {
        Ok(Some(decision)) => decision.allowed,
        Ok(None) => false,
        Err(_) => {
            warn!(service = %req.service, "auth callback exceeded budget; failing closed");
            false
        }
    };

    if !ok {
        tollgate_metrics::record_callback_denied();
        debug!(service = %req.service, src = %req.src, "connection denied");
    }
    Json(AuthResponse { ok })
}

/// `POST /limiter`: bandwidth caps for one connection scope.
///
/// `0` in either direction tells the forwarder to block that direction, so
/// a denied or unresolvable caller gets `{0, 0}` and an uncapped user gets
/// the configured unlimited sentinel.
pub async fn handle_limiter(
    State(state): State<AppState>,
    Json(req): Json<LimiterRequest>,
) -> Json<LimiterResponse> {
    tollgate_metrics::record_callback("limiter");

    let decision =
        match timeout(state.callback_timeout, decide(&state, &req.service, &req.addr)).await {
            Ok(decision) => decision,
            Err(_) => {
                warn!(service = %req.service, "limiter callback exceeded budget; blocking");
                None
            }
        };

    let resp = match decision {
        Some(d) if d.allowed => LimiterResponse {
            in_bps: rate_or_unlimited(d.rate_in_bps, state.unlimited_rate_bps),
            out_bps: rate_or_unlimited(d.rate_out_bps, state.unlimited_rate_bps),
        },
        _ => {
            tollgate_metrics::record_callback_denied();
            LimiterResponse {
                in_bps: 0,
                out_bps: 0,
            }
        }
    };
    Json(resp)
}

/// `POST /observer`: periodic cumulative stats per service.
pub async fn handle_observer(
    State(state): State<AppState>,
    Json(req): Json<ObserverRequest>,
) -> Json<ObserverResponse> {
    tollgate_metrics::record_callback("observer");

    let batch: Vec<ServiceStats> = req
        .events
        .into_iter()
        .filter_map(|event| {
            let stats = event.stats?;
            Some(ServiceStats {
                service: event.service,
                input_bytes: stats.input_bytes,
                output_bytes: stats.output_bytes,
                total_conns: stats.total_conns,
                total_errs: stats.total_errs,
            })
        })
        .collect();

    if !batch.is_empty()
        && timeout(state.callback_timeout, state.ingestor.ingest(&batch))
            .await
            .is_err()
    {
        // Safe to cut short: the next report recomputes deltas from the
        // tracker state, so nothing is counted twice.
        warn!(
            events = batch.len(),
            "observer ingestion exceeded budget; remainder deferred to next report"
        );
    }

    Json(ObserverResponse { ok: true })
}

/// Resolve a callback to a quota decision: service key → port → owner →
/// `check_quota`. `None` means the caller could not be resolved; treat as
/// denied.
async fn decide(state: &AppState, service: &str, addr: &str) -> Option<QuotaDecision> {
    let port = parse_service_port(service).or_else(|| port_from_addr(addr))?;

    let mapping = match state.portmap.lookup(port).await {
        Ok(Some(mapping)) => mapping,
        Ok(None) => {
            debug!(port, "no rule owns this port");
            return None;
        }
        Err(e) => {
            warn!(port, error = %e, "port lookup failed; failing closed");
            return None;
        }
    };

    Some(
        state
            .quota
            .check_quota(mapping.user_id, CheckReason::Connect)
            .await,
    )
}

#[inline]
fn rate_or_unlimited(rate_bps: i64, unlimited: i64) -> i64 {
    if rate_bps > 0 { rate_bps } else { unlimited }
}

/// Extract the port from a listen address like `:10100`, `0.0.0.0:10100`,
/// or `[::]:10100`.
fn port_from_addr(addr: &str) -> Option<u16> {
    let (_, port) = addr.rsplit_once(':')?;
    port.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_from_addr() {
        assert_eq!(port_from_addr(":10100"), Some(10_100));
        assert_eq!(port_from_addr("0.0.0.0:10100"), Some(10_100));
        assert_eq!(port_from_addr("[::]:10100"), Some(10_100));
        assert_eq!(port_from_addr("no-port"), None);
        assert_eq!(port_from_addr("host:notaport"), None);
    }

    #[test]
    fn test_rate_or_unlimited() {
        assert_eq!(rate_or_unlimited(1_024, 1 << 30), 1_024);
        assert_eq!(rate_or_unlimited(0, 1 << 30), 1 << 30);
    }
}
