//! Admin event handlers.
//!
//! The user/rule CRUD layer lives elsewhere; after it mutates the store it
//! calls these endpoints so the control plane reacts immediately instead of
//! waiting for the next TTL expiry or reconciliation sweep.

use axum::Json;
use axum::extract::State;
use tollgate_core::{CheckReason, ControlEvent, RuleChanged};
use tracing::{info, warn};

use crate::state::AppState;
use crate::wire::{OkResponse, QuotaResetRequest, RuleChangedRequest, UserChangedRequest};

/// `POST /events/quota-reset`: zero a user's counters and re-evaluate.
///
/// This is the only path by which accounted usage may decrease.
pub async fn handle_quota_reset(
    State(state): State<AppState>,
    Json(req): Json<QuotaResetRequest>,
) -> Json<OkResponse> {
    if let Err(e) = state.store.reset_user_traffic(req.user_id).await {
        warn!(user_id = req.user_id, error = %e, "quota reset failed");
        return Json(OkResponse { ok: false });
    }
    info!(user_id = req.user_id, "quota reset");

    state.quota.invalidate(req.user_id);
    // Recompute right away: if the user was denied, the recovery edge
    // re-enables their rules without waiting for any poll cycle.
    state
        .quota
        .force_refresh(req.user_id, CheckReason::AdminEvent)
        .await;
    state.sync.request_sync();
    Json(OkResponse { ok: true })
}

/// `POST /events/user-changed`: quota, status, or role edit.
pub async fn handle_user_changed(
    State(state): State<AppState>,
    Json(req): Json<UserChangedRequest>,
) -> Json<OkResponse> {
    info!(user_id = req.user_id, "user changed");
    state.quota.invalidate(req.user_id);
    state
        .quota
        .force_refresh(req.user_id, CheckReason::AdminEvent)
        .await;
    state.sync.request_sync();
    Json(OkResponse { ok: true })
}

/// `POST /events/rule-changed`: rules created, edited, or deleted.
pub async fn handle_rule_changed(
    State(state): State<AppState>,
    Json(req): Json<RuleChangedRequest>,
) -> Json<OkResponse> {
    info!(ports = ?req.ports, "rules changed");
    // The port map subscribes to this event and re-resolves the ports;
    // the sync driver subscribes too, but an explicit request costs
    // nothing and covers a lagging bus.
    state
        .bus
        .publish(ControlEvent::RuleChanged(RuleChanged { ports: req.ports }));
    state.sync.request_sync();
    Json(OkResponse { ok: true })
}

/// `GET /healthz`: liveness.
pub async fn handle_healthz() -> Json<OkResponse> {
    Json(OkResponse { ok: true })
}
