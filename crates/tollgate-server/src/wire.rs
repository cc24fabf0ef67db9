//! Wire types of the forwarder callback protocol and the admin events.
//!
//! Shapes and field names match what the forwarder sends; unknown fields
//! are ignored so a newer forwarder does not break callbacks.

use serde::{Deserialize, Serialize};

/// `POST /auth` request: may this connection attempt proceed?
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthRequest {
    /// Service key of the listening endpoint (`fwd-{port}`).
    pub service: String,
    /// `tcp` or `udp`.
    pub network: String,
    /// Listening address the connection arrived on, `host:port`.
    pub addr: String,
    /// Client source address.
    pub src: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub ok: bool,
}

/// `POST /limiter` request: bandwidth caps for one connection scope.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LimiterRequest {
    /// `service`, `conn`, or `client`.
    pub scope: String,
    pub service: String,
    pub network: String,
    pub addr: String,
    pub client: String,
    pub src: String,
}

/// Rates in bytes per second; `0` in either direction means "block".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterResponse {
    #[serde(rename = "in")]
    pub in_bps: i64,
    #[serde(rename = "out")]
    pub out_bps: i64,
}

/// `POST /observer` request: a batch of service events.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ObserverRequest {
    pub events: Vec<ObserverEvent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ObserverEvent {
    /// Event source kind; stats batches report `service`.
    pub kind: String,
    pub service: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Present on stats events; counters are cumulative since the service
    /// started.
    pub stats: Option<ObserverStats>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ObserverStats {
    pub total_conns: i64,
    pub current_conns: i64,
    pub input_bytes: i64,
    pub output_bytes: i64,
    pub total_errs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverResponse {
    pub ok: bool,
}

/// Generic admin-event acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// `POST /events/quota-reset`: zero a user's counters and re-evaluate.
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaResetRequest {
    pub user_id: i64,
}

/// `POST /events/user-changed`: quota/status/role edit on a user.
#[derive(Debug, Clone, Deserialize)]
pub struct UserChangedRequest {
    pub user_id: i64,
}

/// `POST /events/rule-changed`: rules created, edited, or deleted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuleChangedRequest {
    /// Affected listening ports; empty means "unknown, refresh everything".
    pub ports: Vec<u16>,
}
