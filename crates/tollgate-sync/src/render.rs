//! Forwarder configuration rendering.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tollgate_core::{compute_active, now_unix, service_name, udp_service_name};
use tollgate_store::ControlStore;

use crate::error::SyncError;

/// One forwarding service in the rendered document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Service key; also what the forwarder reports back in callbacks.
    pub name: String,
    /// Listening port.
    pub port: u16,
    /// Listen address, `host:port`.
    pub listen: String,
    /// Destination, `host:port`.
    pub target: String,
    /// `tcp` or `udp`.
    pub protocol: String,
    /// Callback endpoint the forwarder consults per connection attempt.
    pub auth_url: String,
    /// Callback endpoint the forwarder consults for bandwidth caps.
    pub limiter_url: String,
    /// Callback endpoint the forwarder reports periodic stats to.
    pub observer_url: String,
}

/// The forwarder's declarative configuration.
///
/// Fully regenerable from current store state alone: rendering carries no
/// incremental state, no timestamps, and no ephemeral identifiers, so two
/// renders of the same state are byte-identical after normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwarderConfig {
    pub services: Vec<ServiceSpec>,
}

impl ForwarderConfig {
    /// Canonical service order, so structural comparison ignores ordering.
    pub fn normalized(mut self) -> Self {
        self.services
            .sort_by(|a, b| (a.port, &a.name).cmp(&(b.port, &b.name)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether a service with this name is present.
    pub fn has_service(&self, name: &str) -> bool {
        self.services.iter().any(|s| s.name == name)
    }
}

/// Render the forwarder configuration from current store state.
///
/// The global policy is re-read on every render; it is runtime-mutable and
/// must never be cached across renders. Admin-owned rules always bind all
/// interfaces; other rules bind all interfaces or loopback only, per the
/// policy's `public_bind` flag. Rules whose computed activity is false are
/// simply absent from the document.
pub async fn render<S: ControlStore + ?Sized>(
    store: &S,
    public_url: &str,
) -> Result<ForwarderConfig, SyncError> {
    let users = store.list_users().await?;
    let rules = store.list_rules().await?;
    let policy = store.global_policy().await?;
    let now = now_unix();

    let users: HashMap<i64, _> = users.into_iter().map(|u| (u.id, u)).collect();
    let base = public_url.trim_end_matches('/');

    let mut services = Vec::new();
    for rule in &rules {
        let Some(user) = users.get(&rule.user_id) else {
            continue;
        };
        if !compute_active(rule, user, &policy, now) {
            continue;
        }

        let host = if user.is_admin() || policy.public_bind {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        };
        let listen = format!("{host}:{}", rule.source_port);

        if rule.protocol.wants_tcp() {
            services.push(ServiceSpec {
                name: service_name(rule.source_port),
                port: rule.source_port,
                listen: listen.clone(),
                target: rule.target_address.clone(),
                protocol: "tcp".to_string(),
                auth_url: format!("{base}/auth"),
                limiter_url: format!("{base}/limiter"),
                observer_url: format!("{base}/observer"),
            });
        }
        if rule.protocol.wants_udp() {
            services.push(ServiceSpec {
                name: udp_service_name(rule.source_port),
                port: rule.source_port,
                listen,
                target: rule.target_address.clone(),
                protocol: "udp".to_string(),
                auth_url: format!("{base}/auth"),
                limiter_url: format!("{base}/limiter"),
                observer_url: format!("{base}/observer"),
            });
        }
    }

    Ok(ForwarderConfig { services }.normalized())
}
