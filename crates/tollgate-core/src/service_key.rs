//! Service-key naming shared between rendering and ingestion.
//!
//! Every rendered forwarder service is named after its listening port:
//! `fwd-{port}` for TCP and `fwd-{port}-udp` for the UDP twin of a
//! both-protocol rule. The reverse parse recovers the port from the
//! `service` field of forwarder callbacks.

/// Name of the TCP (or single-protocol) service listening on `port`.
#[inline]
pub fn service_name(port: u16) -> String {
    format!("fwd-{port}")
}

/// Name of the UDP twin service for a both-protocol rule on `port`.
#[inline]
pub fn udp_service_name(port: u16) -> String {
    format!("fwd-{port}-udp")
}

/// Extract the listening port from a service key.
///
/// Accepts `fwd-{port}` and `fwd-{port}-udp`. Returns `None` for anything
/// else, including ports outside the u16 range.
pub fn parse_service_port(service: &str) -> Option<u16> {
    let rest = service.strip_prefix("fwd-")?;
    let digits = match rest.split_once('-') {
        Some((digits, "udp")) => digits,
        Some(_) => return None,
        None => rest,
    };
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}
