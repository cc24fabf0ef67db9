//! Internal event bus.
//!
//! Coordinators never call each other directly for fan-out concerns; they
//! publish on this bus and interested components subscribe. This keeps
//! ordering and fan-out visible and lets tests observe side effects by
//! subscribing.

use tokio::sync::broadcast;
use tracing::trace;

use crate::decision::DenyReason;

/// A byte delta was accounted against a user and rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficAccounted {
    pub user_id: i64,
    pub rule_id: i64,
    pub input_bytes: i64,
    pub output_bytes: i64,
    /// Unix timestamp of the snapshot the delta was derived from.
    pub at: i64,
}

impl TrafficAccounted {
    #[inline]
    pub fn total(&self) -> i64 {
        self.input_bytes + self.output_bytes
    }
}

/// A user's quota verdict flipped (edge-triggered, never republished for
/// an unchanged verdict).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaChanged {
    pub user_id: i64,
    pub allowed: bool,
    /// Set when the new verdict is a denial.
    pub reason: Option<DenyReason>,
}

/// Rules were created, edited, or deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleChanged {
    /// Affected listening ports. Empty means "unknown set, invalidate
    /// everything".
    pub ports: Vec<u16>,
}

/// Events carried by the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    TrafficAccounted(TrafficAccounted),
    QuotaChanged(QuotaChanged),
    RuleChanged(RuleChanged),
}

impl ControlEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TrafficAccounted(_) => "traffic_accounted",
            Self::QuotaChanged(_) => "quota_changed",
            Self::RuleChanged(_) => "rule_changed",
        }
    }
}

/// Broadcast-backed event bus.
///
/// Publishing never blocks. Slow subscribers lag and skip events rather
/// than applying backpressure to publishers; subscribers must treat a lag
/// as "resync from authoritative state", which every consumer here does
/// anyway (caches rebuild, sync re-renders).
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ControlEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. A send error only means there are currently no
    /// subscribers, which is fine.
    pub fn publish(&self, event: ControlEvent) {
        trace!(kind = event.kind(), "publish event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::DEFAULT_EVENT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(ControlEvent::QuotaChanged(QuotaChanged {
            user_id: 7,
            allowed: false,
            reason: Some(DenyReason::QuotaExceeded),
        }));

        match rx.recv().await {
            Ok(ControlEvent::QuotaChanged(ev)) => {
                assert_eq!(ev.user_id, 7);
                assert!(!ev.allowed);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::new(16);
        bus.publish(ControlEvent::RuleChanged(RuleChanged { ports: vec![80] }));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_fanout_to_multiple_subscribers() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(ControlEvent::RuleChanged(RuleChanged { ports: vec![1] }));

        assert!(matches!(rx1.recv().await, Ok(ControlEvent::RuleChanged(_))));
        assert!(matches!(rx2.recv().await, Ok(ControlEvent::RuleChanged(_))));
    }
}
