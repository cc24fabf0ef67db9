//! Cumulative-counter to delta conversion.

use dashmap::DashMap;

/// Last-seen cumulative counters of one service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CounterSnapshot {
    input_bytes: i64,
    output_bytes: i64,
}

/// The increment derived from one counter report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterDelta {
    pub input_bytes: i64,
    pub output_bytes: i64,
    /// True when the service restarted its counters since the last report.
    pub reset: bool,
}

impl CounterDelta {
    #[inline]
    pub fn total(&self) -> i64 {
        self.input_bytes + self.output_bytes
    }
}

/// Per-service last-seen cumulative counters.
///
/// The forwarder reports counters that are cumulative since each service
/// started. [`DeltaTracker::advance`] turns a report into the increment
/// since the previous report for the same service key: `new - last`, except
/// that `new < last` means the service restarted and is counting from zero
/// again, in which case the delta is `new` itself.
///
/// The tracker state is advanced before any accounting I/O happens, so a
/// retried ingestion call for the same report computes a zero delta instead
/// of double-counting.
#[derive(Debug, Default)]
pub struct DeltaTracker {
    last: DashMap<String, CounterSnapshot>,
}

impl DeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the last-seen counters for `service` and return the delta.
    ///
    /// Input and output counters reset together when the service restarts,
    /// so a reset on either side treats both as counting from zero.
    pub fn advance(&self, service: &str, input_bytes: i64, output_bytes: i64) -> CounterDelta {
        let new = CounterSnapshot {
            input_bytes: input_bytes.max(0),
            output_bytes: output_bytes.max(0),
        };
        let mut entry = self.last.entry(service.to_string()).or_default();
        let last = *entry;
        *entry = new;
        drop(entry);

        let reset = new.input_bytes < last.input_bytes || new.output_bytes < last.output_bytes;
        if reset {
            tollgate_metrics::record_counter_reset();
            CounterDelta {
                input_bytes: new.input_bytes,
                output_bytes: new.output_bytes,
                reset: true,
            }
        } else {
            CounterDelta {
                input_bytes: new.input_bytes - last.input_bytes,
                output_bytes: new.output_bytes - last.output_bytes,
                reset: false,
            }
        }
    }

    /// Forget one service (its rule was deleted).
    pub fn forget(&self, service: &str) {
        self.last.remove(service);
    }

    /// Number of services with tracked counters.
    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}
