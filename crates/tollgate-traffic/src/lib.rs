//! Traffic accounting for the tollgate control plane.
//!
//! [`TrafficIngestor`] converts the forwarder's cumulative per-service
//! counters into accounted byte deltas, and [`EmergencyMonitor`] watches
//! accounted growth between quota rechecks,
//! forcing an early re-evaluation when a user transfers unusually fast.

mod delta;
mod ingest;
mod monitor;

pub use delta::{CounterDelta, DeltaTracker};
pub use ingest::{IngestorConfig, ServiceStats, TrafficIngestor};
pub use monitor::{EmergencyMonitor, MonitorConfig};
